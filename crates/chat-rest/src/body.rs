//! Request bodies
//!
//! Each body variant owns its encoding; the dispatcher just applies it to
//! the outgoing request.

use crate::error::{RestError, RestResult};
use reqwest::multipart::{Form, Part};
use reqwest::RequestBuilder;
use serde::Serialize;
use serde_json::Value;

/// A file uploaded with a multipart request
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Body of an outgoing request
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// `application/json`
    Json(Value),
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    /// `multipart/form-data`: a `payload_json` part plus `files[n]` parts
    Multipart {
        payload_json: Option<Value>,
        files: Vec<Attachment>,
    },
}

impl RequestBody {
    /// JSON body from any serializable value
    pub fn json<T: Serialize>(value: &T) -> RestResult<Self> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|e| RestError::Encode(e.to_string()))
    }

    pub fn form<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::Form(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn multipart(payload_json: Option<Value>, files: Vec<Attachment>) -> Self {
        Self::Multipart {
            payload_json,
            files,
        }
    }

    /// Encode this body onto `builder`
    pub fn apply(self, builder: RequestBuilder) -> RestResult<RequestBuilder> {
        match self {
            Self::Empty => Ok(builder),
            Self::Json(value) => Ok(builder.json(&value)),
            Self::Form(pairs) => Ok(builder.form(&pairs)),
            Self::Multipart {
                payload_json,
                files,
            } => {
                let mut form = Form::new();
                if let Some(payload) = payload_json {
                    let text = serde_json::to_string(&payload)
                        .map_err(|e| RestError::Encode(e.to_string()))?;
                    let part = Part::text(text)
                        .mime_str("application/json")
                        .map_err(|e| RestError::Encode(e.to_string()))?;
                    form = form.part("payload_json", part);
                }
                for (index, file) in files.into_iter().enumerate() {
                    let mut part = Part::bytes(file.data).file_name(file.filename);
                    if let Some(content_type) = file.content_type {
                        part = part
                            .mime_str(&content_type)
                            .map_err(|e| RestError::Encode(e.to_string()))?;
                    }
                    form = form.part(format!("files[{index}]"), part);
                }
                Ok(builder.multipart(form))
            }
        }
    }
}
