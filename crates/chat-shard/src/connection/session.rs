//! Session continuity
//!
//! What a shard remembers across connections: the session token and the
//! last sequence number. Together they decide between Identify and Resume.

use crate::protocol::close_codes;

/// Which handshake the next connection must perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Identify,
    Resume { session_id: String, sequence: u64 },
}

/// Session token, sequence and resume endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    session_id: Option<String>,
    sequence: Option<u64>,
    resume_url: Option<String>,
}

impl SessionInfo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// Resume only when both the token and a sequence are known
    pub fn handshake(&self) -> Handshake {
        match (&self.session_id, self.sequence) {
            (Some(session_id), Some(sequence)) => Handshake::Resume {
                session_id: session_id.clone(),
                sequence,
            },
            _ => Handshake::Identify,
        }
    }

    /// Record a frame's sequence number; never moves backwards
    pub fn record_sequence(&mut self, sequence: u64) {
        self.sequence = Some(self.sequence.map_or(sequence, |last| last.max(sequence)));
    }

    /// Store the session opened by `READY`.
    ///
    /// The sequence restarts at the `READY` frame's own number, so nothing
    /// recorded before the Identify leaks into the new session.
    pub fn start(
        &mut self,
        session_id: String,
        sequence: Option<u64>,
        resume_url: Option<String>,
    ) {
        self.session_id = Some(session_id);
        self.sequence = sequence;
        self.resume_url = resume_url;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Apply a close code received from the server.
    ///
    /// Returns true when the session was voided.
    pub fn apply_close(&mut self, code: u16) -> bool {
        if close_codes::clears_session(code) {
            self.clear();
            true
        } else {
            false
        }
    }

    /// URL for the next connection: the resume endpoint when resuming,
    /// otherwise `default_url`. Query parameters of `default_url` carry over
    /// to a resume endpoint that has none.
    pub fn connect_url(&self, default_url: &str) -> String {
        let resume_url = match (&self.resume_url, self.handshake()) {
            (Some(url), Handshake::Resume { .. }) => url,
            _ => return default_url.to_string(),
        };

        match default_url.split_once('?') {
            Some((_, query)) if !resume_url.contains('?') => {
                format!("{}/?{query}", resume_url.trim_end_matches('/'))
            }
            _ => resume_url.clone(),
        }
    }
}
