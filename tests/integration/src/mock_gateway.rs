//! In-process gateway server
//!
//! Accepts websocket connections on a random local port and hands each one
//! to the test, which then plays the server side of the protocol by hand.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

/// How long any single expectation may wait
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Mock gateway listening on 127.0.0.1
pub struct MockGateway {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<GatewayConnection>,
    _handle: JoinHandle<()>,
}

impl MockGateway {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Ok(socket) = accept_async(stream).await {
                        let _ = tx.send(GatewayConnection { socket });
                    }
                });
            }
        });

        Ok(Self {
            addr,
            connections: rx,
            _handle: handle,
        })
    }

    /// URL shards connect to
    pub fn url(&self) -> String {
        format!("ws://{}/?v=10&encoding=json", self.addr)
    }

    /// URL handed out in READY as the resume endpoint
    pub fn resume_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait for the next client connection
    pub async fn next_connection(&mut self) -> Result<GatewayConnection> {
        tokio::time::timeout(RECV_TIMEOUT, self.connections.recv())
            .await
            .context("no connection within timeout")?
            .context("gateway listener stopped")
    }

    /// Fail if a client connects within `within`
    pub async fn expect_no_connection(&mut self, within: Duration) -> Result<()> {
        match tokio::time::timeout(within, self.connections.recv()).await {
            Ok(Some(_)) => bail!("unexpected connection"),
            _ => Ok(()),
        }
    }

    /// Whether a connection arrived that the test has not taken yet
    pub fn has_pending_connection(&mut self) -> bool {
        self.connections.try_recv().is_ok()
    }
}

/// Server side of one accepted connection
pub struct GatewayConnection {
    socket: WebSocketStream<TcpStream>,
}

impl GatewayConnection {
    pub async fn send_json(&mut self, value: Value) -> Result<()> {
        self.socket.send(Message::Text(value.to_string())).await?;
        Ok(())
    }

    pub async fn hello(&mut self, heartbeat_interval_ms: u64) -> Result<()> {
        self.send_json(json!({"op": 10, "d": {"heartbeat_interval": heartbeat_interval_ms}}))
            .await
    }

    /// Send Hello and return the client's Identify or Resume
    pub async fn open(&mut self, heartbeat_interval_ms: u64) -> Result<Value> {
        self.hello(heartbeat_interval_ms).await?;
        self.recv_handshake().await
    }

    pub async fn dispatch(&mut self, seq: u64, event: &str, data: Value) -> Result<()> {
        self.send_json(json!({"op": 0, "s": seq, "t": event, "d": data}))
            .await
    }

    pub async fn ready(&mut self, seq: u64, session_id: &str, resume_url: Option<&str>) -> Result<()> {
        self.dispatch(
            seq,
            "READY",
            json!({
                "v": 10,
                "session_id": session_id,
                "resume_gateway_url": resume_url,
                "user": {"id": "1", "username": "test"}
            }),
        )
        .await
    }

    pub async fn heartbeat_ack(&mut self) -> Result<()> {
        self.send_json(json!({"op": 11})).await
    }

    pub async fn reconnect(&mut self) -> Result<()> {
        self.send_json(json!({"op": 7, "d": null})).await
    }

    pub async fn invalid_session(&mut self, resumable: bool) -> Result<()> {
        self.send_json(json!({"op": 9, "d": resumable})).await
    }

    /// Close the connection with `code`
    pub async fn close(&mut self, code: u16) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        self.socket.send(Message::Close(Some(frame))).await?;
        Ok(())
    }

    /// Next text frame from the client, as JSON
    pub async fn recv(&mut self) -> Result<Value> {
        loop {
            let next = tokio::time::timeout(RECV_TIMEOUT, self.socket.next())
                .await
                .context("no frame within timeout")?;
            match next {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Close(frame))) => bail!("client closed the connection: {frame:?}"),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => bail!("connection ended"),
            }
        }
    }

    /// Next frame with opcode `op`, skipping everything else
    pub async fn recv_op(&mut self, op: u64) -> Result<Value> {
        loop {
            let message = self.recv().await?;
            if message["op"] == op {
                return Ok(message);
            }
        }
    }

    /// Next Identify (2) or Resume (6), skipping heartbeats
    pub async fn recv_handshake(&mut self) -> Result<Value> {
        loop {
            let message = self.recv().await?;
            if matches!(message["op"].as_u64(), Some(2 | 6)) {
                return Ok(message);
            }
        }
    }

    /// Wait for the client to close; returns its close code
    pub async fn closed(&mut self) -> Result<Option<u16>> {
        loop {
            let next = tokio::time::timeout(RECV_TIMEOUT, self.socket.next())
                .await
                .context("connection not closed within timeout")?;
            match next {
                Some(Ok(Message::Close(frame))) => return Ok(frame.map(|f| u16::from(f.code))),
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return Ok(None),
            }
        }
    }
}
