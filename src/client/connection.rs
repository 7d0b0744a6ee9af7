//! A single client connection: one request in flight at a time.

use std::fmt;

use tokio::time::Instant;

use crate::client::Request;
use crate::error::RpcError;
use crate::message::{read_frame, write_frame, Frame, Message};
use crate::net::BoxedTransport;
use crate::pool::PoolConnection;

const CONN_ID: &str = "micro_rpc.client.connection";

/// Pooled connection to one logical server.
///
/// The error flag is raised before any I/O and only cleared once a full
/// response has been read, so a call abandoned mid-flight leaves the
/// connection marked unusable and the pool discards it.
pub struct RpcConnection {
    id: u64,
    remote: String,
    created: Instant,
    stream: BoxedTransport,
    seq: u64,
    error: Option<RpcError>,
}

impl RpcConnection {
    pub fn new(id: u64, remote: impl Into<String>, stream: BoxedTransport) -> Self {
        Self {
            id,
            remote: remote.into(),
            created: Instant::now(),
            stream,
            seq: 0,
            error: None,
        }
    }

    /// Send `req` and wait for its response.
    ///
    /// Handler errors come back as `Err` but leave the connection healthy;
    /// transport and framing errors poison it.
    pub async fn call(&mut self, req: &Request) -> Result<Message, RpcError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        self.error = Some(RpcError::internal(CONN_ID, "call interrupted"));

        self.seq += 1;
        let seq = self.seq;
        let message = Message::new(req.header().clone(), req.body().to_vec());
        let frame = Frame::request(seq, req.method(), message);

        if let Err(err) = write_frame(&mut self.stream, &frame).await {
            return Err(self.poison(req, err));
        }
        let response = match read_frame(&mut self.stream).await {
            Ok(Some(response)) => response,
            Ok(None) => {
                let closed = RpcError::internal(CONN_ID, "connection closed by peer");
                return Err(self.poison(req, closed));
            }
            Err(err) => return Err(self.poison(req, err)),
        };
        if response.seq != seq {
            let mismatch = RpcError::internal(
                CONN_ID,
                format!("response sequence {} does not match request {}", response.seq, seq),
            );
            return Err(self.poison(req, mismatch));
        }

        self.error = None;
        match response.error {
            Some(wire) => Err(RpcError::from_wire(wire)),
            None => Ok(response.message),
        }
    }

    fn poison(&mut self, req: &Request, err: RpcError) -> RpcError {
        let err = RpcError::internal(
            CONN_ID,
            format!("server {}.{}: {}", req.service(), req.method(), err),
        );
        tracing::debug!(conn_id = self.id, remote = %self.remote, error = %err, "Connection poisoned");
        self.error = Some(err.clone());
        err
    }
}

impl PoolConnection for RpcConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn created(&self) -> Instant {
        self.created
    }

    fn remote(&self) -> &str {
        &self.remote
    }

    fn error(&self) -> Option<&RpcError> {
        self.error.as_ref()
    }
}

impl fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcConnection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("created", &self.created)
            .field("seq", &self.seq)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}
