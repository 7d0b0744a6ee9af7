//! Per-connection request loop.
//!
//! Requests on one connection are read sequentially and executed
//! concurrently; responses are written back as they complete and matched
//! to their request by sequence number.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::io::{split, AsyncWrite, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::client::REQUEST_ID_HEADER;
use crate::context::Context;
use crate::error::RpcError;
use crate::lifecycle::ShutdownSignal;
use crate::message::{read_frame, write_frame, Frame};
use crate::net::{ConnectionId, Transport};
use crate::observability::metrics;
use crate::server::{HandlerFn, ServerRequest};

const SERVER_ID: &str = "micro_rpc.server";

type SharedWriter<S> = Arc<Mutex<WriteHalf<S>>>;

/// Serve framed requests on `stream` until the peer disconnects or `shutdown` fires.
///
/// In-flight requests are allowed to finish before returning.
pub async fn serve_connection<S>(stream: S, id: ConnectionId, handler: HandlerFn, mut shutdown: ShutdownSignal)
where
    S: Transport,
{
    let (mut reader, writer) = split(stream);
    let writer: SharedWriter<S> = Arc::new(Mutex::new(writer));
    let mut in_flight = JoinSet::new();

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                tracing::debug!(connection_id = %id, "Connection draining for shutdown");
                break;
            }
            frame = read_frame(&mut reader) => frame,
        };
        match frame {
            Ok(Some(frame)) => {
                in_flight.spawn(handle_request(frame, handler.clone(), writer.clone()));
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(connection_id = %id, error = %err, "Connection read failed");
                break;
            }
        }
        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
    tracing::debug!(connection_id = %id, "Connection finished");
}

/// Run one request through the handler chain and write its response.
async fn handle_request<S>(frame: Frame, handler: HandlerFn, writer: SharedWriter<S>)
where
    S: AsyncWrite + Send + 'static,
{
    let started = Instant::now();
    let Frame { seq, service_method, message, .. } = frame;
    let request_id = message.header.get(REQUEST_ID_HEADER).map(str::to_owned);
    let ctx = Context::background().with_metadata(message.header.clone());
    let req = ServerRequest::new(service_method.clone(), message.header, message.body);

    let result = match AssertUnwindSafe(async { handler(ctx, req).await }).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            tracing::error!(
                method = %service_method,
                request_id = request_id.as_deref().unwrap_or("-"),
                panic = panic_message(payload.as_ref()),
                "Handler panicked"
            );
            Err(RpcError::internal(SERVER_ID, format!("{service_method}: handler panicked")))
        }
    };

    let outcome = match &result {
        Ok(_) => "ok",
        Err(err) => {
            tracing::debug!(method = %service_method, error = %err, "Handler returned error");
            "error"
        }
    };
    metrics::record_server_request(&service_method, outcome, started);

    let result = result
        .map(|mut reply| {
            if let Some(id) = request_id {
                reply.header.set(REQUEST_ID_HEADER, id);
            }
            reply
        })
        .map_err(|err| err.to_wire());
    let response = Frame::response(seq, service_method, result);

    let mut writer = writer.lock().await;
    if let Err(err) = write_frame(&mut *writer, &response).await {
        tracing::debug!(method = %response.service_method, error = %err, "Failed to write response");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Handler answering unknown methods with `NotFound`.
pub(crate) fn dispatcher(lookup: impl Fn(&str) -> Option<HandlerFn> + Send + Sync + 'static) -> HandlerFn {
    Arc::new(move |ctx, req| match lookup(&req.service_method) {
        Some(handler) => handler(ctx, req),
        None => {
            let detail = format!("rpc: can't find method {}", req.service_method);
            Box::pin(async move { Err(RpcError::not_found(SERVER_ID, detail)) })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::message::{Header, Message};
    use crate::server::HandlerFuture;
    use tokio::io::DuplexStream;

    fn echo_or_panic() -> HandlerFn {
        dispatcher(|name| match name {
            "Echo.Say" => Some(Arc::new(|_: Context, req: ServerRequest| -> HandlerFuture {
                Box::pin(async move { Ok(Message::new(Header::new(), req.body)) })
            }) as HandlerFn),
            "Echo.Boom" => Some(Arc::new(|_: Context, _: ServerRequest| -> HandlerFuture { panic!("boom") }) as HandlerFn),
            _ => None,
        })
    }

    async fn start(shutdown: &Shutdown) -> (DuplexStream, tokio::task::JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(serve_connection(server, ConnectionId::new(), echo_or_panic(), shutdown.subscribe()));
        (client, task)
    }

    async fn roundtrip(client: &mut DuplexStream, seq: u64, method: &str, body: &[u8]) -> Frame {
        let mut header = Header::new();
        header.set(REQUEST_ID_HEADER, format!("req-{seq}"));
        write_frame(client, &Frame::request(seq, method, Message::new(header, body.to_vec())))
            .await
            .unwrap();
        read_frame(client).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn dispatches_and_echoes_request_id() {
        let shutdown = Shutdown::new();
        let (mut client, _task) = start(&shutdown).await;

        let reply = roundtrip(&mut client, 1, "Echo.Say", b"hello").await;
        assert_eq!(reply.seq, 1);
        assert_eq!(reply.error, None);
        assert_eq!(reply.message.body, b"hello");
        assert_eq!(reply.message.header.get(REQUEST_ID_HEADER), Some("req-1"));
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let shutdown = Shutdown::new();
        let (mut client, _task) = start(&shutdown).await;

        let reply = roundtrip(&mut client, 2, "Echo.Nope", b"").await;
        let err = RpcError::from_wire(reply.error.unwrap());
        assert_eq!(err, RpcError::not_found(SERVER_ID, "rpc: can't find method Echo.Nope"));
    }

    #[tokio::test]
    async fn panicking_handler_answers_500_and_keeps_serving() {
        let shutdown = Shutdown::new();
        let (mut client, _task) = start(&shutdown).await;

        let reply = roundtrip(&mut client, 3, "Echo.Boom", b"").await;
        assert_eq!(reply.error.map(|e| e.code), Some(500));

        let reply = roundtrip(&mut client, 4, "Echo.Say", b"still here").await;
        assert_eq!(reply.message.body, b"still here");
    }

    #[tokio::test]
    async fn stops_on_peer_close_and_on_shutdown() {
        let shutdown = Shutdown::new();
        let (client, task) = start(&shutdown).await;
        drop(client);
        task.await.unwrap();

        let (_client, task) = start(&shutdown).await;
        shutdown.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("connection ignored shutdown")
            .unwrap();
    }
}
