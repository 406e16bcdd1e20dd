//! `Connection`: owns one socket, drives the handshakes, and runs the
//! sender/receiver task pair plus one task per live RoC (spec.md §4.2).
//!
//! Generic over `AsyncRead + AsyncWrite` the way `roc_wire::frame` is,
//! grounded in `spark-transport-tcp::channel`'s direct use of
//! `tokio::io::{AsyncReadExt, AsyncWriteExt}` against a stream type
//! rather than a concrete `TcpStream`; this lets the literal end-to-end
//! scenarios in spec.md §8 run over `tokio::io::duplex` instead of a
//! real socket.

use crate::config::EngineConfig;
use crate::dispatcher::{new_roc, RocEntry};
use crate::free_list::FreeList;
use crate::handler::{DispatchOutcome, HandlerRegistry};
use crate::request_set::RequestSet;
use crate::resources::ResourceAcquirer;
use bytes::Bytes;
use roc_core::error::{EngineError, Result};
use roc_wire::{
    exchange_version, message, perform_auth_handshake, read_frame, write_frame, AuthClock,
    Command, CredentialStore, GlobalStatus, MessageType, RequestId, RequestStatus,
};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{info_span, warn, Instrument};

type SharedRequestSet = Arc<Mutex<RequestSet<RocEntry>>>;

/// Everything a `Connection` needs to run that does not come from the
/// socket itself.
///
/// Bundled into one struct rather than five parameters because every
/// field is process-wide and shared read-only across every connection
/// an acceptor spawns; cloning a `ConnectionContext` is cheap (every
/// field is an `Arc`, a `Copy` config, or a short owned label).
pub struct ConnectionContext {
    pub registry: Arc<HandlerRegistry>,
    pub credentials: Arc<dyn CredentialStore>,
    pub clock: Arc<dyn AuthClock>,
    pub config: EngineConfig,
    pub container_pool: Arc<FreeList<Vec<u8>>>,
    pub peer_label: String,
}

/// Runs one connection's version handshake, auth handshake, and
/// send/receive loop pair to completion. Returns the terminating error
/// (every path out of this function is a `shutdown_impl` call per
/// spec.md §4.2; there is no orderly non-error exit once the handshakes
/// succeed). `when_closed` runs exactly once, whatever the cause.
pub async fn run_connection<S>(
    mut stream: S,
    ctx: ConnectionContext,
    when_closed: impl FnOnce(&EngineError) + Send + 'static,
) -> EngineError
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let span = info_span!("connection", peer = %ctx.peer_label);
    let _entered = span.clone();

    if let Err(err) = exchange_version(&mut stream, ctx.config.protocol_version()).await {
        warn!(target: "roc_engine::connection", error = %err, "version handshake failed");
        when_closed(&err);
        return err;
    }

    let client_name = match perform_auth_handshake(
        &mut stream,
        ctx.credentials.as_ref(),
        ctx.clock.as_ref(),
        ctx.config.auth_skew_window(),
    )
    .await
    {
        Ok(name) => name,
        Err(err) => {
            warn!(target: "roc_engine::connection", error = %err, "auth handshake failed");
            when_closed(&err);
            return err;
        }
    };

    let (mut reader, mut writer) = tokio::io::split(stream);
    let request_set: SharedRequestSet =
        Arc::new(Mutex::new(RequestSet::new(ctx.config.request_set_cap())));
    let (send_tx, mut send_rx) = mpsc::unbounded_channel::<RequestId>();
    let max_frame_len = ctx.config.max_frame_len();

    let sender_request_set = request_set.clone();
    let sender_span = span.clone();
    let sender_task = tokio::spawn(
        async move {
            while let Some(id) = send_rx.recv().await {
                let taken = {
                    let set = sender_request_set.lock().unwrap();
                    set.get(id).and_then(|entry| entry.take_send_producer())
                };
                let Some((producer, ack)) = taken else {
                    continue;
                };
                let chunks = producer();
                let slices: Vec<&[u8]> = chunks.iter().map(|c| c.as_ref()).collect();
                match write_frame(&mut writer, MessageType::Request, &slices).await {
                    Ok(()) => {
                        ack.accept();
                        let mut set = sender_request_set.lock().unwrap();
                        set.touch(id, Instant::now());
                    }
                    Err(err) => {
                        ack.fail(EngineError::shutdown_requested());
                        return Err(err);
                    }
                }
            }
            Ok(())
        }
        .instrument(sender_span),
    );

    let receiver_request_set = request_set.clone();
    let receiver_registry = ctx.registry.clone();
    let receiver_send_tx = send_tx.clone();
    let receiver_container_pool = ctx.container_pool.clone();
    let receiver_client_name = client_name.clone();
    let receiver_peer_label = ctx.peer_label.clone();
    let receiver_span = span.clone();
    let receiver_task = tokio::spawn(
        async move {
            loop {
                let (msg_type, payload) = read_frame(&mut reader, max_frame_len).await?;
                if msg_type != MessageType::Request {
                    return Err(EngineError::protocol(
                        "connection.unexpected_message_type",
                        "expected a Request frame after the handshakes completed",
                    ));
                }

                let (id, body) = message::split_request_id(&payload)?;

                let already_live = {
                    let set = receiver_request_set.lock().unwrap();
                    set.get(id).is_some()
                };

                if already_live {
                    let delivered = {
                        let set = receiver_request_set.lock().unwrap();
                        set.get(id)
                            .map(|entry| entry.deliver_payload(Bytes::copy_from_slice(body)))
                            .unwrap_or(false)
                    };
                    if delivered {
                        let mut set = receiver_request_set.lock().unwrap();
                        set.touch(id, Instant::now());
                    }
                    continue;
                }

                let (command, init_payload) = message::split_command(body)?;
                let outcome = receiver_registry.classify(command);

                let (entry, dispatcher) =
                    new_roc(id, receiver_send_tx.clone(), Instant::now());
                {
                    let mut set = receiver_request_set.lock().unwrap();
                    set.get_or_create(id, move || entry);
                }

                let roc_registry = receiver_registry.clone();
                let roc_request_set = receiver_request_set.clone();
                let roc_container_pool = receiver_container_pool.clone();
                let roc_client_name = receiver_client_name.clone();
                let roc_peer_label = receiver_peer_label.clone();
                let init_payload = Bytes::copy_from_slice(init_payload);

                tokio::spawn(run_roc(
                    id,
                    command,
                    outcome,
                    dispatcher,
                    init_payload,
                    roc_registry,
                    roc_request_set,
                    roc_container_pool,
                    roc_client_name,
                    roc_peer_label,
                ));
            }
        }
        .instrument(receiver_span),
    );

    let mut sender_task = sender_task;
    let mut receiver_task = receiver_task;
    let err = tokio::select! {
        sender_result = &mut sender_task => sender_result.unwrap_or_else(|_| Err(EngineError::shutdown_requested())).err(),
        receiver_result = &mut receiver_task => receiver_result.unwrap_or_else(|_| Err(EngineError::shutdown_requested())).err(),
    }
    .unwrap_or_else(EngineError::shutdown_requested);

    // Whichever loop did not trigger the shutdown is still running; per
    // spec.md §4.2, shutdown aborts both tasks unconditionally.
    sender_task.abort();
    receiver_task.abort();

    let fan_out_err_message = err.message().to_string();
    {
        let mut set = request_set.lock().unwrap();
        set.shutdown_all(|_id, entry| entry_resume_with_shutdown(entry, &fan_out_err_message));
    }

    let global_status = global_status_for(&err);
    warn!(
        target: "roc_engine::connection",
        error = %err,
        client = %client_name,
        global_status = ?global_status,
        "connection shutting down"
    );
    when_closed(&err);
    err
}

/// Maps an `EngineError`'s category onto the coarse connection-wide
/// status codes from spec.md §6, used for logging and by embedders
/// that want to classify a closed connection without matching on error
/// codes.
fn global_status_for(err: &EngineError) -> GlobalStatus {
    match err.category() {
        roc_core::error::ErrorCategory::AuthRejected => GlobalStatus::AuthRejected,
        roc_core::error::ErrorCategory::TooManyRequests => GlobalStatus::TooManyRequests,
        roc_core::error::ErrorCategory::Io
        | roc_core::error::ErrorCategory::Protocol
        | roc_core::error::ErrorCategory::VersionMismatch => GlobalStatus::ProtocolError,
        _ => GlobalStatus::Ok,
    }
}

fn entry_resume_with_shutdown(entry: RocEntry, message: &str) {
    entry.resume_with_error(EngineError::new(
        roc_core::error::ErrorCategory::Shutdown,
        "connection.shutdown_fanout",
        message.to_string(),
    ));
    entry.mark_terminated();
}

#[allow(clippy::too_many_arguments)]
async fn run_roc(
    id: RequestId,
    command: Command,
    outcome: DispatchOutcome,
    dispatcher: crate::dispatcher::EventDispatcher,
    init_payload: Bytes,
    registry: Arc<HandlerRegistry>,
    request_set: SharedRequestSet,
    container_pool: Arc<FreeList<Vec<u8>>>,
    client_name: String,
    peer_label: String,
) {
    let status = match outcome {
        DispatchOutcome::Supported => RequestStatus::Supported,
        DispatchOutcome::NotSupported => RequestStatus::NotSupported,
        DispatchOutcome::VersionNotSupported => RequestStatus::VersionNotSupported,
    };

    let status_byte = status.to_byte();
    let id_bytes = id.0.to_le_bytes();
    let send_result = dispatcher
        .send(move || {
            vec![
                Bytes::copy_from_slice(&id_bytes),
                Bytes::from(vec![status_byte]),
            ]
        })
        .await;

    if send_result.is_ok() && outcome == DispatchOutcome::Supported {
        let mut resources = ResourceAcquirer::new(container_pool);
        if let Some(handler) = registry.instantiate(command) {
            let name = registry.name_of(command).unwrap_or("unknown");
            let timed = registry.is_timed(command);
            let started = Instant::now();

            if registry.is_retired(command) {
                registry.record_retired_dispatch(name);
                warn!(
                    target: "roc_engine::dispatch",
                    client = %client_name,
                    peer = %peer_label,
                    handler = name,
                    "request dispatched to a retired handler"
                );
            }

            registry.record_started(name);
            let result = handler.handle(&dispatcher, &mut resources, init_payload).await;
            registry.record_finished(name);
            if timed {
                registry.record_timing(name, started.elapsed().as_micros() as u64);
            }
            if let Err(err) = result {
                warn!(
                    target: "roc_engine::dispatch",
                    client = %client_name,
                    peer = %peer_label,
                    handler = name,
                    error = %err,
                    "request handler returned an error"
                );
            }
        }
    }

    dispatcher.mark_terminated();
    request_set.lock().unwrap().remove(id);
}
