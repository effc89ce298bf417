//! Consume-direction stream bridge.
//!
//! [`serve_consume`] owns one consume session end to end: it spawns the
//! reader, writer and handler-invoker tasks under a shared fail-fast scope
//! and blocks until all three have drained.
//!
//! Session state machine, driven by the reader:
//!
//! ```text
//! AwaitingStart --StartRequest--> Active --EOF/cancel/error--> Terminated
//! ```
//!
//! In `AwaitingStart` only a start envelope is legal; in `Active` only
//! confirmations are. The derived [`ConsumerConfig`] crosses to the invoker
//! exactly once over a oneshot slot; messages and confirmations cross the
//! steady-state rendezvous channels. Every blocking channel operation is
//! raced against the shared scope, and a task that loses that race exits
//! with `Ok(())` — cancellation is not itself an error.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bridge::{EnvelopeSink, EnvelopeStream, SessionError};
use crate::group::TaskGroup;
use crate::handler::{ConsumeHandler, ConsumerConfig};
use crate::wire::{consumer_request, Confirmation, ConsumerRequest, Message};

/// Drive one consume session over the given stream halves.
///
/// Returns the handler's result, a protocol violation, a transport failure,
/// or — when the group drained cleanly but `ctx` was cancelled underneath
/// the session — [`SessionError::Canceled`].
pub async fn serve_consume<S, K, H>(
    ctx: &CancellationToken,
    mut inbound: S,
    mut outbound: K,
    handler: Arc<H>,
) -> Result<(), SessionError>
where
    S: EnvelopeStream<Envelope = ConsumerRequest> + 'static,
    K: EnvelopeSink<Item = Message> + 'static,
    H: ConsumeHandler + ?Sized + 'static,
{
    let mut group: TaskGroup<SessionError> = TaskGroup::new(ctx);

    let (for_client_tx, mut for_client_rx) = mpsc::channel::<Message>(1);
    let (confirm_tx, confirm_rx) = mpsc::channel::<Confirmation>(1);
    let (start_tx, start_rx) = oneshot::channel::<ConsumerConfig>();

    // Reader: demultiplexes the inbound stream. Owns the handshake slot and
    // the confirmation channel's sending half.
    let token = group.token();
    group.spawn(async move {
        let mut start_tx = Some(start_tx);
        let mut started = false;
        loop {
            let envelope = tokio::select! {
                received = inbound.recv() => match received {
                    Ok(Some(envelope)) => envelope,
                    // Clean client close; the rest of the group drains on
                    // its own once the channels stop being serviced.
                    Ok(None) => return Ok(()),
                    Err(_) if token.is_cancelled() => return Ok(()),
                    Err(e) => return Err(e.into()),
                },
                _ = token.cancelled() => return Ok(()),
            };

            match envelope.variant {
                Some(consumer_request::Variant::StartRequest(start)) => {
                    if started {
                        return Err(SessionError::ConsumeAlreadyStarted);
                    }
                    started = true;
                    let config = ConsumerConfig::from(start);
                    debug!(topic = %config.topic, consumer = %config.consumer, "consume session started");
                    if let Some(tx) = start_tx.take() {
                        // The receiver only disappears while the scope is
                        // winding down.
                        if tx.send(config).is_err() {
                            return Ok(());
                        }
                    }
                }
                Some(consumer_request::Variant::Confirmation(confirmation)) => {
                    if !started {
                        return Err(SessionError::InvalidConfirmation);
                    }
                    tokio::select! {
                        sent = confirm_tx.send(confirmation) => {
                            if sent.is_err() {
                                // Handler returned; its result is already
                                // the session's result.
                                return Ok(());
                            }
                        }
                        _ = token.cancelled() => return Ok(()),
                    }
                }
                None => return Err(SessionError::InvalidRequest),
            }
        }
    });

    // Writer: drains the handler's production channel onto the stream,
    // preserving enqueue order.
    let token = group.token();
    group.spawn(async move {
        loop {
            let message = tokio::select! {
                next = for_client_rx.recv() => match next {
                    Some(message) => message,
                    // Handler dropped its sender: session is resolving.
                    None => return Ok(()),
                },
                _ = token.cancelled() => return Ok(()),
            };
            if let Err(e) = outbound.send(message).await {
                if token.is_cancelled() {
                    return Ok(());
                }
                return Err(e.into());
            }
        }
    });

    // Handler invoker: waits out the handshake, then delegates. The
    // handler's return value is the authoritative session result.
    let token = group.token();
    group.spawn(async move {
        let config = tokio::select! {
            received = start_rx => match received {
                Ok(config) => config,
                // Reader exited before a handshake arrived; nothing to do.
                Err(_) => return Ok(()),
            },
            _ = token.cancelled() => return Ok(()),
        };
        handler
            .handle_consume(token.clone(), config, for_client_tx, confirm_rx)
            .await
    });

    group.wait().await?;

    // The group drained cleanly; report cancellation of the stream's own
    // scope, if any, as the terminal cause.
    if ctx.is_cancelled() {
        return Err(SessionError::Canceled);
    }
    Ok(())
}
