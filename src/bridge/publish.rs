//! Publish-direction stream bridge.
//!
//! Structural mirror of [`super::consume`] with the data direction
//! reversed: the inbound stream carries `{StartRequest | Message}`
//! envelopes, each post-handshake message is handed to the handler over the
//! session's inbound channel, and the writer drains the handler's
//! acknowledgement channel back onto the stream. The three-task group, the
//! `AwaitingStart → Active → Terminated` state machine and the cancellation
//! rules are identical to the consume direction.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bridge::{EnvelopeSink, EnvelopeStream, SessionError};
use crate::group::TaskGroup;
use crate::handler::{PublishHandler, PublisherConfig};
use crate::wire::{publisher_request, Confirmation, Message, PublisherRequest};

/// Drive one publish session over the given stream halves.
pub async fn serve_publish<S, K, H>(
    ctx: &CancellationToken,
    mut inbound: S,
    mut outbound: K,
    handler: Arc<H>,
) -> Result<(), SessionError>
where
    S: EnvelopeStream<Envelope = PublisherRequest> + 'static,
    K: EnvelopeSink<Item = Confirmation> + 'static,
    H: PublishHandler + ?Sized + 'static,
{
    let mut group: TaskGroup<SessionError> = TaskGroup::new(ctx);

    let (message_tx, message_rx) = mpsc::channel::<Message>(1);
    let (ack_tx, mut ack_rx) = mpsc::channel::<Confirmation>(1);
    let (start_tx, start_rx) = oneshot::channel::<PublisherConfig>();

    // Reader: demultiplexes the inbound stream; after the handshake each
    // message crosses to the handler over the rendezvous channel.
    let token = group.token();
    group.spawn(async move {
        let mut start_tx = Some(start_tx);
        let mut started = false;
        loop {
            let envelope = tokio::select! {
                received = inbound.recv() => match received {
                    Ok(Some(envelope)) => envelope,
                    Ok(None) => return Ok(()),
                    Err(_) if token.is_cancelled() => return Ok(()),
                    Err(e) => return Err(e.into()),
                },
                _ = token.cancelled() => return Ok(()),
            };

            match envelope.variant {
                Some(publisher_request::Variant::StartRequest(start)) => {
                    if started {
                        return Err(SessionError::PublishAlreadyStarted);
                    }
                    started = true;
                    let config = PublisherConfig::from(start);
                    debug!(topic = %config.topic, "publish session started");
                    if let Some(tx) = start_tx.take() {
                        if tx.send(config).is_err() {
                            return Ok(());
                        }
                    }
                }
                Some(publisher_request::Variant::Msg(message)) => {
                    if !started {
                        return Err(SessionError::InvalidMessage);
                    }
                    tokio::select! {
                        sent = message_tx.send(message) => {
                            if sent.is_err() {
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

    // Writer: drains the handler's acknowledgements onto the stream in
    // order.
    let token = group.token();
    group.spawn(async move {
        loop {
            let confirmation = tokio::select! {
                next = ack_rx.recv() => match next {
                    Some(confirmation) => confirmation,
                    None => return Ok(()),
                },
                _ = token.cancelled() => return Ok(()),
            };
            if let Err(e) = outbound.send(confirmation).await {
                if token.is_cancelled() {
                    return Ok(());
                }
                return Err(e.into());
            }
        }
    });

    // Handler invoker.
    let token = group.token();
    group.spawn(async move {
        let config = tokio::select! {
            received = start_rx => match received {
                Ok(config) => config,
                Err(_) => return Ok(()),
            },
            _ = token.cancelled() => return Ok(()),
        };
        handler
            .handle_publish(token.clone(), config, message_rx, ack_tx)
            .await
    });

    group.wait().await?;

    if ctx.is_cancelled() {
        return Err(SessionError::Canceled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::{channel_sink, channel_stream};
    use crate::wire::StartPublishRequest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    fn start_envelope(topic: &str) -> PublisherRequest {
        PublisherRequest {
            variant: Some(publisher_request::Variant::StartRequest(
                StartPublishRequest {
                    topic: topic.to_string(),
                },
            )),
        }
    }

    fn message_envelope(id: &str) -> PublisherRequest {
        PublisherRequest {
            variant: Some(publisher_request::Variant::Msg(Message {
                data: id.as_bytes().to_vec(),
                id: id.to_string(),
                metadata: Default::default(),
            })),
        }
    }

    /// Acknowledges every message with its own id.
    struct AckingHandler;

    #[async_trait]
    impl PublishHandler for AckingHandler {
        async fn handle_publish(
            &self,
            ctx: CancellationToken,
            _config: PublisherConfig,
            mut messages: mpsc::Receiver<Message>,
            acks: mpsc::Sender<Confirmation>,
        ) -> Result<(), SessionError> {
            loop {
                let message = tokio::select! {
                    next = messages.recv() => match next {
                        Some(message) => message,
                        None => return Ok(()),
                    },
                    _ = ctx.cancelled() => return Ok(()),
                };
                let confirmation = Confirmation { msg_id: message.id };
                tokio::select! {
                    sent = acks.send(confirmation) => {
                        if sent.is_err() {
                            return Ok(());
                        }
                    }
                    _ = ctx.cancelled() => return Ok(()),
                }
            }
        }
    }

    /// Records whether it was invoked, then exits immediately.
    #[derive(Default)]
    struct TrackingHandler {
        invoked: AtomicBool,
    }

    #[async_trait]
    impl PublishHandler for TrackingHandler {
        async fn handle_publish(
            &self,
            _ctx: CancellationToken,
            _config: PublisherConfig,
            _messages: mpsc::Receiver<Message>,
            _acks: mpsc::Sender<Confirmation>,
        ) -> Result<(), SessionError> {
            self.invoked.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails as soon as the first message arrives.
    struct FailingHandler;

    #[async_trait]
    impl PublishHandler for FailingHandler {
        async fn handle_publish(
            &self,
            _ctx: CancellationToken,
            _config: PublisherConfig,
            mut messages: mpsc::Receiver<Message>,
            _acks: mpsc::Sender<Confirmation>,
        ) -> Result<(), SessionError> {
            let _ = messages.recv().await;
            Err(crate::backend::BackendError::Command("sink rejected write".to_string()).into())
        }
    }

    async fn run_bridge<H: PublishHandler + 'static>(
        ctx: &CancellationToken,
        envelopes: Vec<PublisherRequest>,
        handler: Arc<H>,
    ) -> Result<(), SessionError> {
        let (inbound_tx, inbound) = channel_stream::<PublisherRequest>();
        let (outbound, _outbound_rx) = channel_sink::<Confirmation>();
        for envelope in envelopes {
            inbound_tx.send(Ok(envelope)).unwrap();
        }
        drop(inbound_tx);
        timeout(Duration::from_secs(2), serve_publish(ctx, inbound, outbound, handler))
            .await
            .expect("bridge hung")
    }

    #[tokio::test]
    async fn test_second_start_request_is_rejected() {
        let ctx = CancellationToken::new();
        let result = run_bridge(
            &ctx,
            vec![start_envelope("orders"), start_envelope("orders")],
            Arc::new(AckingHandler),
        )
        .await;
        assert!(matches!(result, Err(SessionError::PublishAlreadyStarted)));
    }

    #[tokio::test]
    async fn test_message_before_start_is_rejected() {
        let ctx = CancellationToken::new();
        let handler = Arc::new(TrackingHandler::default());
        let result = run_bridge(&ctx, vec![message_envelope("m1")], handler.clone()).await;
        assert!(matches!(result, Err(SessionError::InvalidMessage)));
        assert!(!handler.invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_envelope_is_rejected() {
        let ctx = CancellationToken::new();
        let result = run_bridge(
            &ctx,
            vec![start_envelope("orders"), PublisherRequest { variant: None }],
            Arc::new(AckingHandler),
        )
        .await;
        assert!(matches!(result, Err(SessionError::InvalidRequest)));
    }

    #[tokio::test]
    async fn test_acks_come_back_in_publish_order() {
        let ctx = CancellationToken::new();
        let (inbound_tx, inbound) = channel_stream::<PublisherRequest>();
        let (outbound, mut outbound_rx) = channel_sink::<Confirmation>();

        inbound_tx.send(Ok(start_envelope("orders"))).unwrap();
        for id in ["m1", "m2", "m3"] {
            inbound_tx.send(Ok(message_envelope(id))).unwrap();
        }

        let bridge = tokio::spawn(async move {
            serve_publish(&ctx, inbound, outbound, Arc::new(AckingHandler)).await
        });

        let mut acked = Vec::new();
        for _ in 0..3 {
            let confirmation = timeout(Duration::from_secs(1), outbound_rx.recv())
                .await
                .unwrap()
                .unwrap();
            acked.push(confirmation.msg_id);
        }
        drop(inbound_tx);

        let result = timeout(Duration::from_secs(2), bridge).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(acked, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_clean_eof_is_success() {
        let ctx = CancellationToken::new();
        let result = run_bridge(&ctx, vec![start_envelope("orders")], Arc::new(AckingHandler)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_before_start_reports_canceled() {
        let ctx = CancellationToken::new();
        let handler = Arc::new(TrackingHandler::default());

        let (_inbound_tx, inbound) = channel_stream::<PublisherRequest>();
        let (outbound, _outbound_rx) = channel_sink::<Confirmation>();

        let bridge = serve_publish(&ctx, inbound, outbound, handler.clone());
        tokio::pin!(bridge);

        tokio::select! {
            _ = &mut bridge => panic!("bridge resolved before cancellation"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        ctx.cancel();

        let result = timeout(Duration::from_secs(1), bridge).await.unwrap();
        assert!(matches!(result, Err(SessionError::Canceled)));
        assert!(!handler.invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_handler_error_stops_the_session() {
        let ctx = CancellationToken::new();
        let (inbound_tx, inbound) = channel_stream::<PublisherRequest>();
        let (outbound, _outbound_rx) = channel_sink::<Confirmation>();
        inbound_tx.send(Ok(start_envelope("orders"))).unwrap();
        inbound_tx.send(Ok(message_envelope("m1"))).unwrap();

        let result = timeout(
            Duration::from_secs(2),
            serve_publish(&ctx, inbound, outbound, Arc::new(FailingHandler)),
        )
        .await
        .expect("session did not stop after the handler failed");

        match result {
            Err(SessionError::Backend(e)) => {
                assert!(e.to_string().contains("sink rejected write"));
            }
            other => panic!("expected backend error, got {other:?}"),
        }
    }
}
