//! Framed TCP front door.
//!
//! Each connection carries exactly one session. The first frame is a
//! [`CallHeader`] naming the direction; every later frame is a
//! length-delimited protobuf envelope for that direction. The last frame the
//! server sends is always a completion envelope carrying the terminal
//! [`Status`](crate::wire::Status), after which the connection closes.
//!
//! Shutdown is graceful: the accept loop stops on the shutdown token,
//! in-flight sessions get the configured grace period to wind down, and
//! whatever remains is cancelled and reported to its client as canceled.

use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message as _;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{serve_consume, serve_publish, EnvelopeSink, EnvelopeStream, TransportError};
use crate::config::{EndpointKind, GatewayConfig};
use crate::handler::{ConsumeHandler, PublishHandler};
use crate::shutdown::ShutdownSignal;
use crate::status::status_for;
use crate::wire::{
    consumer_response, publisher_response, CallHeader, Code, Confirmation, ConsumerRequest,
    ConsumerResponse, Endpoint, Message, PublisherRequest, PublisherResponse, Status,
};

/// Server-level failures. Session-level failures never reach this type;
/// they resolve into the session's terminal status instead.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("server i/o error: {0}")]
    Io(#[from] std::io::Error),
}

type Writer = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

/// The write half is shared between the session's sink and the final
/// completion frame, which outlives the sink.
type SharedWriter = Arc<Mutex<Writer>>;

async fn send_frame<M: prost::Message>(
    writer: &SharedWriter,
    message: &M,
) -> Result<(), TransportError> {
    let frame = Bytes::from(message.encode_to_vec());
    writer.lock().await.send(frame).await?;
    Ok(())
}

/// Inbound half of a connection, decoding one protobuf envelope per frame.
struct FrameStream<M> {
    frames: FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
    _marker: PhantomData<M>,
}

impl<M> FrameStream<M> {
    fn new(frames: FramedRead<OwnedReadHalf, LengthDelimitedCodec>) -> Self {
        Self {
            frames,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<M: prost::Message + Default + 'static> EnvelopeStream for FrameStream<M> {
    type Envelope = M;

    async fn recv(&mut self) -> Result<Option<M>, TransportError> {
        match self.frames.next().await {
            Some(Ok(frame)) => Ok(Some(M::decode(frame.freeze())?)),
            Some(Err(e)) => Err(TransportError::Io(e)),
            None => Ok(None),
        }
    }
}

/// Consume-direction sink: wraps each backend message in its response
/// envelope.
struct MessageSink {
    writer: SharedWriter,
}

#[async_trait]
impl EnvelopeSink for MessageSink {
    type Item = Message;

    async fn send(&mut self, item: Message) -> Result<(), TransportError> {
        let envelope = ConsumerResponse {
            reply: Some(consumer_response::Reply::Msg(item)),
        };
        send_frame(&self.writer, &envelope).await
    }
}

/// Publish-direction sink: wraps each acknowledgement in its response
/// envelope.
struct AckSink {
    writer: SharedWriter,
}

#[async_trait]
impl EnvelopeSink for AckSink {
    type Item = Confirmation;

    async fn send(&mut self, item: Confirmation) -> Result<(), TransportError> {
        let envelope = PublisherResponse {
            reply: Some(publisher_response::Reply::Confirmation(item)),
        };
        send_frame(&self.writer, &envelope).await
    }
}

/// The gateway server: configuration plus the handlers behind each
/// direction.
///
/// A direction with no handler, or one not listed in the configured
/// endpoints, refuses calls as unimplemented.
pub struct Gateway {
    config: GatewayConfig,
    consume: Option<Arc<dyn ConsumeHandler>>,
    publish: Option<Arc<dyn PublishHandler>>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            consume: None,
            publish: None,
        }
    }

    /// Serve consume sessions with the given handler.
    pub fn with_consume_handler(mut self, handler: Arc<dyn ConsumeHandler>) -> Self {
        self.consume = Some(handler);
        self
    }

    /// Serve publish sessions with the given handler.
    pub fn with_publish_handler(mut self, handler: Arc<dyn PublishHandler>) -> Self {
        self.publish = Some(handler);
        self
    }

    /// Bind the configured port and serve until shutdown.
    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<(), GatewayError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.server.port));
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already-bound listener until shutdown.
    pub async fn serve_on(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), GatewayError> {
        info!(addr = %listener.local_addr()?, "gateway listening");

        // Session tokens descend from the drain token, not the shutdown
        // token, so sessions survive the accept loop and are only cancelled
        // once the grace period runs out.
        let drain = CancellationToken::new();
        let mut sessions: JoinSet<()> = JoinSet::new();
        let shutdown_token = shutdown.token();
        let this = Arc::new(self);

        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => break,
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "connection accepted");
                    let gateway = this.clone();
                    let session_token = drain.child_token();
                    sessions.spawn(async move {
                        if let Err(e) = gateway.serve_connection(socket, session_token).await {
                            warn!(peer = %peer, error = %e, "connection failed");
                        }
                    });
                }
                Some(_) = sessions.join_next() => {}
            }
        }

        info!(sessions = sessions.len(), "draining sessions");
        let deadline = tokio::time::sleep(shutdown.grace());
        tokio::pin!(deadline);
        while !sessions.is_empty() {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(remaining = sessions.len(), "grace period elapsed, canceling sessions");
                    drain.cancel();
                    while sessions.join_next().await.is_some() {}
                }
                _ = sessions.join_next() => {}
            }
        }

        info!("gateway stopped");
        Ok(())
    }

    /// Drive one connection: header, session, completion frame.
    async fn serve_connection(
        &self,
        socket: TcpStream,
        token: CancellationToken,
    ) -> Result<(), TransportError> {
        let (read_half, write_half) = socket.into_split();
        let mut frames = FramedRead::new(read_half, LengthDelimitedCodec::new());
        let writer: SharedWriter = Arc::new(Mutex::new(FramedWrite::new(
            write_half,
            LengthDelimitedCodec::new(),
        )));

        let header = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            frame = frames.next() => match frame {
                Some(Ok(frame)) => CallHeader::decode(frame.freeze())?,
                Some(Err(e)) => return Err(TransportError::Io(e)),
                None => return Ok(()),
            },
        };
        let endpoint = Endpoint::try_from(header.endpoint).unwrap_or(Endpoint::Unspecified);

        let status = match endpoint {
            Endpoint::Consume => match self.consume_handler() {
                Some(handler) => {
                    let inbound = FrameStream::<ConsumerRequest>::new(frames);
                    let outbound = MessageSink {
                        writer: writer.clone(),
                    };
                    let outcome = serve_consume(&token, inbound, outbound, handler).await;
                    status_for(&outcome)
                }
                None => Status::new(Code::Unimplemented, "consume endpoint is not enabled"),
            },
            Endpoint::Publish => match self.publish_handler() {
                Some(handler) => {
                    let inbound = FrameStream::<PublisherRequest>::new(frames);
                    let outbound = AckSink {
                        writer: writer.clone(),
                    };
                    let outcome = serve_publish(&token, inbound, outbound, handler).await;
                    status_for(&outcome)
                }
                None => Status::new(Code::Unimplemented, "publish endpoint is not enabled"),
            },
            Endpoint::Unspecified => Status::new(Code::InvalidArgument, "unknown endpoint"),
        };

        info!(endpoint = ?endpoint, code = ?status.code(), "session closed");

        // A client that already went away cannot receive its completion
        // frame; that is not a server fault.
        let completion = match endpoint {
            Endpoint::Publish => send_frame(
                &writer,
                &PublisherResponse {
                    reply: Some(publisher_response::Reply::Completion(status)),
                },
            )
            .await,
            _ => send_frame(
                &writer,
                &ConsumerResponse {
                    reply: Some(consumer_response::Reply::Completion(status)),
                },
            )
            .await,
        };
        if let Err(e) = completion {
            debug!(error = %e, "completion frame not delivered");
        }
        Ok(())
    }

    fn consume_handler(&self) -> Option<Arc<dyn ConsumeHandler>> {
        if !self.config.endpoint_enabled(EndpointKind::Consume) {
            return None;
        }
        self.consume.clone()
    }

    fn publish_handler(&self) -> Option<Arc<dyn PublishHandler>> {
        if !self.config.endpoint_enabled(EndpointKind::Publish) {
            return None;
        }
        self.publish.clone()
    }
}
