//! Wire types for the gateway protocol.
//!
//! One session is one bidirectional stream of length-delimited protobuf
//! frames. The client's first frame is a [`CallHeader`] selecting the RPC
//! surface; every following client frame is an envelope union
//! ([`ConsumerRequest`] or [`PublisherRequest`]) carrying exactly one
//! variant. Server frames are the matching response envelopes, ending with
//! a terminal [`Status`] in the `completion` slot.
//!
//! The message types are written by hand with prost derives; field numbers
//! are part of the wire contract and must not be reassigned.

use std::collections::HashMap;

/// Initial position for a new consumer session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Offset {
    /// No explicit preference; the backend's default applies.
    Default = 0,
    /// Only messages published after the session began.
    Newest = 1,
    /// Replay from the beginning of the retained log.
    Oldest = 2,
    /// Start from `StartConsumeRequest::explicit_offset`.
    Explicit = 3,
}

/// Handshake envelope for the consume direction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartConsumeRequest {
    #[prost(string, tag = "1")]
    pub topic: String,
    /// Consumer identity; backends use it as the durable group name.
    #[prost(string, tag = "2")]
    pub consumer: String,
    #[prost(enumeration = "Offset", tag = "3")]
    pub initial_offset: i32,
    /// Only meaningful when `initial_offset` is [`Offset::Explicit`].
    #[prost(uint64, tag = "4")]
    pub explicit_offset: u64,
}

/// Acknowledgement correlating to a previously delivered message id.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Confirmation {
    #[prost(string, tag = "1")]
    pub msg_id: String,
}

/// An opaque payload with its correlation id.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(map = "string, string", tag = "3")]
    pub metadata: HashMap<String, String>,
}

/// Client-to-server envelope for the consume direction.
///
/// A decoded envelope with `variant == None` is a protocol violation; the
/// bridge rejects it rather than skipping it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConsumerRequest {
    #[prost(oneof = "consumer_request::Variant", tags = "2, 3")]
    pub variant: Option<consumer_request::Variant>,
}

pub mod consumer_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Variant {
        #[prost(message, tag = "2")]
        StartRequest(super::StartConsumeRequest),
        #[prost(message, tag = "3")]
        Confirmation(super::Confirmation),
    }
}

/// Handshake envelope for the publish direction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartPublishRequest {
    #[prost(string, tag = "1")]
    pub topic: String,
}

/// Client-to-server envelope for the publish direction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PublisherRequest {
    #[prost(oneof = "publisher_request::Variant", tags = "2, 3")]
    pub variant: Option<publisher_request::Variant>,
}

pub mod publisher_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Variant {
        #[prost(message, tag = "2")]
        StartRequest(super::StartPublishRequest),
        #[prost(message, tag = "3")]
        Msg(super::Message),
    }
}

/// Server-to-client envelope for the consume direction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConsumerResponse {
    #[prost(oneof = "consumer_response::Reply", tags = "1, 2")]
    pub reply: Option<consumer_response::Reply>,
}

pub mod consumer_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Reply {
        #[prost(message, tag = "1")]
        Msg(super::Message),
        /// Terminal status; the stream closes after this frame.
        #[prost(message, tag = "2")]
        Completion(super::Status),
    }
}

/// Server-to-client envelope for the publish direction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PublisherResponse {
    #[prost(oneof = "publisher_response::Reply", tags = "1, 2")]
    pub reply: Option<publisher_response::Reply>,
}

pub mod publisher_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Reply {
        #[prost(message, tag = "1")]
        Confirmation(super::Confirmation),
        /// Terminal status; the stream closes after this frame.
        #[prost(message, tag = "2")]
        Completion(super::Status),
    }
}

/// Terminal status codes, numbered to match the gRPC convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Code {
    Ok = 0,
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    Unimplemented = 12,
    Internal = 13,
}

/// Terminal result of a session, sent as the last server frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
    // Encoded as a plain varint so the prost derive does not generate a
    // `code()` getter; the hand-written accessor below decodes with an
    // explicit `Code::Unknown` fallback.
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

impl Status {
    /// Build a status from a code and message.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
        }
    }

    /// Successful completion.
    pub fn ok() -> Self {
        Self::new(Code::Ok, "")
    }

    /// The decoded code, falling back to [`Code::Unknown`] for values this
    /// build does not know about.
    pub fn code(&self) -> Code {
        Code::try_from(self.code).unwrap_or(Code::Unknown)
    }
}

/// RPC surfaces a connection can select.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Endpoint {
    Unspecified = 0,
    Consume = 1,
    Publish = 2,
}

/// First client frame of every connection.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallHeader {
    #[prost(enumeration = "Endpoint", tag = "1")]
    pub endpoint: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    #[test]
    fn test_consumer_request_roundtrip() {
        let request = ConsumerRequest {
            variant: Some(consumer_request::Variant::StartRequest(
                StartConsumeRequest {
                    topic: "orders".to_string(),
                    consumer: "c1".to_string(),
                    initial_offset: Offset::Oldest as i32,
                    explicit_offset: 0,
                },
            )),
        };

        let bytes = request.encode_to_vec();
        let decoded = ConsumerRequest::decode(&bytes[..]).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_empty_envelope_decodes_to_no_variant() {
        // A frame with no recognized field is not a decode error; it is a
        // protocol violation the bridge must reject explicitly.
        let decoded = ConsumerRequest::decode(&[][..]).unwrap();
        assert!(decoded.variant.is_none());

        let decoded = PublisherRequest::decode(&[][..]).unwrap();
        assert!(decoded.variant.is_none());
    }

    #[test]
    fn test_status_code_fallback() {
        let status = Status {
            code: 999,
            message: "from the future".to_string(),
        };
        assert_eq!(status.code(), Code::Unknown);
        assert_eq!(Status::ok().code(), Code::Ok);
    }

    #[test]
    fn test_completion_frame_roundtrip() {
        let response = ConsumerResponse {
            reply: Some(consumer_response::Reply::Completion(Status::new(
                Code::InvalidArgument,
                "invalid confirmation",
            ))),
        };

        let bytes = response.encode_to_vec();
        let decoded = ConsumerResponse::decode(&bytes[..]).unwrap();
        assert_eq!(decoded, response);
    }
}
