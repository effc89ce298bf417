//! Session outcome to wire status mapping.
//!
//! A client sees exactly one terminal [`Status`] per session. Protocol
//! violations become invalid-argument, cancellation stays a distinct
//! non-error class, backend failures pass through with their message
//! verbatim, and transport faults surface as internal errors.

use crate::bridge::SessionError;
use crate::wire::{Code, Status};

/// Map a resolved session onto its terminal wire status.
pub fn status_for(outcome: &Result<(), SessionError>) -> Status {
    match outcome {
        Ok(()) => Status::ok(),
        Err(e) => Status::new(code_for(e), e.to_string()),
    }
}

fn code_for(error: &SessionError) -> Code {
    match error {
        SessionError::ConsumeAlreadyStarted
        | SessionError::PublishAlreadyStarted
        | SessionError::InvalidConfirmation
        | SessionError::InvalidMessage
        | SessionError::InvalidRequest => Code::InvalidArgument,
        SessionError::Canceled => Code::Canceled,
        // Backend failures are opaque to the gateway; the message carries
        // whatever the handler reported.
        SessionError::Backend(_) => Code::Unknown,
        SessionError::Transport(_) => Code::Internal,
    }
}
