//! Error taxonomy. Connection and protocol errors are fatal to the engine;
//! request failures and timeouts are local to one record.

use fcp_core::{FieldError, Message, WireError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport unreachable, closed unexpectedly, or the node rejected the
    /// client name. Terminates the engine and is surfaced to every blocked
    /// caller and to any later operation on the dead client.
    #[error("connection error: {0}")]
    Connection(String),
    /// Malformed frame or unexpected wire content. Fatal to the connection.
    #[error("protocol error: {0}")]
    Protocol(#[from] WireError),
    /// The node reported a failure for this request.
    #[error("request failed (code {code}): {description}")]
    RequestFailed {
        code: String,
        description: String,
        extra: String,
        fatal: bool,
    },
    /// The record's deadline elapsed before a terminal response.
    #[error("request timed out")]
    Timeout,
    /// The client has shut down; no further operations are possible.
    #[error("client is closed")]
    Closed,
}

impl From<FieldError> for Error {
    fn from(e: FieldError) -> Self {
        Error::Protocol(WireError::Field(e))
    }
}

impl Error {
    /// Build the structured failure a reply like `GetFailed` or `PutFailed`
    /// describes.
    pub(crate) fn request_failed(reply: &Message) -> Self {
        Error::RequestFailed {
            code: reply.field("Code").unwrap_or_default().to_string(),
            description: reply.field("CodeDescription").unwrap_or_default().to_string(),
            extra: reply.field("ExtraDescription").unwrap_or_default().to_string(),
            fatal: reply.field("Fatal") == Some("true"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_failed_copies_remote_fields() {
        let mut reply = Message::new("GetFailed");
        reply.fields_mut().insert("Code", "301").unwrap();
        reply
            .fields_mut()
            .insert("CodeDescription", "Not found")
            .unwrap();
        reply.fields_mut().insert("Fatal", "true").unwrap();
        match Error::request_failed(&reply) {
            Error::RequestFailed {
                code,
                description,
                extra,
                fatal,
            } => {
                assert_eq!(code, "301");
                assert_eq!(description, "Not found");
                assert_eq!(extra, "");
                assert!(fatal);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
