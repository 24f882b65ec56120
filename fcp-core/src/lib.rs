//! Freenet Client Protocol core: message model, wire framing, status rules, URIs.
//! Sans-IO: no sockets or threads; the client crate drives these types.

pub mod message;
pub mod status;
pub mod uri;
pub mod wire;

pub use message::{FieldError, Fields, Message, HANDSHAKE_IDENTIFIER};
pub use status::{Status, MAX_RETRIES};
pub use uri::{FreenetUri, UriError};
pub use wire::{encode, read_message, write_message, WireError, MAX_PAYLOAD_LEN};
