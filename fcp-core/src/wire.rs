//! Wire framing: UTF-8 text lines terminated by `\n`.
//!
//! A message is a type line, zero or more `Key=Value` lines, then either an
//! `EndMessage` (or `End`) terminator, or a `DataLength=<N>` field followed
//! by a `Data` line and exactly N raw payload bytes with no trailing
//! delimiter. `DataLength` is derived from the payload on encode and
//! stripped again on decode, so encode/decode round-trips exactly.

use std::io::{BufRead, Read, Write};

use crate::message::{FieldError, Fields, Message};

/// Upper bound on a declared payload. `DataLength` comes from the peer and
/// sizes an allocation, so it is sanity-checked before any memory is
/// reserved.
pub const MAX_PAYLOAD_LEN: usize = 256 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream closed mid-frame")]
    UnexpectedEof,
    #[error("missing or invalid DataLength before Data")]
    BadDataLength,
    #[error("declared payload of {0} bytes exceeds the frame limit")]
    OversizedPayload(usize),
    #[error("unexpected bare line: {0:?}")]
    UnexpectedLine(String),
    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Serialize one message. Field validation happens at insertion time, so
/// this cannot fail.
pub fn encode(message: &Message) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(message.kind().as_bytes());
    out.push(b'\n');
    for (key, value) in message.fields().iter() {
        out.extend_from_slice(key.as_bytes());
        out.push(b'=');
        out.extend_from_slice(value.as_bytes());
        out.push(b'\n');
    }
    match message.payload() {
        Some(payload) => {
            out.extend_from_slice(format!("DataLength={}\n", payload.len()).as_bytes());
            out.extend_from_slice(b"Data\n");
            out.extend_from_slice(payload);
        }
        None => out.extend_from_slice(b"EndMessage\n"),
    }
    out
}

/// Write one message to a stream and flush it.
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<(), WireError> {
    writer.write_all(&encode(message))?;
    writer.flush()?;
    Ok(())
}

/// Read exactly one message. Blank lines before the type line are tolerated
/// (some peers separate messages with one); a bare line after the type is a
/// framing error, as is a stream that ends mid-frame.
pub fn read_message<R: BufRead>(reader: &mut R) -> Result<Message, WireError> {
    let mut kind: Option<String> = None;
    let mut fields = Fields::new();
    loop {
        let line = read_line(reader)?;
        if line.is_empty() && kind.is_none() {
            continue;
        }
        match line.as_str() {
            "End" | "EndMessage" => break,
            "Data" => {
                let length: usize = fields
                    .remove("DataLength")
                    .and_then(|v| v.parse().ok())
                    .ok_or(WireError::BadDataLength)?;
                if length > MAX_PAYLOAD_LEN {
                    return Err(WireError::OversizedPayload(length));
                }
                let mut payload = vec![0u8; length];
                reader
                    .read_exact(&mut payload)
                    .map_err(|_| WireError::UnexpectedEof)?;
                let mut message =
                    Message::with_fields(kind.ok_or(WireError::UnexpectedLine("Data".into()))?, fields);
                message.set_payload(payload);
                return Ok(message);
            }
            _ => match line.split_once('=') {
                Some((key, value)) => fields.insert(key, value)?,
                None if kind.is_none() => kind = Some(line),
                None => return Err(WireError::UnexpectedLine(line)),
            },
        }
    }
    let kind = kind.ok_or(WireError::UnexpectedLine(String::new()))?;
    Ok(Message::with_fields(kind, fields))
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<String, WireError> {
    let mut line = String::new();
    let read = reader.read_line(&mut line)?;
    if read == 0 {
        return Err(WireError::UnexpectedEof);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}
