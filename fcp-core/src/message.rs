//! FCP message model: a type line, ordered `Key=Value` fields, optional payload.

/// Reserved identifier for the handshake exchange. `ClientHello` carries no
/// `Identifier` field on the wire; `NodeHello` is routed back under this name.
pub const HANDSHAKE_IDENTIFIER: &str = "ClientHello";

const HANDSHAKE_KINDS: [&str; 2] = ["ClientHello", "NodeHello"];

/// A field block. Insertion order is preserved for wire output; duplicate
/// keys are rejected, as are keys and values the line framing cannot carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(Vec<(String, String)>);

#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("duplicate field: {0}")]
    Duplicate(String),
    #[error("field key {0:?} contains '=' or a newline")]
    InvalidKey(String),
    #[error("value for field {0} contains a newline")]
    InvalidValue(String),
}

impl Fields {
    pub fn new() -> Self {
        Fields(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// Append a field. Fails on a duplicate key or content that cannot be
    /// framed as a `Key=Value` line.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), FieldError> {
        let key = key.into();
        let value = value.into();
        if key.contains('=') || key.contains('\n') || key.contains('\r') {
            return Err(FieldError::InvalidKey(key));
        }
        if value.contains('\n') || value.contains('\r') {
            return Err(FieldError::InvalidValue(key));
        }
        if self.contains(&key) {
            return Err(FieldError::Duplicate(key));
        }
        self.0.push((key, value));
        Ok(())
    }

    /// Remove a field and return its value, if present.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One protocol message, in either direction. Outbound messages are built by
/// the client crate; inbound ones come from the wire codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: String,
    fields: Fields,
    payload: Option<Vec<u8>>,
}

impl Message {
    pub fn new(kind: impl Into<String>) -> Self {
        Message {
            kind: kind.into(),
            fields: Fields::new(),
            payload: None,
        }
    }

    pub fn with_fields(kind: impl Into<String>, fields: Fields) -> Self {
        Message {
            kind: kind.into(),
            fields,
            payload: None,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key)
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = Some(payload);
    }

    pub fn is_handshake(&self) -> bool {
        HANDSHAKE_KINDS.contains(&self.kind.as_str())
    }

    /// The identifier this message correlates under. Handshake messages use
    /// the reserved identifier instead of a field.
    pub fn identifier(&self) -> Option<&str> {
        if self.is_handshake() {
            Some(HANDSHAKE_IDENTIFIER)
        } else {
            self.field("Identifier")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_preserve_insertion_order() {
        let mut fields = Fields::new();
        fields.insert("URI", "KSK@gpl.txt").unwrap();
        fields.insert("Verbosity", "1").unwrap();
        fields.insert("ReturnType", "direct").unwrap();
        let keys: Vec<&str> = fields.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["URI", "Verbosity", "ReturnType"]);
    }

    #[test]
    fn fields_reject_duplicates() {
        let mut fields = Fields::new();
        fields.insert("URI", "KSK@a").unwrap();
        assert!(matches!(
            fields.insert("URI", "KSK@b"),
            Err(FieldError::Duplicate(_))
        ));
        assert_eq!(fields.get("URI"), Some("KSK@a"));
    }

    #[test]
    fn fields_reject_unframeable_content() {
        let mut fields = Fields::new();
        assert!(matches!(
            fields.insert("Bad=Key", "x"),
            Err(FieldError::InvalidKey(_))
        ));
        assert!(matches!(
            fields.insert("Key", "line\nbreak"),
            Err(FieldError::InvalidValue(_))
        ));
    }

    #[test]
    fn handshake_messages_use_reserved_identifier() {
        let hello = Message::new("ClientHello");
        assert_eq!(hello.identifier(), Some(HANDSHAKE_IDENTIFIER));
        let mut node_hello = Message::new("NodeHello");
        node_hello.fields_mut().insert("Version", "Fred,0.7").unwrap();
        assert_eq!(node_hello.identifier(), Some(HANDSHAKE_IDENTIFIER));
    }

    #[test]
    fn identifier_comes_from_field_otherwise() {
        let mut msg = Message::new("ClientGet");
        assert_eq!(msg.identifier(), None);
        msg.fields_mut().insert("Identifier", "Req-1").unwrap();
        assert_eq!(msg.identifier(), Some("Req-1"));
    }
}
