//! The request record: the lockable unit representing one in-flight
//! operation, plus identifier generation.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use sha2::{Digest, Sha256};

use fcp_core::{Message, Status, HANDSHAKE_IDENTIFIER};

use crate::error::Error;

/// Handler invoked once per status transition, off the engine thread.
/// Arguments are the derived status, the original record, and the reply.
pub type Callback = Box<dyn Fn(Status, &Request, &Message) + Send + Sync + 'static>;

/// One in-flight exchange. Created by the public API, registered and mutated
/// by the engine thread; synchronous callers block on [`Request::wait`].
pub struct Request {
    message: Message,
    identifier: String,
    created_at: Instant,
    deadline: Option<Instant>,
    load_only: bool,
    pub(crate) callback: Option<Callback>,
    state: Mutex<State>,
    wakeup: Condvar,
}

#[derive(Default)]
struct State {
    response: Option<Message>,
    status: Option<Status>,
    retries: u32,
    followed_up: bool,
    closed: Option<String>,
}

impl Request {
    /// Wrap an outbound message. A missing `Identifier` field is generated;
    /// handshake messages use the reserved identifier and never carry the
    /// field. An outbound `Timeout` parameter (seconds) is stripped and
    /// converted to a deadline.
    pub(crate) fn new(mut message: Message, callback: Option<Callback>, load_only: bool) -> Self {
        let identifier = if message.is_handshake() {
            message.fields_mut().remove("Identifier");
            HANDSHAKE_IDENTIFIER.to_string()
        } else {
            match message.identifier() {
                Some(id) => id.to_string(),
                None => {
                    let id = generate_identifier();
                    let _ = message.fields_mut().insert("Identifier", id.clone());
                    id
                }
            }
        };
        let created_at = Instant::now();
        let deadline = message
            .fields_mut()
            .remove("Timeout")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(|secs| created_at + Duration::from_secs_f64(secs));
        Request {
            message,
            identifier,
            created_at,
            deadline,
            load_only,
            callback,
            state: Mutex::new(State::default()),
            wakeup: Condvar::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn kind(&self) -> &str {
        self.message.kind()
    }

    /// The outbound message, as transmitted (identifier included, `Timeout`
    /// stripped).
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Registered for response matching but never transmitted.
    pub fn load_only(&self) -> bool {
        self.load_only
    }

    /// Transient-failure retries attempted so far.
    pub fn retries(&self) -> u32 {
        self.state.lock().retries
    }

    /// The most recently received reply, if any.
    pub fn response(&self) -> Option<Message> {
        self.state.lock().response.clone()
    }

    pub fn status(&self) -> Option<Status> {
        self.state.lock().status
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state.lock().status.is_some_and(Status::is_terminal)
    }

    /// The node keeps tracking this request after the connection ends.
    pub fn is_persistent(&self) -> bool {
        self.message.field("Persistence") == Some("forever")
    }

    /// Whether a `DataFound` reply should trigger the automatic status
    /// query (anything not scoped to this connection).
    pub(crate) fn wants_found_followup(&self) -> bool {
        self.message.field("Persistence") != Some("connection")
    }

    /// Block until a terminal status is posted, then return the successful
    /// reply or the structured failure. Released with a connection error if
    /// the engine dies or shuts down first.
    pub fn wait(&self) -> Result<Message, Error> {
        let mut state = self.state.lock();
        loop {
            // a terminal outcome that landed before the connection closed
            // still counts; the close only releases unresolved waiters
            if let Some(status) = state.status.filter(|s| s.is_terminal()) {
                return match (status, state.response.clone()) {
                    (Status::Finished, Some(reply)) => Ok(reply),
                    (_, Some(reply)) if status != Status::Timeout => {
                        Err(Error::request_failed(&reply))
                    }
                    _ => Err(Error::Timeout),
                };
            }
            if let Some(reason) = &state.closed {
                return Err(Error::Connection(reason.clone()));
            }
            self.wakeup.wait(&mut state);
        }
    }

    /// Engine thread only: set the response slot and derived status, waking
    /// any synchronous waiter under the record lock.
    pub(crate) fn post(&self, status: Option<Status>, reply: Message) {
        let mut state = self.state.lock();
        state.response = Some(reply);
        if let Some(status) = status {
            state.status = Some(status);
        }
        self.wakeup.notify_all();
    }

    /// Engine thread only: synthesize a timeout.
    pub(crate) fn post_timeout(&self) {
        let mut state = self.state.lock();
        state.status = Some(Status::Timeout);
        self.wakeup.notify_all();
    }

    /// Release any waiter with a connection-level failure.
    pub(crate) fn fail_closed(&self, reason: &str) {
        let mut state = self.state.lock();
        if state.closed.is_none() {
            state.closed = Some(reason.to_string());
        }
        self.wakeup.notify_all();
    }

    pub(crate) fn bump_retries(&self) -> u32 {
        let mut state = self.state.lock();
        state.retries += 1;
        state.retries
    }

    /// Returns true the first time only; the automatic `GetRequestStatus`
    /// after `DataFound` fires at most once per record lifetime.
    pub(crate) fn mark_followed_up(&self) -> bool {
        let mut state = self.state.lock();
        if state.followed_up {
            false
        } else {
            state.followed_up = true;
            true
        }
    }
}

/// Generate an identifier unique with overwhelming probability: a hash of
/// the current time at nanosecond resolution plus a random salt.
pub fn generate_identifier() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let salt: u64 = rand::random();
    let mut hasher = Sha256::new();
    hasher.update(nanos.to_le_bytes());
    hasher.update(salt.to_le_bytes());
    format!("FcpRequest-{}", hex(&hasher.finalize()[..12]))
}

/// Content-derived identifier, stable across runs for the same bytes.
pub fn content_identifier(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("FcpContent-{}", hex(&hasher.finalize()[..12]))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn get_message(identifier: Option<&str>) -> Message {
        let mut msg = Message::new("ClientGet");
        if let Some(id) = identifier {
            msg.fields_mut().insert("Identifier", id).unwrap();
        }
        msg.fields_mut().insert("URI", "KSK@gpl.txt").unwrap();
        msg
    }

    #[test]
    fn generated_identifiers_are_distinct() {
        let a = generate_identifier();
        let b = generate_identifier();
        assert_ne!(a, b);
        assert!(a.starts_with("FcpRequest-"));
    }

    #[test]
    fn content_identifier_is_stable() {
        assert_eq!(content_identifier(b"abc"), content_identifier(b"abc"));
        assert_ne!(content_identifier(b"abc"), content_identifier(b"abd"));
    }

    #[test]
    fn missing_identifier_is_generated_and_transmitted() {
        let record = Request::new(get_message(None), None, false);
        assert_eq!(
            record.message().field("Identifier"),
            Some(record.identifier())
        );
    }

    #[test]
    fn caller_identifier_is_kept() {
        let record = Request::new(get_message(Some("mine")), None, false);
        assert_eq!(record.identifier(), "mine");
    }

    #[test]
    fn handshake_uses_reserved_identifier_without_field() {
        let mut hello = Message::new("ClientHello");
        hello.fields_mut().insert("Name", "test").unwrap();
        let record = Request::new(hello, None, false);
        assert_eq!(record.identifier(), HANDSHAKE_IDENTIFIER);
        assert!(!record.message().fields().contains("Identifier"));
    }

    #[test]
    fn timeout_parameter_becomes_deadline_and_is_stripped() {
        let mut msg = get_message(None);
        msg.fields_mut().insert("Timeout", "30").unwrap();
        let record = Request::new(msg, None, false);
        assert!(record.deadline().is_some());
        assert!(!record.message().fields().contains("Timeout"));
    }

    #[test]
    fn wait_returns_reply_once_finished() {
        let record = Arc::new(Request::new(get_message(None), None, false));
        let poster = record.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            let mut reply = Message::new("AllData");
            reply.set_payload(b"hello".to_vec());
            poster.post(Some(Status::Finished), reply);
        });
        let reply = record.wait().unwrap();
        assert_eq!(reply.payload(), Some(&b"hello"[..]));
        handle.join().unwrap();
    }

    #[test]
    fn wait_surfaces_remote_failure() {
        let record = Arc::new(Request::new(get_message(None), None, false));
        let mut reply = Message::new("GetFailed");
        reply.fields_mut().insert("Code", "13").unwrap();
        reply.fields_mut().insert("Fatal", "true").unwrap();
        record.post(Some(Status::Failed), reply);
        match record.wait() {
            Err(Error::RequestFailed { code, fatal, .. }) => {
                assert_eq!(code, "13");
                assert!(fatal);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn wait_released_by_connection_close() {
        let record = Arc::new(Request::new(get_message(None), None, false));
        let closer = record.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            closer.fail_closed("node went away");
        });
        assert!(matches!(record.wait(), Err(Error::Connection(_))));
        handle.join().unwrap();
    }

    #[test]
    fn completed_record_outlives_connection_close() {
        let record = Request::new(get_message(None), None, false);
        let mut reply = Message::new("AllData");
        reply.set_payload(b"done".to_vec());
        record.post(Some(Status::Finished), reply);
        record.fail_closed("client closed");
        let reply = record.wait().unwrap();
        assert_eq!(reply.payload(), Some(&b"done"[..]));
    }

    #[test]
    fn followup_fires_once() {
        let record = Request::new(get_message(None), None, false);
        assert!(record.mark_followed_up());
        assert!(!record.mark_followed_up());
    }
}
