//! Status derivation: maps inbound message types to the semantic state of
//! the originating request.

use crate::message::Message;

/// Hard limit on automatic retries for a transient failure.
pub const MAX_RETRIES: u32 = 5;

/// Failure codes the node reports for conditions worth retrying (remote
/// overloaded). The node forgets the identifier on failure, so the same one
/// can be reused for the retry.
const RETRY_WORTHY_CODES: [&str; 1] = ["15"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Queued on the remote node.
    Pending,
    /// Progress accounting update.
    Progress,
    /// Data located but not yet delivered.
    Found,
    /// Terminal success: data returned, insert confirmed, or keypair ready.
    Finished,
    /// The node supplied a redirect target; redirects are never followed
    /// automatically.
    Redirect,
    /// Transient failure; the engine is re-issuing the operation.
    Retrying,
    /// Terminal failure.
    Failed,
    /// The record's deadline elapsed before a terminal response.
    Timeout,
}

impl Status {
    /// True when no further deliveries are expected for the identifier.
    /// A redirect is terminal: the node drops the request after reporting it.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Finished | Status::Redirect | Status::Failed | Status::Timeout
        )
    }
}

/// Derive the status a reply implies for its request, given how many retries
/// have already run. Returns `None` for message types with no status meaning;
/// the response slot is still updated but no callback fires.
pub fn derive(reply: &Message, retries: u32) -> Option<Status> {
    match reply.kind() {
        "AllData" | "PutSuccessful" | "SSKKeypair" => Some(Status::Finished),
        "DataFound" => Some(Status::Found),
        "PersistentGet" | "PersistentPut" => Some(Status::Pending),
        "SimpleProgress" | "URIGenerated" => Some(Status::Progress),
        "ProtocolError" => Some(Status::Failed),
        "GetFailed" | "PutFailed" => Some(derive_failure(reply, retries)),
        _ => None,
    }
}

fn derive_failure(reply: &Message, retries: u32) -> Status {
    if reply.fields().contains("RedirectURI") {
        return Status::Redirect;
    }
    if reply.field("Fatal") == Some("false")
        && reply
            .field("Code")
            .is_some_and(|code| RETRY_WORTHY_CODES.contains(&code))
        && retries < MAX_RETRIES
    {
        return Status::Retrying;
    }
    Status::Failed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(kind: &str, fields: &[(&str, &str)]) -> Message {
        let mut msg = Message::new(kind);
        for (k, v) in fields {
            msg.fields_mut().insert(*k, *v).unwrap();
        }
        msg
    }

    #[test]
    fn terminal_successes() {
        for kind in ["AllData", "PutSuccessful", "SSKKeypair"] {
            assert_eq!(derive(&Message::new(kind), 0), Some(Status::Finished));
        }
    }

    #[test]
    fn redirect_wins_over_retry() {
        let reply = failure(
            "GetFailed",
            &[("RedirectURI", "KSK@elsewhere"), ("Fatal", "false"), ("Code", "15")],
        );
        assert_eq!(derive(&reply, 0), Some(Status::Redirect));
    }

    #[test]
    fn transient_failure_retries_until_limit() {
        let reply = failure("GetFailed", &[("Fatal", "false"), ("Code", "15")]);
        for retries in 0..MAX_RETRIES {
            assert_eq!(derive(&reply, retries), Some(Status::Retrying));
        }
        assert_eq!(derive(&reply, MAX_RETRIES), Some(Status::Failed));
    }

    #[test]
    fn fatal_failure_never_retries() {
        let reply = failure("GetFailed", &[("Fatal", "true"), ("Code", "15")]);
        assert_eq!(derive(&reply, 0), Some(Status::Failed));
    }

    #[test]
    fn non_retry_worthy_code_fails() {
        let reply = failure("PutFailed", &[("Fatal", "false"), ("Code", "9")]);
        assert_eq!(derive(&reply, 0), Some(Status::Failed));
    }

    #[test]
    fn unknown_kind_has_no_status() {
        assert_eq!(derive(&Message::new("FinishedCompression"), 0), None);
    }

    #[test]
    fn terminal_classification() {
        assert!(Status::Finished.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(Status::Redirect.is_terminal());
        assert!(Status::Timeout.is_terminal());
        assert!(!Status::Retrying.is_terminal());
        assert!(!Status::Found.is_terminal());
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::Progress.is_terminal());
    }
}
