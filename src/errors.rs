//! Error taxonomy shared by every subsystem.
//!
//! Three categories, matching how the platform is allowed to react to a
//! failure: [`InputError`] is logged and reported to the peer, never fatal;
//! [`TransientError`] tears down one connection and lets the owning
//! subsystem recover; [`FatalError`] violates a durability invariant and
//! must abort the process rather than be propagated as a normal `Result`.

use std::fmt;
use thiserror::Error;

/// Malformed input, unknown routing target, or a stale view reference.
/// Always reported back to the peer (typed response or HTTP status);
/// never causes the process to stop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("message from past view {message_view}, current view is {current_view}")]
    PastView { message_view: u16, current_view: u16 },

    #[error("no log entry at logspace={logspace_id:#010x} seqnum={seqnum:#018x}")]
    MissingLogEntry { logspace_id: u32, seqnum: u64 },

    #[error("unknown full_call_id: {0:#018x}")]
    UnknownFullCallId(u64),
}

/// Peer disconnect or write failure on one connection. The connection is
/// closed and removed; calls it owned are discarded (gateway) or dropped
/// (engine — the gateway will time them out). Never propagates beyond the
/// connection that produced it.
#[derive(Error, Debug)]
pub enum TransientError {
    #[error("connection {0} closed by peer")]
    PeerClosed(u64),

    #[error("write failed on connection {0}: {1}")]
    WriteFailed(u64, std::io::Error),

    #[error("connect failed to {0}: {1}")]
    ConnectFailed(String, std::io::Error),
}

/// A durability invariant was about to be violated. There is no safe
/// continuation: the process aborts and a supervisor is expected to
/// restart it. Constructing one of these is itself the last thing a
/// subsystem does before calling [`FatalError::abort`].
#[derive(Error, Debug)]
pub enum FatalError {
    #[error("KV backend write failed for logspace={logspace_id:#010x}: {source}")]
    KvWriteFailed {
        logspace_id: u32,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("duplicate replication at logspace={logspace_id:#010x} seqnum={seqnum:#018x}")]
    DuplicateSeqnum { logspace_id: u32, seqnum: u64 },

    #[error("view regressed: current={current_view} incoming={incoming_view}")]
    ViewRegression { current_view: u16, incoming_view: u16 },

    #[error("contradictory metalog for logspace={logspace_id:#010x}: {message}")]
    ContradictoryMetalog { logspace_id: u32, message: String },
}

impl FatalError {
    /// Logs at `error` with full identifying context and aborts the
    /// process. There is intentionally no `Result`-returning variant:
    /// these conditions are defined in the spec as unrecoverable.
    pub fn abort(self) -> ! {
        tracing::error!(error = %self, "durability invariant violated, aborting");
        std::process::abort();
    }
}

/// Top-level error returned by subsystem entry points that can fail for any
/// of the three reasons above, for call sites that need to match on which
/// kind occurred without unwinding the process themselves (e.g. to turn an
/// `InputError` into an HTTP status).
#[derive(Debug)]
pub enum CoreError {
    Input(InputError),
    Transient(TransientError),
    Fatal(FatalError),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Input(e) => write!(f, "{e}"),
            CoreError::Transient(e) => write!(f, "{e}"),
            CoreError::Fatal(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<InputError> for CoreError {
    fn from(e: InputError) -> Self {
        CoreError::Input(e)
    }
}

impl From<TransientError> for CoreError {
    fn from(e: TransientError) -> Self {
        CoreError::Transient(e)
    }
}

impl From<FatalError> for CoreError {
    fn from(e: FatalError) -> Self {
        CoreError::Fatal(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_error_messages_carry_identifiers() {
        let err = InputError::PastView {
            message_view: 3,
            current_view: 5,
        };
        assert!(err.to_string().contains("past view 3"));
        assert!(err.to_string().contains("current view is 5"));
    }

    #[test]
    fn core_error_from_conversions_preserve_variant() {
        let err: CoreError = InputError::UnknownFunction("echo".into()).into();
        assert!(matches!(err, CoreError::Input(InputError::UnknownFunction(ref n)) if n == "echo"));

        let err: CoreError = FatalError::DuplicateSeqnum {
            logspace_id: 0x0001_0001,
            seqnum: 0x100,
        }
        .into();
        assert!(matches!(err, CoreError::Fatal(_)));
    }

    #[test]
    fn missing_log_entry_formats_identifiers_as_hex() {
        let err = InputError::MissingLogEntry {
            logspace_id: 0x0001_0001,
            seqnum: 0x100,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x00010001"));
        assert!(msg.contains("0x0000000000000100"));
    }
}
