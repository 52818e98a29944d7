//! Errors surfaced by the execution engine
use std::{error::Error, fmt::Display, path::PathBuf};

/// The error type for every fallible engine operation
///
/// Most variants are fatal to the session: the engine logs a diagnostic and
/// returns the error, and the host is expected to tear the process down. The
/// exceptions are the socket variants, which the processor handles in place,
/// and [`EngineError::StsHandshakeFailed`], which aborts the current program
/// only. [`EngineError::is_fatal`] encodes the policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineError {
    /// A required configuration input was absent
    ConfigMissing(&'static str),
    /// The protocol backend shared object could not be loaded
    BackendLoadFailure(String),
    /// A backend call returned a non-zero status
    BackendCallFailure {
        /// The ABI entry point that failed
        call: &'static str,
        /// The status it returned
        status: i32,
    },
    /// A per-party input file was absent at startup
    InputFileMissing(PathBuf),
    /// An input stream ran out of values
    InputFileExhausted {
        /// The input stream that ran dry
        stream: &'static str,
    },
    /// An opened value failed its MAC reconciliation
    MacVerificationFailed,
    /// A socket opcode referenced a client with no registered connection
    SocketUnconfigured {
        /// The client the opcode referenced
        client_id: i64,
    },
    /// I/O on an external client socket failed
    SocketIoFailed(String),
    /// The Station-to-Station key exchange did not complete
    StsHandshakeFailed(String),
    /// A multiply batch was issued with an odd operand count
    OddOperandCount {
        /// The number of gathered operands
        count: usize,
    },
    /// An opcode was malformed: bad register index, bad batch sequencing, or
    /// an operand shape the instruction cannot accept
    BadOpcodeShape(String),
    /// A persistence read referenced a file that does not exist yet
    PersistenceFileMissing(PathBuf),
    /// Reading or writing an engine-owned file failed
    FileIoFailed(String),
}

impl EngineError {
    /// Whether the session must be torn down after observing this error
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            EngineError::SocketUnconfigured { .. }
                | EngineError::SocketIoFailed(_)
                | EngineError::StsHandshakeFailed(_)
                | EngineError::PersistenceFileMissing(_)
        )
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::ConfigMissing(what) => write!(f, "missing configuration: {what}"),
            EngineError::BackendLoadFailure(e) => {
                write!(f, "failed to load protocol backend: {e}")
            },
            EngineError::BackendCallFailure { call, status } => {
                write!(f, "backend call {call} failed with status {status}")
            },
            EngineError::InputFileMissing(path) => {
                write!(f, "input file missing: {}", path.display())
            },
            EngineError::InputFileExhausted { stream } => {
                write!(f, "input stream {stream} exhausted")
            },
            EngineError::MacVerificationFailed => write!(f, "MAC verification failed"),
            EngineError::SocketUnconfigured { client_id } => {
                write!(f, "no socket connection exists for client id {client_id}")
            },
            EngineError::SocketIoFailed(e) => write!(f, "socket i/o failed: {e}"),
            EngineError::StsHandshakeFailed(e) => write!(f, "STS handshake failed: {e}"),
            EngineError::OddOperandCount { count } => {
                write!(f, "multiply batch with an odd number of operands: {count}")
            },
            EngineError::BadOpcodeShape(e) => write!(f, "malformed opcode: {e}"),
            EngineError::PersistenceFileMissing(path) => {
                write!(f, "persistence file missing: {}", path.display())
            },
            EngineError::FileIoFailed(e) => write!(f, "file i/o failed: {e}"),
        }
    }
}

impl Error for EngineError {}

#[cfg(test)]
mod test {
    use super::EngineError;

    /// The socket and handshake errors are recoverable, everything else tears
    /// the session down
    #[test]
    fn test_fatality_policy() {
        assert!(EngineError::ConfigMissing("SPDZ_EXT_LIB").is_fatal());
        assert!(EngineError::BackendCallFailure { call: "start_open", status: -1 }.is_fatal());
        assert!(EngineError::MacVerificationFailed.is_fatal());
        assert!(EngineError::OddOperandCount { count: 3 }.is_fatal());

        assert!(!EngineError::SocketUnconfigured { client_id: 4 }.is_fatal());
        assert!(!EngineError::SocketIoFailed("broken pipe".to_string()).is_fatal());
        assert!(!EngineError::StsHandshakeFailed("bad signature".to_string()).is_fatal());
    }
}
