use crate::txn::TransactionState;
use crate::types::TransactionId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Transaction {id} is not active: {state}{}", abort_suffix(.cause))]
    NotActive {
        id: TransactionId,
        state: TransactionState,
        /// Set when the transaction was aborted
        cause: Option<AbortCause>,
    },

    #[error("Transaction {id} has been aborted: {cause}")]
    Aborted { id: TransactionId, cause: AbortCause },

    #[error("Attempt to add multiple durable participants to transaction {id}")]
    MultipleDurableParticipants { id: TransactionId },

    #[error("Transaction {id} conflicted in participant {participant}: {reason}")]
    Conflict {
        id: TransactionId,
        participant: String,
        reason: String,
    },

    #[error("Prepare of transaction {id} failed in participant {participant}: {source}")]
    PrepareFailed {
        id: TransactionId,
        participant: String,
        #[source]
        source: ParticipantError,
    },

    #[error("Participant {participant} failed to commit prepared transaction {id}: {source}")]
    CommitFailed {
        id: TransactionId,
        participant: String,
        #[source]
        source: ParticipantError,
    },

    #[error("Listener {listener} vetoed completion of transaction {id}: {source}")]
    ListenerFailed {
        id: TransactionId,
        listener: String,
        #[source]
        source: ParticipantError,
    },

    #[error("Transaction {id} timed out after {elapsed:?} (timeout {timeout:?})")]
    Timeout {
        id: TransactionId,
        elapsed: Duration,
        timeout: Duration,
    },

    #[error("No transaction is active in the current context")]
    NoCurrentTransaction,

    #[error("Source already registered: {name}")]
    DuplicateSource { name: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl KernelError {
    /// Whether a scheduler may reasonably run the task again.
    pub fn should_retry(&self) -> bool {
        match self {
            KernelError::Conflict { .. } | KernelError::Timeout { .. } => true,
            KernelError::Aborted { cause, .. } => cause.retryable,
            _ => false,
        }
    }

    /// Whether the error indicates a defect in a participant or caller.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            KernelError::NotActive { .. }
                | KernelError::MultipleDurableParticipants { .. }
                | KernelError::CommitFailed { .. }
        )
    }

    /// Converts this error into the cause recorded on an aborted transaction.
    pub fn to_abort_cause(&self) -> AbortCause {
        AbortCause {
            message: self.to_string(),
            retryable: self.should_retry(),
        }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;

fn abort_suffix(cause: &Option<AbortCause>) -> String {
    match cause {
        Some(cause) => format!(" (aborted: {})", cause),
        None => String::new(),
    }
}

/// Error returned by participants and listeners.
#[derive(Error, Debug)]
pub enum ParticipantError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ParticipantError {
    pub fn failed(msg: impl Into<String>) -> Self {
        ParticipantError::Failed(msg.into())
    }
}

/// Why a transaction was aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortCause {
    pub message: String,
    pub retryable: bool,
}

impl AbortCause {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<&str> for AbortCause {
    fn from(message: &str) -> Self {
        AbortCause::new(message)
    }
}

impl From<String> for AbortCause {
    fn from(message: String) -> Self {
        AbortCause::new(message)
    }
}

impl From<&KernelError> for AbortCause {
    fn from(err: &KernelError) -> Self {
        err.to_abort_cause()
    }
}
