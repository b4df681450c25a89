//! Transaction participants
//!
//! A participant votes in the atomic-commit protocol. It is joined to a
//! transaction either as the (single) durable participant, the system of
//! record, or as one of any number of non-durable participants whose
//! state can be redone on retry.

use super::Transaction;
use crate::error::ParticipantError;
use std::fmt;
use std::sync::Arc;

/// Vote returned by `prepare` and `prepare_and_commit`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// Ready to commit. A read-only participant has nothing to commit and
    /// is not visited again.
    Prepared { read_only: bool },
    /// Another transaction holds a conflicting claim; nothing was prepared
    /// and the transaction must abort.
    ConflictDetected { reason: String },
}

impl PrepareOutcome {
    pub fn prepared() -> Self {
        PrepareOutcome::Prepared { read_only: false }
    }

    pub fn read_only() -> Self {
        PrepareOutcome::Prepared { read_only: true }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        PrepareOutcome::ConflictDetected {
            reason: reason.into(),
        }
    }
}

/// The two-phase commit capability.
///
/// `prepare_and_commit` is only called on the last participant and
/// collapses both phases into one call: `Prepared` means the work is
/// committed. `abort` may be called more than once and must ignore repeats.
pub trait TransactionParticipant: Send + Sync {
    fn prepare(&self, txn: &Transaction) -> Result<PrepareOutcome, ParticipantError>;

    fn commit(&self, txn: &Transaction) -> Result<(), ParticipantError>;

    fn prepare_and_commit(&self, txn: &Transaction) -> Result<PrepareOutcome, ParticipantError>;

    fn abort(&self, txn: &Transaction) -> Result<(), ParticipantError>;

    /// Name used in logs and errors
    fn type_name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A participant tagged with its durability
#[derive(Clone)]
pub enum Participant {
    Durable(Arc<dyn TransactionParticipant>),
    NonDurable(Arc<dyn TransactionParticipant>),
}

impl Participant {
    pub fn durable<P: TransactionParticipant + 'static>(participant: Arc<P>) -> Self {
        Participant::Durable(participant)
    }

    pub fn non_durable<P: TransactionParticipant + 'static>(participant: Arc<P>) -> Self {
        Participant::NonDurable(participant)
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, Participant::Durable(_))
    }

    pub fn inner(&self) -> &Arc<dyn TransactionParticipant> {
        match self {
            Participant::Durable(p) | Participant::NonDurable(p) => p,
        }
    }

    pub fn type_name(&self) -> &str {
        self.inner().type_name()
    }

    /// Identity comparison on the underlying participant object
    pub fn same_as(&self, other: &Participant) -> bool {
        std::ptr::eq(
            Arc::as_ptr(self.inner()) as *const (),
            Arc::as_ptr(other.inner()) as *const (),
        )
    }
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_durable() {
            "Durable"
        } else {
            "NonDurable"
        };
        write!(f, "{}({})", kind, self.type_name())
    }
}
