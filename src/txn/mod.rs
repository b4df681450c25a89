//! Transactions and the two-phase commit protocol

pub mod context;
pub mod coordinator;
pub mod listener;
pub mod participant;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{current_transaction, enter, ContextGuard};
pub use coordinator::{TransactionCoordinator, TransactionHandle};
pub use listener::TransactionListener;
pub use participant::{Participant, PrepareOutcome, TransactionParticipant};
pub use transaction::{Transaction, TransactionState};
