//! Transactional execution kernel
//!
//! Every task runs inside a transaction. Participants (the data store,
//! caches, channel state) join the transaction and vote in a two-phase
//! commit; at most one of them is durable and it always votes last.
//! Services report the objects each transaction touches so that, when a
//! transaction fails on contention, the scheduler can find the transaction
//! it conflicted with.

pub mod access;
pub mod config;
pub mod error;
pub mod txn;
pub mod types;

pub use access::{
    AccessCoordinator, AccessReporter, AccessedObjectsDetail, AccessedObjectsListener,
    ConflictType,
};
pub use config::{AccessCoordinatorConfig, TransactionCoordinatorConfig};
pub use error::*;
pub use txn::{
    current_transaction, Participant, PrepareOutcome, Transaction, TransactionCoordinator,
    TransactionHandle, TransactionListener, TransactionParticipant, TransactionState,
};
pub use types::{
    description, AccessType, AccessedObject, Description, ObjectId, ObjectKey, TransactionId,
};
