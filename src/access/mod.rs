//! Access tracking and conflict attribution
//!
//! Services report which shared objects each transaction reads or writes.
//! Claims live in a sharded conflict table until the transaction finishes,
//! so a scheduler can ask which running transaction caused a contention
//! failure.

pub mod conflict_table;
pub mod coordinator;
pub mod detail;
pub mod reporter;

pub use conflict_table::{Claim, ConflictTable};
pub use coordinator::AccessCoordinator;
pub use detail::{AccessedObjectsDetail, AccessedObjectsListener, ConflictType};
pub use reporter::AccessReporter;
