//! Contention walkthrough
//!
//! Two tasks write the same object. The second fails to commit, the
//! scheduler asks the access coordinator who it collided with, waits for
//! that transaction to finish and retries.
//!
//! Run with: cargo run --bin contention_demo

use parking_lot::Mutex;
use sgs_kernel::{
    description, AccessCoordinator, AccessReporter, AccessType, AccessedObjectsDetail,
    AccessedObjectsListener, KernelResult, Participant, ParticipantError, PrepareOutcome,
    Transaction, TransactionCoordinator, TransactionCoordinatorConfig, TransactionId,
    TransactionParticipant,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Durable store with first-writer-wins object locks
struct DataStore {
    reporter: AccessReporter,
    owners: Mutex<HashMap<String, TransactionId>>,
    pending: Mutex<HashMap<TransactionId, Vec<(String, i64)>>>,
    values: Mutex<HashMap<String, i64>>,
}

impl DataStore {
    fn new(access: &AccessCoordinator) -> KernelResult<Arc<Self>> {
        Ok(Arc::new(Self {
            reporter: access.register_contention_source("DataService")?,
            owners: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            values: Mutex::new(HashMap::new()),
        }))
    }

    fn write(self: &Arc<Self>, txn: &Arc<Transaction>, name: &str, value: i64) -> KernelResult<()> {
        self.reporter.report_object_access_in_with(
            txn,
            name,
            AccessType::Write,
            description(format!("value {}", value)),
        )?;
        txn.join(Participant::durable(self.clone()))?;

        self.owners
            .lock()
            .entry(name.to_string())
            .or_insert(txn.id());
        self.pending
            .lock()
            .entry(txn.id())
            .or_default()
            .push((name.to_string(), value));
        Ok(())
    }

    fn value(&self, name: &str) -> Option<i64> {
        self.values.lock().get(name).copied()
    }

    fn release(&self, id: TransactionId) -> Vec<(String, i64)> {
        self.owners.lock().retain(|_, owner| *owner != id);
        self.pending.lock().remove(&id).unwrap_or_default()
    }
}

impl TransactionParticipant for DataStore {
    fn prepare(&self, txn: &Transaction) -> Result<PrepareOutcome, ParticipantError> {
        let owners = self.owners.lock();
        let pending = self.pending.lock();
        let writes = pending.get(&txn.id()).map(Vec::as_slice).unwrap_or_default();
        for (name, _) in writes {
            match owners.get(name) {
                Some(owner) if *owner != txn.id() => {
                    return Ok(PrepareOutcome::conflict(format!(
                        "{} is locked by transaction {}",
                        name, owner
                    )));
                }
                _ => {}
            }
        }
        Ok(PrepareOutcome::Prepared {
            read_only: writes.is_empty(),
        })
    }

    fn commit(&self, txn: &Transaction) -> Result<(), ParticipantError> {
        let writes = self.release(txn.id());
        self.values.lock().extend(writes);
        Ok(())
    }

    fn prepare_and_commit(&self, txn: &Transaction) -> Result<PrepareOutcome, ParticipantError> {
        let outcome = self.prepare(txn)?;
        if matches!(outcome, PrepareOutcome::Prepared { .. }) {
            self.commit(txn)?;
        }
        Ok(outcome)
    }

    fn abort(&self, txn: &Transaction) -> Result<(), ParticipantError> {
        self.release(txn.id());
        Ok(())
    }

    fn type_name(&self) -> &str {
        "DataStore"
    }
}

/// Prints the access detail of each finished transaction
struct Profiler;

impl AccessedObjectsListener for Profiler {
    fn transaction_finished(&self, detail: &AccessedObjectsDetail) {
        print!(
            "  [profile] txn {} conflict={}",
            detail.transaction_id(),
            detail.conflict_type()
        );
        if let Some(other) = detail.conflicting_id() {
            print!(" with txn {}", other);
        }
        println!();
        for object in detail.accessed_objects() {
            println!("    {}", object);
        }
    }
}

fn main() -> KernelResult<()> {
    println!("=== CONTENTION DEMO ===\n");

    let txns = TransactionCoordinator::new(TransactionCoordinatorConfig {
        timeout_ms: 5_000,
        ..Default::default()
    })?;
    let access = AccessCoordinator::default();
    access.add_listener(Arc::new(Profiler));
    let store = DataStore::new(&access)?;

    let t1 = txns.create_transaction();
    store.write(t1.transaction(), "room-42", 1)?;
    println!("txn {} wrote room-42 = 1 (not yet committed)", t1.id());

    let t2 = txns.create_transaction();
    store.write(t2.transaction(), "room-42", 2)?;
    println!("txn {} wrote room-42 = 2", t2.id());

    match t2.commit() {
        Ok(()) => println!("txn {} committed", t2.id()),
        Err(e) => {
            println!("txn {} failed: {}", t2.id(), e);
            println!("  retryable: {}", e.should_retry());
            match access.get_conflicting_transaction(t2.transaction()) {
                Some(other) => println!("  conflicting transaction: {}", other.id()),
                None => println!("  conflicting transaction: unknown"),
            }
        }
    }

    t1.commit()?;
    println!("txn {} committed", t1.id());

    let retry = txns.create_transaction();
    store.write(retry.transaction(), "room-42", 2)?;
    retry.commit()?;
    println!("txn {} (retry) committed", retry.id());

    println!();
    println!("room-42 = {:?}", store.value("room-42"));
    println!(
        "holders of room-42: {:?}",
        access.holders("DataService", "room-42")
    );
    println!("transactions created: {}", txns.transactions_created());
    Ok(())
}
