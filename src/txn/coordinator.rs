use super::{context, ContextGuard, Transaction};
use crate::config::TransactionCoordinatorConfig;
use crate::error::KernelResult;
use crate::types::TransactionId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Creates transactions and hands out the only way to commit them.
pub struct TransactionCoordinator {
    config: TransactionCoordinatorConfig,
    /// Next transaction id
    next_id: AtomicU64,
}

impl TransactionCoordinator {
    /// Create a coordinator, validating the config
    pub fn new(config: TransactionCoordinatorConfig) -> KernelResult<Self> {
        config.validate()?;
        log::info!(
            "Transaction coordinator: timeout={}ms, unbounded_timeout={}ms, prepare_and_commit_opt={}",
            config.timeout_ms,
            config.unbounded_timeout_ms,
            !config.disable_prepare_and_commit_opt
        );
        Ok(Self {
            config,
            next_id: AtomicU64::new(1),
        })
    }

    /// Coordinator configuration
    pub fn config(&self) -> &TransactionCoordinatorConfig {
        &self.config
    }

    /// Creates a transaction with the bounded timeout
    pub fn create_transaction(&self) -> TransactionHandle {
        self.create_transaction_with(false)
    }

    /// Creates a transaction with the unbounded timeout
    pub fn create_unbounded_transaction(&self) -> TransactionHandle {
        self.create_transaction_with(true)
    }

    /// Creates a transaction with the bounded or unbounded timeout
    pub fn create_transaction_with(&self, unbounded: bool) -> TransactionHandle {
        let id = TransactionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let timeout = if unbounded {
            self.config.unbounded_timeout()
        } else {
            self.config.bounded_timeout()
        };
        TransactionHandle::new(Transaction::new(
            id,
            timeout,
            self.config.disable_prepare_and_commit_opt,
        ))
    }

    /// Number of transactions created so far
    pub fn transactions_created(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed) - 1
    }
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self {
            config: TransactionCoordinatorConfig::default(),
            next_id: AtomicU64::new(1),
        }
    }
}

/// Owner-side handle of a transaction.
///
/// The transaction itself can be shared freely with participants and
/// services; committing requires the handle.
#[derive(Debug)]
pub struct TransactionHandle {
    txn: Arc<Transaction>,
}

impl TransactionHandle {
    fn new(txn: Transaction) -> Self {
        Self { txn: Arc::new(txn) }
    }

    /// The transaction, for joining participants and reporting accesses
    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.txn
    }

    /// Transaction identifier
    pub fn id(&self) -> TransactionId {
        self.txn.id()
    }

    /// Transaction time budget
    pub fn timeout(&self) -> Duration {
        self.txn.timeout()
    }

    /// Whether the transaction is still active
    pub fn is_active(&self) -> bool {
        self.txn.is_active()
    }

    /// Installs the transaction as current on this thread
    pub fn enter(&self) -> ContextGuard {
        context::enter(self.txn.clone())
    }

    /// Runs the commit protocol
    pub fn commit(&self) -> KernelResult<()> {
        self.txn.commit()
    }
}
