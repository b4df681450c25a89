//! Current-transaction context
//!
//! Task code runs with its transaction installed on the executing thread so
//! that services can report accesses without threading the transaction
//! through every call.

use super::Transaction;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Option<Arc<Transaction>>> = const { RefCell::new(None) };
}

/// The transaction installed on this thread, if any
pub fn current_transaction() -> Option<Arc<Transaction>> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Installs `txn` as the current transaction until the guard is dropped.
pub fn enter(txn: Arc<Transaction>) -> ContextGuard {
    let previous = CURRENT.with(|current| current.borrow_mut().replace(txn));
    ContextGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// Restores the previous context on drop. Bound to the thread that created it.
pub struct ContextGuard {
    previous: Option<Arc<Transaction>>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}
