use super::coordinator::Shared;
use crate::error::{KernelError, KernelResult};
use crate::txn::{current_transaction, Transaction};
use crate::types::{AccessType, Description, ObjectId};
use std::fmt;
use std::sync::Arc;

/// Reports one source's object accesses to the access coordinator.
///
/// Accesses must be reported before the object is resolved. The plain
/// variants report against the transaction installed on the current
/// thread; the `_in` variants take the transaction explicitly.
#[derive(Clone)]
pub struct AccessReporter {
    source: Arc<str>,
    shared: Arc<Shared>,
}

fn current() -> KernelResult<Arc<Transaction>> {
    current_transaction().ok_or(KernelError::NoCurrentTransaction)
}

impl AccessReporter {
    pub(crate) fn new(source: Arc<str>, shared: Arc<Shared>) -> Self {
        Self { source, shared }
    }

    /// Name the source was registered under
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Report an access by the current transaction
    pub fn report_object_access(
        &self,
        object: impl Into<ObjectId>,
        access: AccessType,
    ) -> KernelResult<()> {
        self.report_object_access_in(&current()?, object, access)
    }

    /// Report an access by the current transaction, with a description
    pub fn report_object_access_with(
        &self,
        object: impl Into<ObjectId>,
        access: AccessType,
        description: Description,
    ) -> KernelResult<()> {
        self.report_object_access_in_with(&current()?, object, access, description)
    }

    /// Report an access by `txn`
    pub fn report_object_access_in(
        &self,
        txn: &Arc<Transaction>,
        object: impl Into<ObjectId>,
        access: AccessType,
    ) -> KernelResult<()> {
        self.shared
            .report(&self.source, txn, object.into(), access, None)
    }

    /// Report an access by `txn`, with a description
    pub fn report_object_access_in_with(
        &self,
        txn: &Arc<Transaction>,
        object: impl Into<ObjectId>,
        access: AccessType,
        description: Description,
    ) -> KernelResult<()> {
        self.shared
            .report(&self.source, txn, object.into(), access, Some(description))
    }

    /// Attach a description to an object that may not have been accessed
    /// yet. `None` keeps any existing description.
    pub fn set_object_description(
        &self,
        object: impl Into<ObjectId>,
        description: Option<Description>,
    ) -> KernelResult<()> {
        self.set_object_description_in(&current()?, object, description)
    }

    /// Attach a description to an object for `txn`
    pub fn set_object_description_in(
        &self,
        txn: &Arc<Transaction>,
        object: impl Into<ObjectId>,
        description: Option<Description>,
    ) -> KernelResult<()> {
        self.shared
            .describe(&self.source, txn, object.into(), description)
    }
}

impl fmt::Debug for AccessReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessReporter")
            .field("source", &self.source)
            .finish()
    }
}
