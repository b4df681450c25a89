//! Test doubles shared by the kernel's unit tests

use super::{PrepareOutcome, Transaction, TransactionListener, TransactionParticipant};
use crate::error::{AbortCause, ParticipantError};
use parking_lot::Mutex;
use std::sync::Arc;

pub(crate) type CallLog = Arc<Mutex<Vec<String>>>;

pub(crate) fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub(crate) fn calls(log: &CallLog) -> Vec<String> {
    log.lock().clone()
}

/// Participant that records every call as "<name>.<method>"
pub(crate) struct RecordingParticipant {
    name: &'static str,
    log: CallLog,
    outcome: PrepareOutcome,
    fail_prepare: bool,
    fail_commit: bool,
    fail_abort: bool,
    abort_in_prepare: bool,
}

impl RecordingParticipant {
    pub(crate) fn new(name: &'static str, log: &CallLog) -> Self {
        Self {
            name,
            log: log.clone(),
            outcome: PrepareOutcome::prepared(),
            fail_prepare: false,
            fail_commit: false,
            fail_abort: false,
            abort_in_prepare: false,
        }
    }

    pub(crate) fn read_only(mut self) -> Self {
        self.outcome = PrepareOutcome::read_only();
        self
    }

    pub(crate) fn conflicting(mut self, reason: &str) -> Self {
        self.outcome = PrepareOutcome::conflict(reason);
        self
    }

    pub(crate) fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub(crate) fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub(crate) fn failing_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    pub(crate) fn aborting_in_prepare(mut self) -> Self {
        self.abort_in_prepare = true;
        self
    }

    pub(crate) fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn record(&self, method: &str) {
        self.log.lock().push(format!("{}.{}", self.name, method));
    }

    fn vote(&self, txn: &Transaction) -> Result<PrepareOutcome, ParticipantError> {
        if self.abort_in_prepare {
            txn.abort(AbortCause::new("aborted by participant"))
                .map_err(|e| ParticipantError::failed(e.to_string()))?;
        }
        if self.fail_prepare {
            return Err(ParticipantError::failed(format!("{} prepare failed", self.name)));
        }
        Ok(self.outcome.clone())
    }
}

impl TransactionParticipant for RecordingParticipant {
    fn prepare(&self, txn: &Transaction) -> Result<PrepareOutcome, ParticipantError> {
        self.record("prepare");
        self.vote(txn)
    }

    fn commit(&self, _txn: &Transaction) -> Result<(), ParticipantError> {
        self.record("commit");
        if self.fail_commit {
            return Err(ParticipantError::failed(format!("{} commit failed", self.name)));
        }
        Ok(())
    }

    fn prepare_and_commit(&self, txn: &Transaction) -> Result<PrepareOutcome, ParticipantError> {
        self.record("prepare_and_commit");
        self.vote(txn)
    }

    fn abort(&self, _txn: &Transaction) -> Result<(), ParticipantError> {
        self.record("abort");
        if self.fail_abort {
            return Err(ParticipantError::failed(format!("{} abort failed", self.name)));
        }
        Ok(())
    }

    fn type_name(&self) -> &str {
        self.name
    }
}

/// Listener that records its callbacks, optionally vetoing completion
pub(crate) struct RecordingListener {
    name: &'static str,
    log: CallLog,
    veto: bool,
}

impl RecordingListener {
    pub(crate) fn new(name: &'static str, log: &CallLog, veto: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            log: log.clone(),
            veto,
        })
    }
}

impl TransactionListener for RecordingListener {
    fn before_completion(&self) -> Result<(), ParticipantError> {
        self.log.lock().push(format!("{}.before", self.name));
        if self.veto {
            return Err(ParticipantError::failed("vetoed"));
        }
        Ok(())
    }

    fn after_completion(&self, committed: bool) -> Result<(), ParticipantError> {
        self.log
            .lock()
            .push(format!("{}.after({})", self.name, committed));
        Ok(())
    }

    fn type_name(&self) -> &str {
        self.name
    }
}
