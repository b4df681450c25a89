//! Transaction state machine
//!
//! ```text
//! ACTIVE --join--> ACTIVE
//! ACTIVE --abort--> ABORTING --> ABORTED
//! ACTIVE --commit--> PREPARING
//! PREPARING --abort--> ABORTING --> ABORTED
//! PREPARING --all prepared--> COMMITTING --> COMMITTED
//! ```
//!
//! Non-durable participants are kept ahead of the durable one, so the
//! system of record is always the last voter and receives the collapsed
//! `prepare_and_commit` call.

use super::{Participant, PrepareOutcome, TransactionListener};
use crate::error::{AbortCause, KernelError, KernelResult};
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// State of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// In progress
    Active,
    /// Begun preparation
    Preparing,
    /// Begun aborting
    Aborting,
    /// Completed aborting
    Aborted,
    /// Begun committing
    Committing,
    /// Completed committing
    Committed,
}

impl TransactionState {
    /// Aborted or committed
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Aborted | TransactionState::Committed)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Active => "ACTIVE",
            TransactionState::Preparing => "PREPARING",
            TransactionState::Aborting => "ABORTING",
            TransactionState::Aborted => "ABORTED",
            TransactionState::Committing => "COMMITTING",
            TransactionState::Committed => "COMMITTED",
        };
        write!(f, "{}", name)
    }
}

/// One attempt to execute a task.
///
/// Only one thread drives a given transaction at a time; the locks here
/// publish its state to other threads (the conflict table reads the state
/// of every transaction it attributes a conflict to) and are never held
/// while a participant or listener runs.
pub struct Transaction {
    id: TransactionId,
    creation_time: SystemTime,
    started: Instant,
    timeout: Duration,
    disable_prepare_and_commit_opt: bool,
    state: Mutex<TransactionState>,
    participants: Mutex<Vec<Participant>>,
    listeners: Mutex<Vec<Arc<dyn TransactionListener>>>,
    abort_cause: Mutex<Option<AbortCause>>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        timeout: Duration,
        disable_prepare_and_commit_opt: bool,
    ) -> Self {
        let txn = Self {
            id,
            creation_time: SystemTime::now(),
            started: Instant::now(),
            timeout,
            disable_prepare_and_commit_opt,
            state: Mutex::new(TransactionState::Active),
            participants: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            abort_cause: Mutex::new(None),
        };
        log::trace!("create {}", txn);
        txn
    }

    /// Transaction identifier
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// The id in its external 8-byte big-endian form
    pub fn id_bytes(&self) -> [u8; 8] {
        self.id.to_bytes()
    }

    /// Wall-clock time the transaction was created
    pub fn creation_time(&self) -> SystemTime {
        self.creation_time
    }

    /// Time budget before `check_timeout` aborts the transaction
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time since the transaction was created
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Whether participants may still join
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Whether an abort has been requested
    pub fn is_aborted(&self) -> bool {
        self.abort_cause.lock().is_some()
    }

    /// Cause passed to the first `abort` call
    pub fn abort_cause(&self) -> Option<AbortCause> {
        self.abort_cause.lock().clone()
    }

    /// Snapshot of the joined participants in voting order
    pub fn participants(&self) -> Vec<Participant> {
        self.participants.lock().clone()
    }

    /// Whether a durable participant has joined
    pub fn has_durable_participant(&self) -> bool {
        self.participants.lock().iter().any(Participant::is_durable)
    }

    fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    fn not_active(&self, state: TransactionState) -> KernelError {
        KernelError::NotActive {
            id: self.id,
            state,
            cause: self.abort_cause(),
        }
    }

    fn aborted_error(&self) -> KernelError {
        KernelError::Aborted {
            id: self.id,
            cause: self
                .abort_cause()
                .unwrap_or_else(|| AbortCause::new("unknown cause")),
        }
    }

    /// Joins a participant to this transaction.
    ///
    /// Joining the same participant twice is a no-op. A second durable
    /// participant is rejected and leaves the participant list untouched.
    pub fn join(&self, participant: Participant) -> KernelResult<()> {
        log::trace!("join {} participant:{:?}", self, participant);

        let state = self.state.lock();
        if *state != TransactionState::Active {
            return Err(self.not_active(*state));
        }

        let mut participants = self.participants.lock();
        if participants.iter().any(|p| p.same_as(&participant)) {
            return Ok(());
        }

        let has_durable = participants.last().map_or(false, Participant::is_durable);
        if participant.is_durable() {
            if has_durable {
                return Err(KernelError::MultipleDurableParticipants { id: self.id });
            }
            participants.push(participant);
        } else if has_durable {
            // Keep the durable participant last
            let durable_idx = participants.len() - 1;
            participants.insert(durable_idx, participant);
        } else {
            participants.push(participant);
        }
        Ok(())
    }

    /// Registers a listener, ignoring one already registered.
    pub fn register_listener(&self, listener: Arc<dyn TransactionListener>) -> KernelResult<()> {
        let state = self.state.lock();
        if *state != TransactionState::Active {
            return Err(self.not_active(*state));
        }

        let mut listeners = self.listeners.lock();
        let known = listeners.iter().any(|l| {
            std::ptr::eq(
                Arc::as_ptr(l) as *const (),
                Arc::as_ptr(&listener) as *const (),
            )
        });
        if !known {
            listeners.push(listener);
        }
        Ok(())
    }

    /// Aborts the transaction.
    ///
    /// Repeated aborts are no-ops. Every participant is asked to abort even
    /// if an earlier one fails; those failures are logged.
    pub fn abort(&self, cause: impl Into<AbortCause>) -> KernelResult<()> {
        let cause = cause.into();
        log::debug!("abort {} cause:{}", self, cause);

        {
            let mut state = self.state.lock();
            match *state {
                TransactionState::Active | TransactionState::Preparing => {
                    *state = TransactionState::Aborting;
                }
                TransactionState::Aborting | TransactionState::Aborted => return Ok(()),
                TransactionState::Committing | TransactionState::Committed => {
                    return Err(self.not_active(*state));
                }
            }
        }

        self.abort_cause.lock().get_or_insert(cause);

        for participant in self.participants() {
            log::trace!("abort {} participant:{:?}", self, participant);
            if let Err(e) = participant.inner().abort(self) {
                log::warn!(
                    "abort {} participant:{:?} failed: {}",
                    self,
                    participant,
                    e
                );
            }
        }

        self.set_state(TransactionState::Aborted);
        self.notify_after_completion(false);
        Ok(())
    }

    /// Aborts with the timeout cause if the transaction has run too long.
    pub fn check_timeout(&self) -> KernelResult<()> {
        match self.state() {
            state @ (TransactionState::Aborted | TransactionState::Committed) => {
                return Err(self.not_active(state));
            }
            TransactionState::Aborting | TransactionState::Committing => return Ok(()),
            TransactionState::Active | TransactionState::Preparing => {}
        }

        let elapsed = self.elapsed();
        if elapsed > self.timeout {
            let err = KernelError::Timeout {
                id: self.id,
                elapsed,
                timeout: self.timeout,
            };
            self.abort(err.to_abort_cause())?;
            return Err(err);
        }
        Ok(())
    }

    /// Runs the commit protocol. Only reachable through the handle.
    pub(crate) fn commit(&self) -> KernelResult<()> {
        log::debug!("commit {}", self);

        match self.state() {
            TransactionState::Active => {}
            state => return Err(self.not_active(state)),
        }

        self.notify_before_completion()?;
        self.set_state(TransactionState::Preparing);

        let participants = self.participants();
        let last = participants.len().saturating_sub(1);
        for (idx, participant) in participants.iter().enumerate() {
            let separate_prepare = idx < last || self.disable_prepare_and_commit_opt;
            let vote = if separate_prepare {
                participant.inner().prepare(self)
            } else {
                participant.inner().prepare_and_commit(self)
            };

            match vote {
                Ok(PrepareOutcome::Prepared { read_only }) => {
                    log::trace!(
                        "{} {} participant:{:?} read_only:{}",
                        if separate_prepare { "prepare" } else { "prepare_and_commit" },
                        self,
                        participant,
                        read_only
                    );
                    if read_only || !separate_prepare {
                        self.drop_participant(participant);
                    }
                }
                Ok(PrepareOutcome::ConflictDetected { reason }) => {
                    let err = KernelError::Conflict {
                        id: self.id,
                        participant: participant.type_name().to_string(),
                        reason,
                    };
                    self.abort_after_failure(&err);
                    return Err(err);
                }
                Err(source) => {
                    let err = KernelError::PrepareFailed {
                        id: self.id,
                        participant: participant.type_name().to_string(),
                        source,
                    };
                    self.abort_after_failure(&err);
                    return Err(err);
                }
            }

            if self.state() == TransactionState::Aborted {
                return Err(self.aborted_error());
            }
        }

        self.set_state(TransactionState::Committing);

        let mut violation = None;
        for participant in self.participants() {
            log::trace!("commit {} participant:{:?}", self, participant);
            if let Err(source) = participant.inner().commit(self) {
                log::error!(
                    "commit {} participant:{:?} failed after voting to commit: {}",
                    self,
                    participant,
                    source
                );
                violation.get_or_insert(KernelError::CommitFailed {
                    id: self.id,
                    participant: participant.type_name().to_string(),
                    source,
                });
            }
        }

        self.set_state(TransactionState::Committed);
        self.notify_after_completion(true);

        match violation {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn drop_participant(&self, participant: &Participant) {
        self.participants
            .lock()
            .retain(|p| !p.same_as(participant));
    }

    fn abort_after_failure(&self, err: &KernelError) {
        if self.state() != TransactionState::Aborted {
            if let Err(e) = self.abort(err.to_abort_cause()) {
                log::warn!("abort {} after failure failed: {}", self, e);
            }
        }
    }

    fn notify_before_completion(&self) -> KernelResult<()> {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            if let Err(source) = listener.before_completion() {
                let err = KernelError::ListenerFailed {
                    id: self.id,
                    listener: listener.type_name().to_string(),
                    source,
                };
                self.abort_after_failure(&err);
                return Err(err);
            }
            if self.state() == TransactionState::Aborted {
                return Err(self.aborted_error());
            }
        }
        Ok(())
    }

    fn notify_after_completion(&self, committed: bool) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            if let Err(e) = listener.after_completion(committed) {
                log::warn!(
                    "after_completion {} listener:{} failed: {}",
                    self,
                    listener.type_name(),
                    e
                );
            }
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transaction {}

impl Hash for Transaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transaction[id:{}, timeout:{:?}]", self.id, self.timeout)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state.try_lock().map(|s| *s))
            .field("timeout", &self.timeout)
            .finish()
    }
}
