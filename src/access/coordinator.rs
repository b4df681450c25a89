//! Access Coordinator - Contention Source Registry and Claim Tracking
//!
//! Sources (services that touch shared objects) register once and receive
//! an `AccessReporter`. Every reported access is recorded against its
//! transaction and claimed in the conflict table. The coordinator joins
//! each tracked transaction as a non-durable participant, so the claims are
//! released when the transaction commits or aborts.

use super::conflict_table::ConflictTable;
use super::detail::{AccessedObjectsDetail, AccessedObjectsListener, ConflictType};
use super::reporter::AccessReporter;
use crate::config::AccessCoordinatorConfig;
use crate::error::{KernelError, KernelResult, ParticipantError};
use crate::txn::{
    Participant, PrepareOutcome, Transaction, TransactionParticipant, TransactionState,
};
use crate::types::{AccessType, Description, ObjectId, ObjectKey, TransactionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Registry of contention sources and owner of the conflict table
#[derive(Clone)]
pub struct AccessCoordinator {
    shared: Arc<Shared>,
}

/// Tracking state for one running transaction
struct TxnRecord {
    txn: Weak<Transaction>,
    detail: AccessedObjectsDetail,
    prepared: bool,
}

pub(crate) struct Shared {
    config: AccessCoordinatorConfig,
    /// Source name -> accesses reported
    sources: DashMap<Arc<str>, AtomicU64>,
    records: DashMap<TransactionId, TxnRecord>,
    table: ConflictTable,
    /// Details of recently finished transactions, oldest first
    backlog: Mutex<VecDeque<Arc<AccessedObjectsDetail>>>,
    listeners: RwLock<Vec<Arc<dyn AccessedObjectsListener>>>,
}

impl AccessCoordinator {
    /// Create an access coordinator, validating the config
    pub fn new(config: AccessCoordinatorConfig) -> KernelResult<Self> {
        config.validate()?;
        log::info!(
            "Access coordinator: backlog_size={}, num_shards={}",
            config.backlog_size,
            config.num_shards
        );
        Ok(Self::with_config(config))
    }

    fn with_config(config: AccessCoordinatorConfig) -> Self {
        let table = if config.num_shards == 0 {
            ConflictTable::new()
        } else {
            ConflictTable::with_shard_amount(config.num_shards)
        };
        let backlog = VecDeque::with_capacity(config.backlog_size);
        Self {
            shared: Arc::new(Shared {
                config,
                sources: DashMap::new(),
                records: DashMap::new(),
                table,
                backlog: Mutex::new(backlog),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Access coordinator configuration
    pub fn config(&self) -> &AccessCoordinatorConfig {
        &self.shared.config
    }

    /// Register a source of contention and get the reporter it reports
    /// accesses through. Each name may be registered once.
    pub fn register_contention_source(&self, name: &str) -> KernelResult<AccessReporter> {
        let source: Arc<str> = Arc::from(name);
        match self.shared.sources.entry(source.clone()) {
            Entry::Occupied(_) => {
                return Err(KernelError::DuplicateSource {
                    name: name.to_string(),
                })
            }
            Entry::Vacant(entry) => {
                entry.insert(AtomicU64::new(0));
            }
        }
        log::debug!("registered contention source {}", name);
        Ok(AccessReporter::new(source, self.shared.clone()))
    }

    /// Names of the registered sources
    pub fn sources(&self) -> Vec<String> {
        self.shared
            .sources
            .iter()
            .map(|entry| entry.key().to_string())
            .collect()
    }

    /// Accesses reported through `source` so far
    pub fn report_count(&self, source: &str) -> Option<u64> {
        self.shared
            .sources
            .get(source)
            .map(|count| count.load(Ordering::Relaxed))
    }

    /// Start tracking `txn` before its first access is reported
    pub fn notify_new_transaction(&self, txn: &Arc<Transaction>) -> KernelResult<()> {
        self.shared.track(txn)
    }

    /// Add a listener for the access detail of every finished transaction
    pub fn add_listener(&self, listener: Arc<dyn AccessedObjectsListener>) {
        self.shared.listeners.write().push(listener);
    }

    /// The running transaction, other than `txn`, holding a claim that
    /// conflicts with one of `txn`'s accesses.
    ///
    /// Works for a finished `txn` while its detail is in the backlog.
    pub fn get_conflicting_transaction(&self, txn: &Transaction) -> Option<Arc<Transaction>> {
        self.shared.conflicting_transaction(txn.id())
    }

    /// Running transactions claiming `object` of `source`
    pub fn holders(
        &self,
        source: &str,
        object: impl Into<ObjectId>,
    ) -> Vec<(TransactionId, AccessType)> {
        self.shared.table.holders(&ObjectKey::new(source, object))
    }

    /// Details kept for finished transactions, oldest first
    pub fn backlog(&self) -> Vec<Arc<AccessedObjectsDetail>> {
        self.shared.backlog.lock().iter().cloned().collect()
    }

    /// Backlog detail of finished transaction `id`
    pub fn finished_detail(&self, id: TransactionId) -> Option<Arc<AccessedObjectsDetail>> {
        self.shared.finished_detail(id)
    }

    /// Number of transactions currently tracked
    pub fn tracked_transactions(&self) -> usize {
        self.shared.records.len()
    }

    /// Number of objects with at least one claim
    pub fn claimed_objects(&self) -> usize {
        self.shared.table.len()
    }
}

impl Default for AccessCoordinator {
    fn default() -> Self {
        Self::with_config(AccessCoordinatorConfig::default())
    }
}

impl Shared {
    /// Join `txn` and create its record, unless already tracked
    fn track(self: &Arc<Self>, txn: &Arc<Transaction>) -> KernelResult<()> {
        let id = txn.id();
        if self.records.contains_key(&id) {
            return Ok(());
        }

        txn.join(Participant::non_durable(self.clone()))?;
        self.records.entry(id).or_insert_with(|| TxnRecord {
            txn: Arc::downgrade(txn),
            detail: AccessedObjectsDetail::new(id),
            prepared: false,
        });

        // Aborted by another thread between join and insert; the abort may
        // already have called finish, so the record would never be removed
        if txn.state() != TransactionState::Active {
            self.records.remove(&id);
            return Err(Self::not_active(txn));
        }

        log::trace!("tracking {}", txn);
        Ok(())
    }

    fn not_active(txn: &Transaction) -> KernelError {
        KernelError::NotActive {
            id: txn.id(),
            state: txn.state(),
            cause: txn.abort_cause(),
        }
    }

    pub(crate) fn report(
        self: &Arc<Self>,
        source: &Arc<str>,
        txn: &Arc<Transaction>,
        object: ObjectId,
        access: AccessType,
        description: Option<Description>,
    ) -> KernelResult<()> {
        if !txn.is_active() {
            return Err(Self::not_active(txn));
        }
        self.track(txn)?;

        let id = txn.id();
        let key = ObjectKey {
            source: source.clone(),
            object,
        };
        {
            let mut record = self
                .records
                .get_mut(&id)
                .ok_or_else(|| Self::not_active(txn))?;
            record.detail.record(&key, access);
            record.detail.set_description(&key, description);
        }

        self.table.insert(&key, txn, access);
        if !self.records.contains_key(&id) {
            // Finished while the claim was being inserted
            self.table.release(id, [&key]);
            return Err(Self::not_active(txn));
        }

        if let Some(count) = self.sources.get(source) {
            count.fetch_add(1, Ordering::Relaxed);
        }
        log::trace!("report txn:{} {} {}", id, access, key);
        Ok(())
    }

    pub(crate) fn describe(
        self: &Arc<Self>,
        source: &Arc<str>,
        txn: &Arc<Transaction>,
        object: ObjectId,
        description: Option<Description>,
    ) -> KernelResult<()> {
        if !txn.is_active() {
            return Err(Self::not_active(txn));
        }
        self.track(txn)?;

        let key = ObjectKey {
            source: source.clone(),
            object,
        };
        let mut record = self
            .records
            .get_mut(&txn.id())
            .ok_or_else(|| Self::not_active(txn))?;
        record.detail.set_description(&key, description);
        Ok(())
    }

    fn mark_prepared(&self, id: TransactionId) {
        if let Some(mut record) = self.records.get_mut(&id) {
            record.prepared = true;
        }
    }

    /// Stop tracking `id`: attribute a failure, release its claims and hand
    /// the detail to the backlog and listeners. Repeated calls are no-ops.
    fn finish(&self, id: TransactionId, committed: bool) {
        let Some((_, record)) = self.records.remove(&id) else {
            return;
        };
        let mut detail = record.detail;

        if !committed {
            let conflicting = self
                .find_live_conflict(id, &detail)
                .map(|txn| txn.id())
                .or_else(|| {
                    self.backlog
                        .lock()
                        .iter()
                        .rev()
                        .find(|old| detail.conflicts_with(old))
                        .map(|old| old.transaction_id())
                });
            match conflicting {
                Some(other) => detail.set_conflict(ConflictType::AccessNotGranted, Some(other)),
                None => detail.set_conflict(ConflictType::Unknown, None),
            }
        }

        let released = self.table.release(id, detail.keys().map(|(key, _)| key));
        log::debug!(
            "release txn:{} committed:{} prepared:{} claims:{} conflict:{}",
            id,
            committed,
            record.prepared,
            released,
            detail.conflict_type()
        );

        let detail = Arc::new(detail);
        if self.config.backlog_size > 0 {
            let mut backlog = self.backlog.lock();
            while backlog.len() >= self.config.backlog_size {
                backlog.pop_front();
            }
            backlog.push_back(detail.clone());
        }

        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.transaction_finished(&detail);
        }
    }

    fn find_live_conflict(
        &self,
        id: TransactionId,
        detail: &AccessedObjectsDetail,
    ) -> Option<Arc<Transaction>> {
        detail
            .keys()
            .find_map(|(key, access)| self.table.find_conflict(key, id, access))
    }

    fn finished_detail(&self, id: TransactionId) -> Option<Arc<AccessedObjectsDetail>> {
        self.backlog
            .lock()
            .iter()
            .rev()
            .find(|detail| detail.transaction_id() == id)
            .cloned()
    }

    fn live_transaction(&self, id: TransactionId) -> Option<Arc<Transaction>> {
        self.records
            .get(&id)
            .and_then(|record| record.txn.upgrade())
            .filter(|txn| !txn.state().is_terminal())
    }

    fn conflicting_transaction(&self, id: TransactionId) -> Option<Arc<Transaction>> {
        if let Some(record) = self.records.get(&id) {
            return self.find_live_conflict(id, &record.detail);
        }

        let detail = self.finished_detail(id)?;
        self.find_live_conflict(id, &detail).or_else(|| {
            detail
                .conflicting_id()
                .and_then(|other| self.live_transaction(other))
        })
    }
}

impl TransactionParticipant for Shared {
    fn prepare(&self, txn: &Transaction) -> Result<PrepareOutcome, ParticipantError> {
        self.mark_prepared(txn.id());
        Ok(PrepareOutcome::prepared())
    }

    fn commit(&self, txn: &Transaction) -> Result<(), ParticipantError> {
        self.finish(txn.id(), true);
        Ok(())
    }

    fn prepare_and_commit(&self, txn: &Transaction) -> Result<PrepareOutcome, ParticipantError> {
        self.finish(txn.id(), true);
        Ok(PrepareOutcome::prepared())
    }

    fn abort(&self, txn: &Transaction) -> Result<(), ParticipantError> {
        self.finish(txn.id(), false);
        Ok(())
    }

    fn type_name(&self) -> &str {
        "AccessCoordinator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransactionCoordinatorConfig;
    use crate::txn::testing::{calls, new_log, RecordingParticipant};
    use crate::txn::{TransactionCoordinator, TransactionState};
    use crate::types::description;
    use rayon::prelude::*;

    fn setup() -> (TransactionCoordinator, AccessCoordinator, AccessReporter) {
        let txns = TransactionCoordinator::new(TransactionCoordinatorConfig {
            timeout_ms: 10_000,
            ..Default::default()
        })
        .unwrap();
        let access = AccessCoordinator::default();
        let reporter = access.register_contention_source("DataService").unwrap();
        (txns, access, reporter)
    }

    struct CollectingListener {
        seen: Mutex<Vec<(TransactionId, ConflictType, Option<TransactionId>, usize)>>,
    }

    impl AccessedObjectsListener for CollectingListener {
        fn transaction_finished(&self, detail: &AccessedObjectsDetail) {
            self.seen.lock().push((
                detail.transaction_id(),
                detail.conflict_type(),
                detail.conflicting_id(),
                detail.len(),
            ));
        }
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let access = AccessCoordinator::default();
        access.register_contention_source("DataService").unwrap();
        access.register_contention_source("ChannelService").unwrap();

        let err = access.register_contention_source("DataService").unwrap_err();
        assert!(matches!(err, KernelError::DuplicateSource { .. }));
        assert_eq!(access.sources().len(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AccessCoordinatorConfig {
            num_shards: 3,
            ..Default::default()
        };
        assert!(AccessCoordinator::new(config).is_err());
    }

    #[test]
    fn test_report_without_context_fails() {
        let (_, _, reporter) = setup();
        let err = reporter
            .report_object_access("room-42", AccessType::Write)
            .unwrap_err();
        assert!(matches!(err, KernelError::NoCurrentTransaction));
    }

    #[test]
    fn test_report_on_finished_transaction_fails() {
        let (txns, access, reporter) = setup();
        let handle = txns.create_transaction();
        handle.commit().unwrap();

        let err = reporter
            .report_object_access_in(handle.transaction(), "room-42", AccessType::Read)
            .unwrap_err();
        assert!(matches!(err, KernelError::NotActive { .. }));
        assert_eq!(access.tracked_transactions(), 0);
    }

    #[test]
    fn test_report_through_context_joins_once() {
        let (txns, access, reporter) = setup();
        let handle = txns.create_transaction();
        {
            let _guard = handle.enter();
            reporter
                .report_object_access("room-42", AccessType::Read)
                .unwrap();
            reporter
                .report_object_access("room-42", AccessType::Write)
                .unwrap();
        }

        let participants = handle.transaction().participants();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].type_name(), "AccessCoordinator");
        assert!(!participants[0].is_durable());
        assert_eq!(
            access.holders("DataService", "room-42"),
            vec![(handle.id(), AccessType::Write)]
        );
        assert_eq!(access.report_count("DataService"), Some(2));
    }

    #[test]
    fn test_notify_new_transaction_is_idempotent() {
        let (txns, access, _) = setup();
        let handle = txns.create_transaction();
        access.notify_new_transaction(handle.transaction()).unwrap();
        access.notify_new_transaction(handle.transaction()).unwrap();
        assert_eq!(handle.transaction().participants().len(), 1);
        assert_eq!(access.tracked_transactions(), 1);

        handle.commit().unwrap();
        assert_eq!(access.tracked_transactions(), 0);
    }

    #[test]
    fn test_commit_releases_claims() {
        let (txns, access, reporter) = setup();
        let log = new_log();
        let handle = txns.create_transaction();
        let txn = handle.transaction();

        txn.join(Participant::non_durable(RecordingParticipant::new("C", &log).build()))
            .unwrap();
        txn.join(Participant::durable(RecordingParticipant::new("D", &log).build()))
            .unwrap();
        reporter
            .report_object_access_in(txn, "room-42", AccessType::Write)
            .unwrap();

        handle.commit().unwrap();

        assert_eq!(
            calls(&log),
            vec!["C.prepare", "D.prepare_and_commit", "C.commit"]
        );
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(access.holders("DataService", "room-42").is_empty());
        assert_eq!(access.claimed_objects(), 0);
        assert_eq!(
            access.finished_detail(handle.id()).unwrap().conflict_type(),
            ConflictType::None
        );
    }

    #[test]
    fn test_conflict_attribution() {
        let (txns, access, reporter) = setup();
        let log = new_log();

        let t1 = txns.create_transaction();
        reporter
            .report_object_access_in(t1.transaction(), "X", AccessType::Write)
            .unwrap();

        let t2 = txns.create_transaction();
        reporter
            .report_object_access_in(t2.transaction(), "X", AccessType::Write)
            .unwrap();
        assert_eq!(
            access
                .get_conflicting_transaction(t2.transaction())
                .map(|t| t.id()),
            Some(t1.id())
        );

        t2.transaction()
            .join(Participant::durable(
                RecordingParticipant::new("store", &log)
                    .conflicting("X is write-locked")
                    .build(),
            ))
            .unwrap();
        let err = t2.commit().unwrap_err();
        assert!(err.should_retry());

        let conflicting = access.get_conflicting_transaction(t2.transaction());
        assert_eq!(conflicting.map(|t| t.id()), Some(t1.id()));

        let detail = access.finished_detail(t2.id()).unwrap();
        assert_eq!(detail.conflict_type(), ConflictType::AccessNotGranted);
        assert_eq!(detail.conflicting_id(), Some(t1.id()));

        t1.commit().unwrap();
        assert!(access.get_conflicting_transaction(t2.transaction()).is_none());
    }

    #[test]
    fn test_readers_share() {
        let (txns, access, reporter) = setup();
        let t1 = txns.create_transaction();
        let t2 = txns.create_transaction();
        reporter
            .report_object_access_in(t1.transaction(), "X", AccessType::Read)
            .unwrap();
        reporter
            .report_object_access_in(t2.transaction(), "X", AccessType::Read)
            .unwrap();

        assert!(access.get_conflicting_transaction(t2.transaction()).is_none());
        assert_eq!(access.holders("DataService", "X").len(), 2);
    }

    #[test]
    fn test_sources_do_not_collide() {
        let (txns, access, data) = setup();
        let channels = access.register_contention_source("ChannelService").unwrap();
        let t1 = txns.create_transaction();
        let t2 = txns.create_transaction();
        data.report_object_access_in(t1.transaction(), "X", AccessType::Write)
            .unwrap();
        channels
            .report_object_access_in(t2.transaction(), "X", AccessType::Write)
            .unwrap();

        assert!(access.get_conflicting_transaction(t2.transaction()).is_none());
    }

    #[test]
    fn test_abort_attributed_to_backlog() {
        let (txns, access, reporter) = setup();
        let listener = Arc::new(CollectingListener {
            seen: Mutex::new(Vec::new()),
        });
        access.add_listener(listener.clone());

        let t1 = txns.create_transaction();
        reporter
            .report_object_access_in(t1.transaction(), "X", AccessType::Write)
            .unwrap();
        t1.commit().unwrap();

        let t2 = txns.create_transaction();
        reporter
            .report_object_access_in(t2.transaction(), "X", AccessType::Read)
            .unwrap();
        t2.transaction().abort("stale read").unwrap();

        let t3 = txns.create_transaction();
        reporter
            .report_object_access_in(t3.transaction(), "Y", AccessType::Write)
            .unwrap();
        t3.transaction().abort("gave up").unwrap();

        let seen = listener.seen.lock().clone();
        assert_eq!(
            seen,
            vec![
                (t1.id(), ConflictType::None, None, 1),
                (t2.id(), ConflictType::AccessNotGranted, Some(t1.id()), 1),
                (t3.id(), ConflictType::Unknown, None, 1),
            ]
        );
        assert_eq!(access.backlog().len(), 3);
    }

    #[test]
    fn test_backlog_is_bounded() {
        let txns = TransactionCoordinator::default();
        let access = AccessCoordinator::new(AccessCoordinatorConfig {
            backlog_size: 2,
            num_shards: 0,
        })
        .unwrap();
        for _ in 0..5 {
            let handle = txns.create_unbounded_transaction();
            access.notify_new_transaction(handle.transaction()).unwrap();
            handle.commit().unwrap();
        }
        let ids: Vec<u64> = access
            .backlog()
            .iter()
            .map(|d| d.transaction_id().value())
            .collect();
        assert_eq!(ids, vec![4, 5]);

        let disabled = AccessCoordinator::new(AccessCoordinatorConfig {
            backlog_size: 0,
            num_shards: 0,
        })
        .unwrap();
        let handle = txns.create_unbounded_transaction();
        disabled.notify_new_transaction(handle.transaction()).unwrap();
        handle.transaction().abort("cancelled").unwrap();
        assert!(disabled.backlog().is_empty());
    }

    #[test]
    fn test_set_object_description() {
        let (txns, access, reporter) = setup();
        let handle = txns.create_transaction();
        let txn = handle.transaction();

        reporter
            .set_object_description_in(txn, "room-42", Some(description("lobby")))
            .unwrap();
        reporter
            .report_object_access_in(txn, "room-42", AccessType::Write)
            .unwrap();
        reporter
            .set_object_description_in(txn, "room-42", None)
            .unwrap();
        reporter
            .report_object_access_in_with(txn, 7u64, AccessType::Read, description("score"))
            .unwrap();
        handle.commit().unwrap();

        let rendered: Vec<String> = access
            .finished_detail(handle.id())
            .unwrap()
            .accessed_objects()
            .iter()
            .map(|o| o.to_string())
            .collect();
        assert_eq!(
            rendered,
            vec![
                "[DataService] WRITE room-42 (lobby)",
                "[DataService] READ 7 (score)",
            ]
        );
    }

    #[test]
    fn test_abort_racing_first_report_leaves_nothing_tracked() {
        let (txns, access, reporter) = setup();
        for n in 0..500u64 {
            let handle = txns.create_transaction();
            let txn = handle.transaction().clone();
            std::thread::scope(|s| {
                s.spawn(|| {
                    let _ = reporter.report_object_access_in(&txn, n, AccessType::Write);
                });
                s.spawn(|| {
                    txn.abort("stale").unwrap();
                });
            });
            assert_eq!(txn.state(), TransactionState::Aborted);
            assert_eq!(access.tracked_transactions(), 0, "record leaked at {}", n);
            assert_eq!(access.claimed_objects(), 0, "claim leaked at {}", n);
        }
    }

    #[test]
    fn test_report_after_abort_carries_cause() {
        let (txns, _, reporter) = setup();
        let handle = txns.create_transaction();
        handle.transaction().abort("lost race").unwrap();

        match reporter.report_object_access_in(handle.transaction(), "X", AccessType::Read) {
            Err(KernelError::NotActive { cause, .. }) => {
                assert_eq!(cause.unwrap().message, "lost race")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_reporting() {
        let (txns, access, reporter) = setup();
        let handles: Vec<_> = (0..64).map(|_| txns.create_transaction()).collect();

        handles.par_iter().for_each(|handle| {
            let txn = handle.transaction();
            for obj in 0..32u64 {
                reporter
                    .report_object_access_in(txn, obj, AccessType::Read)
                    .unwrap();
            }
            reporter
                .report_object_access_in(txn, 1_000 + handle.id().value(), AccessType::Write)
                .unwrap();
        });
        assert_eq!(access.holders("DataService", 0u64).len(), 64);

        handles.par_iter().for_each(|handle| handle.commit().unwrap());
        assert_eq!(access.claimed_objects(), 0);
        assert_eq!(access.tracked_transactions(), 0);
        assert_eq!(access.report_count("DataService"), Some(64 * 33));
    }
}
