//! Conflict Table - Per-Object Access Claims
//!
//! Maps each claimed object key to the transactions holding it and their
//! access mode. The map is sharded so reporting threads touching different
//! objects do not contend.

use crate::txn::Transaction;
use crate::types::{AccessType, ObjectKey, TransactionId};
use dashmap::DashMap;
use smallvec::SmallVec;
use std::sync::{Arc, Weak};

/// One transaction's claim on an object
#[derive(Debug, Clone)]
pub struct Claim {
    pub txn_id: TransactionId,
    pub access: AccessType,
    txn: Weak<Transaction>,
}

impl Claim {
    /// The claiming transaction, if it is still running
    pub fn live_transaction(&self) -> Option<Arc<Transaction>> {
        self.txn
            .upgrade()
            .filter(|txn| !txn.state().is_terminal())
    }
}

/// Most objects are claimed by one or two transactions at a time
type Claims = SmallVec<[Claim; 2]>;

pub struct ConflictTable {
    claims: DashMap<ObjectKey, Claims>,
}

impl ConflictTable {
    pub fn new() -> Self {
        Self {
            claims: DashMap::new(),
        }
    }

    /// Create a table with an explicit shard count (a power of two)
    pub fn with_shard_amount(shards: usize) -> Self {
        Self {
            claims: DashMap::with_shard_amount(shards),
        }
    }

    /// Record a claim, upgrading an existing claim of the same transaction.
    ///
    /// Returns false if the transaction already held an equal or stronger
    /// claim.
    pub fn insert(&self, key: &ObjectKey, txn: &Arc<Transaction>, access: AccessType) -> bool {
        let txn_id = txn.id();
        let mut claims = self.claims.entry(key.clone()).or_default();

        if let Some(claim) = claims.iter_mut().find(|c| c.txn_id == txn_id) {
            let upgraded = claim.access.max(access);
            let changed = upgraded != claim.access;
            claim.access = upgraded;
            return changed;
        }

        claims.push(Claim {
            txn_id,
            access,
            txn: Arc::downgrade(txn),
        });
        true
    }

    /// Find a running transaction, other than `txn_id`, whose claim on
    /// `key` conflicts with `access`.
    pub fn find_conflict(
        &self,
        key: &ObjectKey,
        txn_id: TransactionId,
        access: AccessType,
    ) -> Option<Arc<Transaction>> {
        let claims = self.claims.get(key)?;
        claims
            .iter()
            .filter(|c| c.txn_id != txn_id && c.access.conflicts_with(access))
            .find_map(Claim::live_transaction)
    }

    /// Drop every claim `txn_id` holds on `keys`. Returns the number of
    /// claims removed.
    pub fn release<'a>(
        &self,
        txn_id: TransactionId,
        keys: impl IntoIterator<Item = &'a ObjectKey>,
    ) -> usize {
        let mut released = 0;
        for key in keys {
            {
                let Some(mut claims) = self.claims.get_mut(key) else {
                    continue;
                };
                let before = claims.len();
                claims.retain(|c| c.txn_id != txn_id);
                released += before - claims.len();
            }
            // Guard above must be gone: same shard
            self.claims.remove_if(key, |_, claims| claims.is_empty());
        }
        released
    }

    /// Running transactions currently claiming `key`
    pub fn holders(&self, key: &ObjectKey) -> Vec<(TransactionId, AccessType)> {
        match self.claims.get(key) {
            Some(claims) => claims
                .iter()
                .filter(|c| c.live_transaction().is_some())
                .map(|c| (c.txn_id, c.access))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Number of claimed objects
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

impl Default for ConflictTable {
    fn default() -> Self {
        Self::new()
    }
}
