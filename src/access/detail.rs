//! Per-transaction access detail, handed to access listeners once the
//! transaction finishes.

use crate::types::{AccessType, AccessedObject, Description, ObjectKey, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Why a finished transaction failed, as far as access tracking can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictType {
    /// Committed, or no failure attributable to access
    None,
    /// Another transaction held a conflicting claim
    AccessNotGranted,
    /// Aborted for a reason that could not be attributed
    Unknown,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictType::None => write!(f, "NONE"),
            ConflictType::AccessNotGranted => write!(f, "ACCESS_NOT_GRANTED"),
            ConflictType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Access types recorded for one key
#[derive(Debug, Clone, Copy, Default)]
struct Seen {
    read: bool,
    write: bool,
}

impl Seen {
    /// Mark `access` seen. Returns true if it was not seen before.
    fn insert(&mut self, access: AccessType) -> bool {
        let slot = match access {
            AccessType::Read => &mut self.read,
            AccessType::Write => &mut self.write,
        };
        !std::mem::replace(slot, true)
    }

    fn strongest(self) -> AccessType {
        if self.write {
            AccessType::Write
        } else {
            AccessType::Read
        }
    }
}

/// Everything a transaction accessed, in first-access order.
///
/// Accesses are deduplicated on (source, object, type): reading then
/// writing the same object yields two entries.
#[derive(Clone)]
pub struct AccessedObjectsDetail {
    txn_id: TransactionId,
    accesses: Vec<(ObjectKey, AccessType)>,
    /// Access types seen per key
    keys: HashMap<ObjectKey, Seen>,
    descriptions: HashMap<ObjectKey, Description>,
    conflict_type: ConflictType,
    conflicting_id: Option<TransactionId>,
}

impl AccessedObjectsDetail {
    pub(crate) fn new(txn_id: TransactionId) -> Self {
        Self {
            txn_id,
            accesses: Vec::new(),
            keys: HashMap::new(),
            descriptions: HashMap::new(),
            conflict_type: ConflictType::None,
            conflicting_id: None,
        }
    }

    /// Record an access. Returns true if it was not seen before.
    pub(crate) fn record(&mut self, key: &ObjectKey, access: AccessType) -> bool {
        let new = match self.keys.get_mut(key) {
            Some(seen) => seen.insert(access),
            None => self
                .keys
                .entry(key.clone())
                .or_insert_with(Seen::default)
                .insert(access),
        };
        if new {
            self.accesses.push((key.clone(), access));
        }
        new
    }

    /// Attach a description to `key`, replacing any earlier one.
    /// `None` leaves an existing description untouched.
    pub(crate) fn set_description(&mut self, key: &ObjectKey, description: Option<Description>) {
        if let Some(description) = description {
            self.descriptions.insert(key.clone(), description);
        }
    }

    pub(crate) fn set_conflict(
        &mut self,
        conflict_type: ConflictType,
        conflicting_id: Option<TransactionId>,
    ) {
        self.conflict_type = conflict_type;
        self.conflicting_id = conflicting_id;
    }

    /// Transaction the accesses belong to
    pub fn transaction_id(&self) -> TransactionId {
        self.txn_id
    }

    /// The accesses with their descriptions, in first-access order
    pub fn accessed_objects(&self) -> Vec<AccessedObject> {
        self.accesses
            .iter()
            .map(|(key, access)| {
                AccessedObject::new(key, *access, self.descriptions.get(key).cloned())
            })
            .collect()
    }

    /// Every accessed key with the strongest access made to it
    pub fn keys(&self) -> impl Iterator<Item = (&ObjectKey, AccessType)> {
        self.keys.iter().map(|(key, seen)| (key, seen.strongest()))
    }

    /// Strongest access made to `key`
    pub fn access_type(&self, key: &ObjectKey) -> Option<AccessType> {
        self.keys.get(key).map(|seen| seen.strongest())
    }

    /// Description attached to `key`
    pub fn description(&self, key: &ObjectKey) -> Option<&Description> {
        self.descriptions.get(key)
    }

    /// Number of distinct accesses
    pub fn len(&self) -> usize {
        self.accesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accesses.is_empty()
    }

    /// Why the transaction failed, if it did
    pub fn conflict_type(&self) -> ConflictType {
        self.conflict_type
    }

    /// Transaction the failure was attributed to
    pub fn conflicting_id(&self) -> Option<TransactionId> {
        self.conflicting_id
    }

    /// Whether either detail wrote an object the other accessed
    pub fn conflicts_with(&self, other: &AccessedObjectsDetail) -> bool {
        let (small, large) = if self.keys.len() <= other.keys.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.keys().any(|(key, access)| {
            large
                .access_type(key)
                .map_or(false, |other_access| access.conflicts_with(other_access))
        })
    }
}

impl fmt::Debug for AccessedObjectsDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessedObjectsDetail")
            .field("txn_id", &self.txn_id)
            .field("accesses", &self.accesses.len())
            .field("conflict_type", &self.conflict_type)
            .field("conflicting_id", &self.conflicting_id)
            .finish()
    }
}

/// Receives the access detail of every finished transaction
pub trait AccessedObjectsListener: Send + Sync {
    fn transaction_finished(&self, detail: &AccessedObjectsDetail);
}
