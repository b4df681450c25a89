use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Type of access to a shared object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessType {
    /// Read-only access
    Read,
    /// Read-write access
    Write,
}

impl AccessType {
    /// Two accesses to the same object conflict unless both are reads.
    #[inline]
    pub fn conflicts_with(self, other: AccessType) -> bool {
        self == AccessType::Write || other == AccessType::Write
    }

    /// The stronger of two access types.
    #[inline]
    pub fn max(self, other: AccessType) -> AccessType {
        if self == AccessType::Write || other == AccessType::Write {
            AccessType::Write
        } else {
            AccessType::Read
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessType::Read => write!(f, "READ"),
            AccessType::Write => write!(f, "WRITE"),
        }
    }
}

/// Identifier standing in for an accessed object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectId {
    Numeric(u64),
    Name(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Numeric(n) => write!(f, "{}", n),
            ObjectId::Name(s) => write!(f, "{}", s),
            ObjectId::Bytes(b) => {
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl From<u64> for ObjectId {
    fn from(n: u64) -> Self {
        ObjectId::Numeric(n)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        ObjectId::Name(s.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        ObjectId::Name(s)
    }
}

impl From<Vec<u8>> for ObjectId {
    fn from(b: Vec<u8>) -> Self {
        ObjectId::Bytes(b)
    }
}

impl From<&[u8]> for ObjectId {
    fn from(b: &[u8]) -> Self {
        ObjectId::Bytes(b.to_vec())
    }
}

/// An object id qualified by the source that reported it.
///
/// Ids from different sources never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub source: Arc<str>,
    pub object: ObjectId,
}

impl ObjectKey {
    pub fn new(source: impl Into<Arc<str>>, object: impl Into<ObjectId>) -> Self {
        Self {
            source: source.into(),
            object: object.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.object)
    }
}

/// Diagnostic payload attached to an access. Only rendered by consumers
/// of access details, never on the reporting path.
pub type Description = Arc<dyn fmt::Display + Send + Sync>;

pub fn description<D>(d: D) -> Description
where
    D: fmt::Display + Send + Sync + 'static,
{
    Arc::new(d)
}

/// One read or write of a shared object by a transaction.
///
/// Equality ignores the description.
#[derive(Clone)]
pub struct AccessedObject {
    object: ObjectId,
    access_type: AccessType,
    source: Arc<str>,
    description: Option<Description>,
}

impl AccessedObject {
    pub fn new(
        key: &ObjectKey,
        access_type: AccessType,
        description: Option<Description>,
    ) -> Self {
        Self {
            object: key.object.clone(),
            access_type,
            source: key.source.clone(),
            description,
        }
    }

    pub fn object_id(&self) -> &ObjectId {
        &self.object
    }

    pub fn access_type(&self) -> AccessType {
        self.access_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn description(&self) -> Option<&Description> {
        self.description.as_ref()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            source: self.source.clone(),
            object: self.object.clone(),
        }
    }
}

impl PartialEq for AccessedObject {
    fn eq(&self, other: &Self) -> bool {
        self.object == other.object
            && self.access_type == other.access_type
            && self.source == other.source
    }
}

impl Eq for AccessedObject {}

impl Hash for AccessedObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object.hash(state);
        self.access_type.hash(state);
        self.source.hash(state);
    }
}

impl fmt::Debug for AccessedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessedObject")
            .field("source", &self.source)
            .field("object", &self.object)
            .field("access_type", &self.access_type)
            .field("has_description", &self.description.is_some())
            .finish()
    }
}

impl fmt::Display for AccessedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}", self.source, self.access_type, self.object)?;
        if let Some(desc) = &self.description {
            write!(f, " ({})", desc)?;
        }
        Ok(())
    }
}
