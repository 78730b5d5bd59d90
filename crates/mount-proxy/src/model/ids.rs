//! Identifiers and small enumerations.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Names one managed device connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberAddress(pub String);

impl MemberAddress {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for MemberAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque transaction identifier. Every call to [`TransactionId::new`] yields a value never
/// seen before, so an id is never reused once its transaction is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two datastores a device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreKind {
    Config,
    Operational,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Config => f.write_str("config"),
            StoreKind::Operational => f.write_str("operational"),
        }
    }
}

/// Capabilities a transaction is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl TransactionKind {
    pub fn can_read(self) -> bool {
        matches!(self, TransactionKind::ReadOnly | TransactionKind::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, TransactionKind::WriteOnly | TransactionKind::ReadWrite)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::ReadOnly => f.write_str("read-only"),
            TransactionKind::WriteOnly => f.write_str("write-only"),
            TransactionKind::ReadWrite => f.write_str("read-write"),
        }
    }
}

/// Every operation a caller can issue, used for error reporting and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    NewTransaction,
    Read,
    Exists,
    Write,
    Merge,
    Delete,
    Submit,
    Discard,
    InvokeRpc,
}

impl Operation {
    /// Whether the operation changes device state once applied.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Operation::Write | Operation::Merge | Operation::Delete | Operation::Submit | Operation::InvokeRpc
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A schema source advertised by a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceIdentifier {
    pub name: String,
    pub revision: Option<String>,
}

impl SourceIdentifier {
    pub fn new(name: impl Into<String>, revision: Option<&str>) -> Self {
        Self {
            name: name.into(),
            revision: revision.map(str::to_string),
        }
    }
}
