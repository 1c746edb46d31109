//! Pending-operation queue types.
//!
//! Mutations that cannot be applied remotely right away are persisted as
//! [`QueuedOperation`]s. The payload is a tagged union keyed by table
//! name, so the queue carries strongly typed records and only serializes
//! to JSON at the storage and wire boundaries.

use crate::{Expense, Group, Member, Settlement, Split, TypesError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Create the record remotely.
    Insert,
    /// Partially update the record, keyed by its identifier.
    Update,
    /// Delete the record, keyed by its identifier.
    Delete,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpKind::Insert => "insert",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
        })
    }
}

impl FromStr for OpKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(OpKind::Insert),
            "update" => Ok(OpKind::Update),
            "delete" => Ok(OpKind::Delete),
            other => Err(TypesError::InvalidOpKind(other.to_string())),
        }
    }
}

/// A remote table targeted by a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    /// The groups collection.
    Groups,
    /// The members collection.
    Members,
    /// The expenses collection.
    Expenses,
    /// The splits collection.
    Splits,
    /// The settlements collection.
    Settlements,
}

impl TableKind {
    /// Stable table name as used by the remote service.
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Groups => "groups",
            TableKind::Members => "members",
            TableKind::Expenses => "expenses",
            TableKind::Splits => "splits",
            TableKind::Settlements => "settlements",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "groups" => Ok(TableKind::Groups),
            "members" => Ok(TableKind::Members),
            "expenses" => Ok(TableKind::Expenses),
            "splits" => Ok(TableKind::Splits),
            "settlements" => Ok(TableKind::Settlements),
            other => Err(TypesError::InvalidTable(other.to_string())),
        }
    }
}

/// Typed payload of a queued operation, tagged by table name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "record", rename_all = "snake_case")]
pub enum OpPayload {
    /// A group record.
    Groups(Group),
    /// A member record.
    Members(Member),
    /// An expense record.
    Expenses(Expense),
    /// A split record.
    Splits(Split),
    /// A settlement record.
    Settlements(Settlement),
}

impl OpPayload {
    /// The table this payload belongs to.
    pub fn table(&self) -> TableKind {
        match self {
            OpPayload::Groups(_) => TableKind::Groups,
            OpPayload::Members(_) => TableKind::Members,
            OpPayload::Expenses(_) => TableKind::Expenses,
            OpPayload::Splits(_) => TableKind::Splits,
            OpPayload::Settlements(_) => TableKind::Settlements,
        }
    }

    /// Identifier of the record this payload describes.
    pub fn record_id(&self) -> Uuid {
        match self {
            OpPayload::Groups(g) => *g.id.as_uuid(),
            OpPayload::Members(m) => *m.id.as_uuid(),
            OpPayload::Expenses(e) => *e.id.as_uuid(),
            OpPayload::Splits(s) => *s.id.as_uuid(),
            OpPayload::Settlements(s) => *s.id.as_uuid(),
        }
    }

    /// Identifier of the owning parent record, if any.
    ///
    /// Groups have no parent; members, expenses, and settlements are owned
    /// by their group, splits by their expense. Used by the foreign-key
    /// cascade rule when a parent has been deleted remotely.
    pub fn parent_id(&self) -> Option<Uuid> {
        match self {
            OpPayload::Groups(_) => None,
            OpPayload::Members(m) => Some(*m.group_id.as_uuid()),
            OpPayload::Expenses(e) => Some(*e.group_id.as_uuid()),
            OpPayload::Splits(s) => Some(*s.expense_id.as_uuid()),
            OpPayload::Settlements(s) => Some(*s.group_id.as_uuid()),
        }
    }

    /// Serialize the record alone (without the table tag) for the remote
    /// creation call.
    pub fn to_record_json(&self) -> Result<serde_json::Value, TypesError> {
        let value = match self {
            OpPayload::Groups(g) => serde_json::to_value(g),
            OpPayload::Members(m) => serde_json::to_value(m),
            OpPayload::Expenses(e) => serde_json::to_value(e),
            OpPayload::Splits(s) => serde_json::to_value(s),
            OpPayload::Settlements(s) => serde_json::to_value(s),
        };
        value.map_err(TypesError::Serialization)
    }

    /// Serialize the record with its `id` field stripped, for the remote
    /// partial-update call (the identifier travels in the request key).
    pub fn to_patch_json(&self) -> Result<serde_json::Value, TypesError> {
        let mut value = self.to_record_json()?;
        if let Some(map) = value.as_object_mut() {
            map.remove("id");
        }
        Ok(value)
    }
}

/// A durable queue entry awaiting remote application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Monotonically increasing queue identifier, assigned by the store.
    pub id: i64,
    /// Mutation kind.
    pub kind: OpKind,
    /// Typed record payload.
    pub payload: OpPayload,
    /// Failed remote attempts so far.
    pub attempts: u32,
    /// Time of the most recent failed attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the operation was enqueued.
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedOperation {
    /// Target table, derived from the payload.
    pub fn table(&self) -> TableKind {
        self.payload.table()
    }

    /// Target record identifier, derived from the payload.
    pub fn record_id(&self) -> Uuid {
        self.payload.record_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Group, Member};

    #[test]
    fn payload_tagged_by_table_name() {
        let group = Group::new("Flat 4B", "EUR");
        let payload = OpPayload::Groups(group);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["table"], "groups");
        assert!(json["record"]["join_code"].is_string());
    }

    #[test]
    fn payload_json_roundtrip() {
        let group = Group::new("Flat 4B", "EUR");
        let member = Member::new(group.id, "Dana");
        let payload = OpPayload::Members(member.clone());
        let json = serde_json::to_string(&payload).unwrap();
        let back: OpPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
        assert_eq!(back.record_id(), *member.id.as_uuid());
    }

    #[test]
    fn patch_json_strips_id() {
        let group = Group::new("Flat 4B", "EUR");
        let patch = OpPayload::Groups(group.clone()).to_patch_json().unwrap();
        assert!(patch.get("id").is_none());
        assert_eq!(patch["name"], "Flat 4B");

        let record = OpPayload::Groups(group).to_record_json().unwrap();
        assert!(record.get("id").is_some());
    }

    #[test]
    fn parent_ids_follow_ownership() {
        let group = Group::new("Flat 4B", "EUR");
        let member = Member::new(group.id, "Dana");
        assert_eq!(OpPayload::Groups(group.clone()).parent_id(), None);
        assert_eq!(
            OpPayload::Members(member).parent_id(),
            Some(*group.id.as_uuid())
        );
    }

    #[test]
    fn op_kind_parse_roundtrip() {
        for kind in [OpKind::Insert, OpKind::Update, OpKind::Delete] {
            let parsed: OpKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("upsert".parse::<OpKind>().is_err());
    }

    #[test]
    fn table_kind_parse_roundtrip() {
        for table in [
            TableKind::Groups,
            TableKind::Members,
            TableKind::Expenses,
            TableKind::Splits,
            TableKind::Settlements,
        ] {
            let parsed: TableKind = table.as_str().parse().unwrap();
            assert_eq!(parsed, table);
        }
        assert!("receipts".parse::<TableKind>().is_err());
    }
}
