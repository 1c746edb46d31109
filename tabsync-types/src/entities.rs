//! Ledger entities mirrored from the remote data service.
//!
//! All records are plain serde-serializable data. A group strictly owns
//! its members, expenses, and settlements; an expense strictly owns its
//! splits. Mutation happens only through the sync subsystem, never by
//! editing these structs in place on the UI side.

use crate::{ExpenseId, GroupId, MemberId, SettlementId, SplitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bill-splitting group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Unique identifier.
    pub id: GroupId,
    /// Display name.
    pub name: String,
    /// ISO 4217 code all balances are expressed in.
    pub base_currency: String,
    /// Unique six-character join code.
    pub join_code: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time, used for last-write-wins resolution.
    pub updated_at: Option<DateTime<Utc>>,
    /// Set when the group has been archived.
    pub archived_at: Option<DateTime<Utc>>,
}

impl Group {
    /// Create a new group with a fresh id and join code.
    pub fn new(name: &str, base_currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: GroupId::new(),
            name: name.to_string(),
            base_currency: base_currency.to_string(),
            join_code: generate_join_code(),
            created_at: now,
            updated_at: Some(now),
            archived_at: None,
        }
    }

    /// Check whether this group has been archived.
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// Generate a six-character uppercase alphanumeric join code.
///
/// Ambiguous characters (0/O, 1/I) are excluded from the alphabet.
pub fn generate_join_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let bytes = Uuid::new_v4().into_bytes();
    bytes[..6]
        .iter()
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect()
}

/// A member of exactly one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Unique identifier.
    pub id: MemberId,
    /// Owning group.
    pub group_id: GroupId,
    /// Display name.
    pub name: String,
    /// Optional reference into the external identity provider.
    pub linked_identity: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Member {
    /// Create a new member of the given group.
    pub fn new(group_id: GroupId, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: MemberId::new(),
            group_id,
            name: name.to_string(),
            linked_identity: None,
            created_at: now,
            updated_at: Some(now),
        }
    }
}

/// An expense paid by one member on behalf of the group.
///
/// The conversion rate to the group base currency is captured at creation
/// time and never refreshed, so historical balances stay fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    /// Unique identifier.
    pub id: ExpenseId,
    /// Owning group.
    pub group_id: GroupId,
    /// Member who paid.
    pub payer_id: MemberId,
    /// Total amount in `currency`.
    pub amount: f64,
    /// ISO 4217 code the expense was paid in.
    pub currency: String,
    /// Rate from `currency` to the group base currency at creation time.
    pub conversion_rate: f64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Expense {
    /// Amount converted to the group base currency.
    pub fn base_amount(&self) -> f64 {
        self.amount * self.conversion_rate
    }
}

/// One member's owed share of an expense, in the group base currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    /// Unique identifier.
    pub id: SplitId,
    /// Owning expense.
    pub expense_id: ExpenseId,
    /// The debtor.
    pub member_id: MemberId,
    /// Owed amount in the group base currency.
    pub amount: f64,
}

/// How a settlement was paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleMethod {
    /// Cash handed over in person.
    Cash,
    /// Bank transfer.
    BankTransfer,
    /// Any external payment app.
    PaymentApp,
    /// Anything else.
    Other,
}

/// A recorded real-world payment between two members, canceling ledger debt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    /// Unique identifier.
    pub id: SettlementId,
    /// Owning group.
    pub group_id: GroupId,
    /// Member who paid.
    pub payer_id: MemberId,
    /// Member who received the money.
    pub payee_id: MemberId,
    /// Amount in the group base currency.
    pub amount: f64,
    /// How the money changed hands.
    pub method: SettleMethod,
    /// Optional free-text note.
    pub note: Option<String>,
    /// When the payment was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl Settlement {
    /// Record a new settlement.
    pub fn new(
        group_id: GroupId,
        payer_id: MemberId,
        payee_id: MemberId,
        amount: f64,
        method: SettleMethod,
    ) -> Self {
        Self {
            id: SettlementId::new(),
            group_id,
            payer_id,
            payee_id,
            amount,
            method,
            note: None,
            recorded_at: Utc::now(),
        }
    }
}
