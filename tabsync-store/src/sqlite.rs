//! SQLite backend for the local store.

use crate::{LedgerStore, QueueRow, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tabsync_core::resolve_conflict;
use tabsync_types::{
    Expense, Group, GroupId, Member, OpKind, OpPayload, QueuedOperation, SettleMethod, Settlement,
    Split,
};
use tracing::warn;
use uuid::Uuid;

/// SQLite-based local store.
///
/// Uses WAL mode for concurrent reads/writes; foreign keys are enforced
/// so group deletion cascades through members, expenses, splits, and
/// settlements.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a store at the given database path.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StoreError::Database)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        for ddl in [
            r#"
            CREATE TABLE IF NOT EXISTS groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                base_currency TEXT NOT NULL,
                join_code TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT,
                archived_at TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS members (
                id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                linked_identity TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS expenses (
                id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
                payer_id TEXT NOT NULL,
                amount REAL NOT NULL,
                currency TEXT NOT NULL,
                conversion_rate REAL NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS splits (
                id TEXT PRIMARY KEY,
                expense_id TEXT NOT NULL REFERENCES expenses(id) ON DELETE CASCADE,
                member_id TEXT NOT NULL,
                amount REAL NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS settlements (
                id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
                payer_id TEXT NOT NULL,
                payee_id TEXT NOT NULL,
                amount REAL NOT NULL,
                method TEXT NOT NULL,
                note TEXT,
                recorded_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS queued_operations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT NOT NULL,
                kind TEXT NOT NULL,
                record_id TEXT NOT NULL,
                parent_id TEXT,
                payload TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_attempt_at TEXT,
                enqueued_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_members_group ON members(group_id)",
            "CREATE INDEX IF NOT EXISTS idx_expenses_group ON expenses(group_id)",
            "CREATE INDEX IF NOT EXISTS idx_splits_expense ON splits(expense_id)",
            "CREATE INDEX IF NOT EXISTS idx_settlements_group ON settlements(group_id)",
            "CREATE INDEX IF NOT EXISTS idx_queue_record ON queued_operations(record_id)",
            "CREATE INDEX IF NOT EXISTS idx_queue_parent ON queued_operations(parent_id)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    // --- entity upserts ---

    async fn upsert_group(&self, g: &Group) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO groups (id, name, base_currency, join_code, created_at, updated_at, archived_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                base_currency = excluded.base_currency,
                join_code = excluded.join_code,
                updated_at = excluded.updated_at,
                archived_at = excluded.archived_at
            "#,
        )
        .bind(g.id.to_string())
        .bind(&g.name)
        .bind(&g.base_currency)
        .bind(&g.join_code)
        .bind(g.created_at.to_rfc3339())
        .bind(g.updated_at.map(|t| t.to_rfc3339()))
        .bind(g.archived_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_member(&self, m: &Member) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO members (id, group_id, name, linked_identity, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                linked_identity = excluded.linked_identity,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(m.id.to_string())
        .bind(m.group_id.to_string())
        .bind(&m.name)
        .bind(m.linked_identity.as_deref())
        .bind(m.created_at.to_rfc3339())
        .bind(m.updated_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_expense(&self, e: &Expense) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO expenses (id, group_id, payer_id, amount, currency, conversion_rate, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                payer_id = excluded.payer_id,
                amount = excluded.amount,
                currency = excluded.currency,
                conversion_rate = excluded.conversion_rate,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(e.id.to_string())
        .bind(e.group_id.to_string())
        .bind(e.payer_id.to_string())
        .bind(e.amount)
        .bind(&e.currency)
        .bind(e.conversion_rate)
        .bind(e.created_at.to_rfc3339())
        .bind(e.updated_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_split(&self, s: &Split) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO splits (id, expense_id, member_id, amount)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                member_id = excluded.member_id,
                amount = excluded.amount
            "#,
        )
        .bind(s.id.to_string())
        .bind(s.expense_id.to_string())
        .bind(s.member_id.to_string())
        .bind(s.amount)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_settlement(&self, s: &Settlement) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settlements (id, group_id, payer_id, payee_id, amount, method, note, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                amount = excluded.amount,
                method = excluded.method,
                note = excluded.note
            "#,
        )
        .bind(s.id.to_string())
        .bind(s.group_id.to_string())
        .bind(s.payer_id.to_string())
        .bind(s.payee_id.to_string())
        .bind(s.amount)
        .bind(method_str(s.method))
        .bind(s.note.as_deref())
        .bind(s.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_record(&self, payload: &OpPayload) -> StoreResult<()> {
        let table = payload.table().as_str();
        let sql = format!("DELETE FROM {table} WHERE id = ?1");
        sqlx::query(&sql)
            .bind(payload.record_id().to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn member_by_id(&self, id: &str) -> StoreResult<Option<Member>> {
        let row = sqlx::query_as::<_, MemberRow>("SELECT * FROM members WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Member::try_from).transpose()
    }

    async fn expense_by_id(&self, id: &str) -> StoreResult<Option<Expense>> {
        let row = sqlx::query_as::<_, ExpenseRow>("SELECT * FROM expenses WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Expense::try_from).transpose()
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn apply_local(&self, kind: OpKind, payload: &OpPayload) -> StoreResult<()> {
        match kind {
            OpKind::Insert | OpKind::Update => match payload {
                OpPayload::Groups(g) => self.upsert_group(g).await,
                OpPayload::Members(m) => self.upsert_member(m).await,
                OpPayload::Expenses(e) => self.upsert_expense(e).await,
                OpPayload::Splits(s) => self.upsert_split(s).await,
                OpPayload::Settlements(s) => self.upsert_settlement(s).await,
            },
            OpKind::Delete => self.delete_record(payload).await,
        }
    }

    async fn merge_remote(&self, payload: &OpPayload) -> StoreResult<()> {
        match payload {
            OpPayload::Groups(remote) => {
                let merged = match self.group(remote.id).await? {
                    Some(local) => resolve_conflict(local, remote.clone()),
                    None => remote.clone(),
                };
                self.upsert_group(&merged).await
            }
            OpPayload::Members(remote) => {
                let merged = match self.member_by_id(&remote.id.to_string()).await? {
                    Some(local) => resolve_conflict(local, remote.clone()),
                    None => remote.clone(),
                };
                self.upsert_member(&merged).await
            }
            OpPayload::Expenses(remote) => {
                let merged = match self.expense_by_id(&remote.id.to_string()).await? {
                    Some(local) => resolve_conflict(local, remote.clone()),
                    None => remote.clone(),
                };
                self.upsert_expense(&merged).await
            }
            // Splits and settlements carry no update timestamp; the
            // remote copy wins outright.
            OpPayload::Splits(remote) => self.upsert_split(remote).await,
            OpPayload::Settlements(remote) => self.upsert_settlement(remote).await,
        }
    }

    async fn group(&self, id: GroupId) -> StoreResult<Option<Group>> {
        let row = sqlx::query_as::<_, GroupRow>("SELECT * FROM groups WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Group::try_from).transpose()
    }

    async fn groups(&self) -> StoreResult<Vec<Group>> {
        let rows = sqlx::query_as::<_, GroupRow>("SELECT * FROM groups ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Group::try_from).collect()
    }

    async fn members(&self, group: GroupId) -> StoreResult<Vec<Member>> {
        let rows = sqlx::query_as::<_, MemberRow>(
            "SELECT * FROM members WHERE group_id = ?1 ORDER BY created_at",
        )
        .bind(group.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Member::try_from).collect()
    }

    async fn expenses(&self, group: GroupId) -> StoreResult<Vec<Expense>> {
        let rows = sqlx::query_as::<_, ExpenseRow>(
            "SELECT * FROM expenses WHERE group_id = ?1 ORDER BY created_at",
        )
        .bind(group.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Expense::try_from).collect()
    }

    async fn splits(&self, group: GroupId) -> StoreResult<Vec<Split>> {
        let rows = sqlx::query_as::<_, SplitRow>(
            r#"
            SELECT s.* FROM splits s
            JOIN expenses e ON e.id = s.expense_id
            WHERE e.group_id = ?1
            ORDER BY s.id
            "#,
        )
        .bind(group.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Split::try_from).collect()
    }

    async fn settlements(&self, group: GroupId) -> StoreResult<Vec<Settlement>> {
        let rows = sqlx::query_as::<_, SettlementRow>(
            "SELECT * FROM settlements WHERE group_id = ?1 ORDER BY recorded_at",
        )
        .bind(group.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Settlement::try_from).collect()
    }

    async fn record_settlement(&self, s: &Settlement) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO settlements (id, group_id, payer_id, payee_id, amount, method, note, recorded_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
            WHERE NOT EXISTS (
                SELECT 1 FROM settlements
                WHERE group_id = ?2 AND payer_id = ?3 AND payee_id = ?4
                  AND amount = ?5 AND method = ?6
            )
            "#,
        )
        .bind(s.id.to_string())
        .bind(s.group_id.to_string())
        .bind(s.payer_id.to_string())
        .bind(s.payee_id.to_string())
        .bind(s.amount)
        .bind(method_str(s.method))
        .bind(s.note.as_deref())
        .bind(s.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_group(&self, id: GroupId) -> StoreResult<()> {
        let expense_ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM expenses WHERE group_id = ?1")
                .bind(id.to_string())
                .fetch_all(&self.pool)
                .await?;

        sqlx::query("DELETE FROM groups WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        // Queued operations referencing the group or any of its expenses
        // can never apply once the group is gone.
        self.remove_ops_for_record(*id.as_uuid()).await?;
        for expense_id in expense_ids {
            if let Ok(uuid) = Uuid::parse_str(&expense_id) {
                self.remove_ops_for_record(uuid).await?;
            }
        }
        Ok(())
    }

    async fn enqueue(&self, kind: OpKind, payload: &OpPayload) -> StoreResult<i64> {
        let json = serde_json::to_string(payload)
            .map_err(tabsync_types::TypesError::Serialization)?;
        let result = sqlx::query(
            r#"
            INSERT INTO queued_operations
                (table_name, kind, record_id, parent_id, payload, enqueued_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(payload.table().as_str())
        .bind(kind.to_string())
        .bind(payload.record_id().to_string())
        .bind(payload.parent_id().map(|p| p.to_string()))
        .bind(json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn load_queue(&self) -> StoreResult<Vec<QueueRow>> {
        let rows = sqlx::query_as::<_, RawQueueRow>(
            r#"
            SELECT id, kind, payload, attempts, last_attempt_at, enqueued_at
            FROM queued_operations
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let id = row.id;
                match row.decode() {
                    Ok(op) => QueueRow::Valid(op),
                    Err(error) => {
                        warn!(queue_id = id, %error, "malformed queue entry");
                        QueueRow::Malformed { id, error }
                    }
                }
            })
            .collect())
    }

    async fn remove_op(&self, id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM queued_operations WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_ops(&self, ids: &[i64]) -> StoreResult<()> {
        for id in ids {
            self.remove_op(*id).await?;
        }
        Ok(())
    }

    async fn remove_ops_for_record(&self, record: Uuid) -> StoreResult<Vec<i64>> {
        let removed: Vec<i64> = sqlx::query_scalar(
            r#"
            DELETE FROM queued_operations
            WHERE record_id = ?1 OR parent_id = ?1
            RETURNING id
            "#,
        )
        .bind(record.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(removed)
    }

    async fn record_attempt(&self, id: i64) -> StoreResult<u32> {
        let attempts: i64 = sqlx::query_scalar(
            r#"
            UPDATE queued_operations
            SET attempts = attempts + 1, last_attempt_at = ?2
            WHERE id = ?1
            RETURNING attempts
            "#,
        )
        .bind(id)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok(attempts as u32)
    }

    async fn reset_attempts(&self, id: i64) -> StoreResult<()> {
        sqlx::query(
            "UPDATE queued_operations SET attempts = 0, last_attempt_at = NULL WHERE id = ?1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queued_operations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

// --- row decoding ---

fn corrupt(table: &'static str, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        table,
        reason: reason.to_string(),
    }
}

fn parse_ts(table: &'static str, s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(table, e))
}

fn parse_opt_ts(table: &'static str, s: Option<&str>) -> StoreResult<Option<DateTime<Utc>>> {
    s.map(|v| parse_ts(table, v)).transpose()
}

fn method_str(method: SettleMethod) -> &'static str {
    match method {
        SettleMethod::Cash => "cash",
        SettleMethod::BankTransfer => "bank_transfer",
        SettleMethod::PaymentApp => "payment_app",
        SettleMethod::Other => "other",
    }
}

fn parse_method(s: &str) -> StoreResult<SettleMethod> {
    match s {
        "cash" => Ok(SettleMethod::Cash),
        "bank_transfer" => Ok(SettleMethod::BankTransfer),
        "payment_app" => Ok(SettleMethod::PaymentApp),
        "other" => Ok(SettleMethod::Other),
        other => Err(corrupt("settlements", format!("unknown method {other}"))),
    }
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: String,
    name: String,
    base_currency: String,
    join_code: String,
    created_at: String,
    updated_at: Option<String>,
    archived_at: Option<String>,
}

impl TryFrom<GroupRow> for Group {
    type Error = StoreError;

    fn try_from(row: GroupRow) -> StoreResult<Self> {
        Ok(Group {
            id: row.id.parse().map_err(|e| corrupt("groups", e))?,
            name: row.name,
            base_currency: row.base_currency,
            join_code: row.join_code,
            created_at: parse_ts("groups", &row.created_at)?,
            updated_at: parse_opt_ts("groups", row.updated_at.as_deref())?,
            archived_at: parse_opt_ts("groups", row.archived_at.as_deref())?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    id: String,
    group_id: String,
    name: String,
    linked_identity: Option<String>,
    created_at: String,
    updated_at: Option<String>,
}

impl TryFrom<MemberRow> for Member {
    type Error = StoreError;

    fn try_from(row: MemberRow) -> StoreResult<Self> {
        Ok(Member {
            id: row.id.parse().map_err(|e| corrupt("members", e))?,
            group_id: row.group_id.parse().map_err(|e| corrupt("members", e))?,
            name: row.name,
            linked_identity: row.linked_identity,
            created_at: parse_ts("members", &row.created_at)?,
            updated_at: parse_opt_ts("members", row.updated_at.as_deref())?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ExpenseRow {
    id: String,
    group_id: String,
    payer_id: String,
    amount: f64,
    currency: String,
    conversion_rate: f64,
    created_at: String,
    updated_at: Option<String>,
}

impl TryFrom<ExpenseRow> for Expense {
    type Error = StoreError;

    fn try_from(row: ExpenseRow) -> StoreResult<Self> {
        Ok(Expense {
            id: row.id.parse().map_err(|e| corrupt("expenses", e))?,
            group_id: row.group_id.parse().map_err(|e| corrupt("expenses", e))?,
            payer_id: row.payer_id.parse().map_err(|e| corrupt("expenses", e))?,
            amount: row.amount,
            currency: row.currency,
            conversion_rate: row.conversion_rate,
            created_at: parse_ts("expenses", &row.created_at)?,
            updated_at: parse_opt_ts("expenses", row.updated_at.as_deref())?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SplitRow {
    id: String,
    expense_id: String,
    member_id: String,
    amount: f64,
}

impl TryFrom<SplitRow> for Split {
    type Error = StoreError;

    fn try_from(row: SplitRow) -> StoreResult<Self> {
        Ok(Split {
            id: row.id.parse().map_err(|e| corrupt("splits", e))?,
            expense_id: row.expense_id.parse().map_err(|e| corrupt("splits", e))?,
            member_id: row.member_id.parse().map_err(|e| corrupt("splits", e))?,
            amount: row.amount,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SettlementRow {
    id: String,
    group_id: String,
    payer_id: String,
    payee_id: String,
    amount: f64,
    method: String,
    note: Option<String>,
    recorded_at: String,
}

impl TryFrom<SettlementRow> for Settlement {
    type Error = StoreError;

    fn try_from(row: SettlementRow) -> StoreResult<Self> {
        Ok(Settlement {
            id: row.id.parse().map_err(|e| corrupt("settlements", e))?,
            group_id: row.group_id.parse().map_err(|e| corrupt("settlements", e))?,
            payer_id: row.payer_id.parse().map_err(|e| corrupt("settlements", e))?,
            payee_id: row.payee_id.parse().map_err(|e| corrupt("settlements", e))?,
            amount: row.amount,
            method: parse_method(&row.method)?,
            note: row.note,
            recorded_at: parse_ts("settlements", &row.recorded_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RawQueueRow {
    id: i64,
    kind: String,
    payload: String,
    attempts: i64,
    last_attempt_at: Option<String>,
    enqueued_at: String,
}

impl RawQueueRow {
    fn decode(self) -> Result<QueuedOperation, String> {
        let kind: OpKind = self.kind.parse().map_err(|e: tabsync_types::TypesError| e.to_string())?;
        let payload: OpPayload =
            serde_json::from_str(&self.payload).map_err(|e| e.to_string())?;
        let last_attempt_at = self
            .last_attempt_at
            .as_deref()
            .map(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| e.to_string())
            })
            .transpose()?;
        let enqueued_at = DateTime::parse_from_rfc3339(&self.enqueued_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| e.to_string())?;
        Ok(QueuedOperation {
            id: self.id,
            kind,
            payload,
            attempts: self.attempts as u32,
            last_attempt_at,
            enqueued_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsync_types::{ExpenseId, SplitId};

    async fn store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    fn sample_group() -> Group {
        Group::new("Trip to Oslo", "NOK")
    }

    fn sample_expense(group: &Group, payer: &Member, amount: f64) -> Expense {
        Expense {
            id: ExpenseId::new(),
            group_id: group.id,
            payer_id: payer.id,
            amount,
            currency: group.base_currency.clone(),
            conversion_rate: 1.0,
            created_at: Utc::now(),
            updated_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn group_roundtrip() {
        let store = store().await;
        let group = sample_group();
        store
            .apply_local(OpKind::Insert, &OpPayload::Groups(group.clone()))
            .await
            .unwrap();

        let loaded = store.group(group.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, group.name);
        assert_eq!(loaded.join_code, group.join_code);
        assert!(loaded.updated_at.is_some());
    }

    #[tokio::test]
    async fn apply_local_delete_removes_record() {
        let store = store().await;
        let group = sample_group();
        let payload = OpPayload::Groups(group.clone());
        store.apply_local(OpKind::Insert, &payload).await.unwrap();
        store.apply_local(OpKind::Delete, &payload).await.unwrap();
        assert!(store.group(group.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn merge_remote_keeps_strictly_newer_local() {
        let store = store().await;
        let mut local = sample_group();
        local.name = "Local".to_string();
        local.updated_at = Some(Utc::now());
        store
            .apply_local(OpKind::Insert, &OpPayload::Groups(local.clone()))
            .await
            .unwrap();

        let mut remote = local.clone();
        remote.name = "Remote".to_string();
        remote.updated_at = Some(local.updated_at.unwrap() - chrono::Duration::seconds(60));
        store
            .merge_remote(&OpPayload::Groups(remote))
            .await
            .unwrap();

        let merged = store.group(local.id).await.unwrap().unwrap();
        assert_eq!(merged.name, "Local");
    }

    #[tokio::test]
    async fn merge_remote_wins_on_equal_timestamps() {
        let store = store().await;
        let ts = Utc::now();
        let mut local = sample_group();
        local.name = "Local".to_string();
        local.updated_at = Some(ts);
        store
            .apply_local(OpKind::Insert, &OpPayload::Groups(local.clone()))
            .await
            .unwrap();

        let mut remote = local.clone();
        remote.name = "Remote".to_string();
        remote.updated_at = Some(ts);
        store
            .merge_remote(&OpPayload::Groups(remote))
            .await
            .unwrap();

        let merged = store.group(local.id).await.unwrap().unwrap();
        assert_eq!(merged.name, "Remote");
    }

    #[tokio::test]
    async fn queue_preserves_fifo_order_across_tables() {
        let store = store().await;
        let group = sample_group();
        let member = Member::new(group.id, "Dana");
        let expense = sample_expense(&group, &member, 30.0);

        let a = store
            .enqueue(OpKind::Insert, &OpPayload::Groups(group.clone()))
            .await
            .unwrap();
        let b = store
            .enqueue(OpKind::Insert, &OpPayload::Members(member))
            .await
            .unwrap();
        let c = store
            .enqueue(OpKind::Insert, &OpPayload::Expenses(expense))
            .await
            .unwrap();
        assert!(a < b && b < c);

        let rows = store.load_queue().await.unwrap();
        let ids: Vec<i64> = rows
            .iter()
            .map(|r| match r {
                QueueRow::Valid(op) => op.id,
                QueueRow::Malformed { id, .. } => *id,
            })
            .collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[tokio::test]
    async fn malformed_payload_does_not_block_load() {
        let store = store().await;
        let group = sample_group();
        store
            .enqueue(OpKind::Insert, &OpPayload::Groups(group.clone()))
            .await
            .unwrap();

        sqlx::query(
            r#"
            INSERT INTO queued_operations (table_name, kind, record_id, payload, enqueued_at)
            VALUES ('groups', 'insert', 'r-bad', '{not json', ?1)
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&store.pool)
        .await
        .unwrap();

        store
            .enqueue(OpKind::Update, &OpPayload::Groups(group))
            .await
            .unwrap();

        let rows = store.load_queue().await.unwrap();
        assert_eq!(rows.len(), 3);
        let malformed = rows
            .iter()
            .filter(|r| matches!(r, QueueRow::Malformed { .. }))
            .count();
        assert_eq!(malformed, 1);
    }

    #[tokio::test]
    async fn record_attempt_increments_and_sets_timestamp() {
        let store = store().await;
        let id = store
            .enqueue(OpKind::Insert, &OpPayload::Groups(sample_group()))
            .await
            .unwrap();

        assert_eq!(store.record_attempt(id).await.unwrap(), 1);
        assert_eq!(store.record_attempt(id).await.unwrap(), 2);

        let rows = store.load_queue().await.unwrap();
        let QueueRow::Valid(op) = &rows[0] else {
            panic!("expected valid row");
        };
        assert_eq!(op.attempts, 2);
        assert!(op.last_attempt_at.is_some());

        store.reset_attempts(id).await.unwrap();
        let rows = store.load_queue().await.unwrap();
        let QueueRow::Valid(op) = &rows[0] else {
            panic!("expected valid row");
        };
        assert_eq!(op.attempts, 0);
        assert!(op.last_attempt_at.is_none());
    }

    #[tokio::test]
    async fn identical_settlements_store_once() {
        let store = store().await;
        let group = sample_group();
        store
            .apply_local(OpKind::Insert, &OpPayload::Groups(group.clone()))
            .await
            .unwrap();
        let payer = Member::new(group.id, "Ben");
        let payee = Member::new(group.id, "Ana");

        let mut stored = 0;
        for _ in 0..4 {
            let s = Settlement::new(group.id, payer.id, payee.id, 25.0, SettleMethod::Cash);
            if store.record_settlement(&s).await.unwrap() {
                stored += 1;
            }
        }
        assert_eq!(stored, 1);
        assert_eq!(store.settlements(group.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_group_cascades_to_children_and_queue() {
        let store = store().await;
        let group = sample_group();
        let member = Member::new(group.id, "Dana");
        let expense = sample_expense(&group, &member, 60.0);
        let split = Split {
            id: SplitId::new(),
            expense_id: expense.id,
            member_id: member.id,
            amount: 60.0,
        };

        store
            .apply_local(OpKind::Insert, &OpPayload::Groups(group.clone()))
            .await
            .unwrap();
        store
            .apply_local(OpKind::Insert, &OpPayload::Members(member.clone()))
            .await
            .unwrap();
        store
            .apply_local(OpKind::Insert, &OpPayload::Expenses(expense.clone()))
            .await
            .unwrap();
        store
            .apply_local(OpKind::Insert, &OpPayload::Splits(split.clone()))
            .await
            .unwrap();

        store
            .enqueue(OpKind::Update, &OpPayload::Members(member.clone()))
            .await
            .unwrap();
        store
            .enqueue(OpKind::Update, &OpPayload::Splits(split))
            .await
            .unwrap();

        store.delete_group(group.id).await.unwrap();

        assert!(store.group(group.id).await.unwrap().is_none());
        assert!(store.members(group.id).await.unwrap().is_empty());
        assert!(store.expenses(group.id).await.unwrap().is_empty());
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_ops_for_record_matches_parent_references() {
        let store = store().await;
        let group = sample_group();
        let member_a = Member::new(group.id, "Ana");
        let member_b = Member::new(group.id, "Ben");
        let other_group = sample_group();
        let outsider = Member::new(other_group.id, "Zoe");

        store
            .enqueue(OpKind::Insert, &OpPayload::Members(member_a))
            .await
            .unwrap();
        store
            .enqueue(OpKind::Insert, &OpPayload::Members(member_b))
            .await
            .unwrap();
        let keep = store
            .enqueue(OpKind::Insert, &OpPayload::Members(outsider))
            .await
            .unwrap();

        let removed = store
            .remove_ops_for_record(*group.id.as_uuid())
            .await
            .unwrap();
        assert_eq!(removed.len(), 2);

        let rows = store.load_queue().await.unwrap();
        assert_eq!(rows.len(), 1);
        let QueueRow::Valid(op) = &rows[0] else {
            panic!("expected valid row");
        };
        assert_eq!(op.id, keep);
    }
}
