//! Pending-queue compaction.
//!
//! A chain of operations targeting the same record whose first entry is
//! an insert and whose last entry is a delete never needs to reach the
//! remote service: the record's end state is absence, and it was never
//! created remotely. Such chains collapse to nothing. Every other chain
//! is kept in full, in original queue order.

use tabsync_types::{OpKind, QueuedOperation};

/// Compact a FIFO snapshot of the queue.
///
/// Returns `(surviving, dropped_ids)`. Surviving operations keep their
/// relative order; `dropped_ids` lists queue identifiers whose whole
/// insert..delete chain was eliminated, so the caller can remove them
/// from the durable log.
pub fn compact(ops: Vec<QueuedOperation>) -> (Vec<QueuedOperation>, Vec<i64>) {
    let mut dropped: Vec<i64> = Vec::new();

    // Walk each record's chain once; record ids are unique across tables.
    let mut seen: Vec<uuid::Uuid> = Vec::new();
    for op in &ops {
        let record = op.record_id();
        if seen.contains(&record) {
            continue;
        }
        seen.push(record);

        let chain: Vec<&QueuedOperation> =
            ops.iter().filter(|o| o.record_id() == record).collect();
        let first = chain.first().map(|o| o.kind);
        let last = chain.last().map(|o| o.kind);
        if first == Some(OpKind::Insert) && last == Some(OpKind::Delete) {
            dropped.extend(chain.iter().map(|o| o.id));
        }
    }

    let surviving = ops
        .into_iter()
        .filter(|op| !dropped.contains(&op.id))
        .collect();
    (surviving, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tabsync_types::{Group, Member, OpPayload};

    fn op(id: i64, kind: OpKind, payload: OpPayload) -> QueuedOperation {
        QueuedOperation {
            id,
            kind,
            payload,
            attempts: 0,
            last_attempt_at: None,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn insert_update_delete_chain_collapses_to_nothing() {
        let group = Group::new("Trip", "EUR");
        let ops = vec![
            op(1, OpKind::Insert, OpPayload::Groups(group.clone())),
            op(2, OpKind::Update, OpPayload::Groups(group.clone())),
            op(3, OpKind::Delete, OpPayload::Groups(group)),
        ];
        let (surviving, dropped) = compact(ops);
        assert!(surviving.is_empty());
        assert_eq!(dropped, vec![1, 2, 3]);
    }

    #[test]
    fn update_then_delete_is_kept() {
        // The record exists remotely; the delete must be applied.
        let group = Group::new("Trip", "EUR");
        let ops = vec![
            op(1, OpKind::Update, OpPayload::Groups(group.clone())),
            op(2, OpKind::Delete, OpPayload::Groups(group)),
        ];
        let (surviving, dropped) = compact(ops);
        assert_eq!(surviving.len(), 2);
        assert!(dropped.is_empty());
    }

    #[test]
    fn other_records_are_untouched_and_order_preserved() {
        let trip = Group::new("Trip", "EUR");
        let flat = Group::new("Flat", "EUR");
        let member = Member::new(flat.id, "Dana");
        let ops = vec![
            op(1, OpKind::Insert, OpPayload::Groups(trip.clone())),
            op(2, OpKind::Insert, OpPayload::Members(member.clone())),
            op(3, OpKind::Update, OpPayload::Groups(trip.clone())),
            op(4, OpKind::Update, OpPayload::Members(member)),
            op(5, OpKind::Delete, OpPayload::Groups(trip)),
        ];
        let (surviving, dropped) = compact(ops);
        assert_eq!(dropped, vec![1, 3, 5]);
        let ids: Vec<i64> = surviving.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![2, 4]);
    }

    #[test]
    fn lone_insert_survives() {
        let group = Group::new("Trip", "EUR");
        let ops = vec![op(1, OpKind::Insert, OpPayload::Groups(group))];
        let (surviving, dropped) = compact(ops);
        assert_eq!(surviving.len(), 1);
        assert!(dropped.is_empty());
    }

    #[test]
    fn empty_queue_compacts_to_empty() {
        let (surviving, dropped) = compact(Vec::new());
        assert!(surviving.is_empty());
        assert!(dropped.is_empty());
    }
}
