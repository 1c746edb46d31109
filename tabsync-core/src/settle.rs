//! Debt simplification.
//!
//! Reduces a multi-party net-balance map to a short list of pairwise
//! payments: repeatedly match the largest remaining creditor with the
//! largest remaining debtor and settle the smaller of the two amounts.
//! Ties are broken toward the lower member identifier so the output is
//! reproducible. Greedy matching is bounded at N - 1 transfers for N
//! non-zero parties; it does not globally minimize in every topology.

use crate::balance::{round_minor, ZERO_SUM_EPSILON};
use std::collections::BTreeMap;
use tabsync_types::MemberId;

/// A suggested payment from one member to another.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    /// The paying member.
    pub from: MemberId,
    /// The receiving member.
    pub to: MemberId,
    /// Amount in the group base currency, minor-unit rounded.
    pub amount: f64,
}

/// Reduce net balances to an ordered list of settling transfers.
///
/// Re-applying the emitted transfers as settlements drives every balance
/// to zero within [`ZERO_SUM_EPSILON`].
pub fn simplify_debts(balances: &BTreeMap<MemberId, f64>) -> Vec<Transfer> {
    // (id, remaining). BTreeMap iteration gives ascending id order, which
    // the max-scan relies on for the lower-id tie-break.
    let mut creditors: Vec<(MemberId, f64)> = Vec::new();
    let mut debtors: Vec<(MemberId, f64)> = Vec::new();
    for (&id, &amount) in balances {
        if amount > ZERO_SUM_EPSILON {
            creditors.push((id, amount));
        } else if amount < -ZERO_SUM_EPSILON {
            debtors.push((id, -amount));
        }
    }

    let mut transfers = Vec::new();
    while !debtors.is_empty() && !creditors.is_empty() {
        let ci = index_of_max(&creditors);
        let di = index_of_max(&debtors);

        let amount = round_minor(creditors[ci].1.min(debtors[di].1));
        transfers.push(Transfer {
            from: debtors[di].0,
            to: creditors[ci].0,
            amount,
        });

        creditors[ci].1 -= amount;
        debtors[di].1 -= amount;
        if creditors[ci].1 <= ZERO_SUM_EPSILON {
            creditors.remove(ci);
        }
        if debtors[di].1 <= ZERO_SUM_EPSILON {
            debtors.remove(di);
        }
    }
    transfers
}

/// Index of the largest remaining amount; first (lowest id) wins ties.
fn index_of_max(entries: &[(MemberId, f64)]) -> usize {
    let mut best = 0;
    for (i, entry) in entries.iter().enumerate().skip(1) {
        if entry.1 > entries[best].1 + f64::EPSILON {
            best = i;
        }
    }
    best
}
