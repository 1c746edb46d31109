//! Per-member balance calculation.
//!
//! Balances derive from the group ledger: every expense credits its payer
//! by the full amount converted to the group base currency and debits
//! each split's debtor by that split's share; every settlement credits
//! the payer and debits the payee (a settlement behaves like a negative
//! expense between exactly two members). Conversion always uses the rate
//! captured at expense creation, never a live rate, so historical
//! balances never shift retroactively.
//!
//! The computation is pure: each call builds its own result and identical
//! inputs always yield identical outputs, so it is safe to invoke
//! concurrently with itself.

use std::collections::BTreeMap;
use tabsync_types::{Expense, Member, MemberId, Settlement, Split};

/// Tolerance for the zero-sum invariant and for treating a balance as
/// settled, in currency minor units.
pub const ZERO_SUM_EPSILON: f64 = 0.01;

/// Round an amount to currency minor-unit precision (two decimals).
pub fn round_minor(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Compute the net balance of every member in the group base currency.
///
/// Positive means the group owes the member; negative means the member
/// owes the group. Every listed member appears in the result, defaulting
/// to zero. The sum of all balances is zero within
/// [`ZERO_SUM_EPSILON`] - the core correctness invariant of the ledger.
pub fn compute_balances(
    expenses: &[Expense],
    splits: &[Split],
    settlements: &[Settlement],
    members: &[Member],
) -> BTreeMap<MemberId, f64> {
    let mut balances: BTreeMap<MemberId, f64> =
        members.iter().map(|m| (m.id, 0.0)).collect();

    for expense in expenses {
        *balances.entry(expense.payer_id).or_insert(0.0) += expense.base_amount();
        for split in splits.iter().filter(|s| s.expense_id == expense.id) {
            *balances.entry(split.member_id).or_insert(0.0) -= split.amount;
        }
    }

    for settlement in settlements {
        *balances.entry(settlement.payer_id).or_insert(0.0) += settlement.amount;
        *balances.entry(settlement.payee_id).or_insert(0.0) -= settlement.amount;
    }

    for amount in balances.values_mut() {
        *amount = round_minor(*amount);
    }
    balances
}
