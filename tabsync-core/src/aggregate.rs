//! Cross-group balance aggregation.
//!
//! A person usually shares several groups with the same people. This
//! module folds already-simplified per-group transfers into one list of
//! partners keyed by case-insensitive display name, each with a net
//! balance and a per-group breakdown, sorted by descending absolute net.

use crate::balance::round_minor;
use crate::settle::Transfer;
use std::collections::BTreeMap;
use tabsync_types::{GroupId, Member, MemberId};

/// One group's simplified ledger as seen by one person.
#[derive(Debug, Clone)]
pub struct GroupLedgerView {
    /// The group.
    pub group_id: GroupId,
    /// Display name of the group.
    pub group_name: String,
    /// The viewing person's membership in this group.
    pub me: MemberId,
    /// All members of the group (for display-name lookup).
    pub members: Vec<Member>,
    /// Output of debt simplification for this group.
    pub transfers: Vec<Transfer>,
}

/// A partner's share of the net balance within one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupShare {
    /// The group.
    pub group_id: GroupId,
    /// Display name of the group.
    pub group_name: String,
    /// Positive: the partner owes me in this group; negative: I owe them.
    pub amount: f64,
}

/// Aggregated balance against one partner across all shared groups.
#[derive(Debug, Clone, PartialEq)]
pub struct PartnerBalance {
    /// Partner display name (first spelling encountered).
    pub name: String,
    /// Net across all groups; positive means the partner owes me.
    pub net: f64,
    /// Per-group breakdown.
    pub per_group: Vec<GroupShare>,
}

/// Cross-group aggregation result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CrossGroupSummary {
    /// Partners sorted by descending absolute net balance.
    pub partners: Vec<PartnerBalance>,
    /// Sum of all positive nets.
    pub total_owed_to_me: f64,
    /// Sum of the magnitudes of all negative nets.
    pub total_i_owe: f64,
}

/// Fold per-group simplification output into a cross-group summary.
///
/// Partners are keyed by case-insensitive display name; transfers not
/// involving the viewing person are ignored.
pub fn aggregate_across_groups(views: &[GroupLedgerView]) -> CrossGroupSummary {
    // key: lowercased name -> (display name, shares)
    let mut partners: BTreeMap<String, (String, Vec<GroupShare>)> = BTreeMap::new();

    for view in views {
        for transfer in &view.transfers {
            let (partner_id, amount) = if transfer.to == view.me {
                (transfer.from, transfer.amount)
            } else if transfer.from == view.me {
                (transfer.to, -transfer.amount)
            } else {
                continue;
            };

            let Some(partner) = view.members.iter().find(|m| m.id == partner_id) else {
                continue;
            };
            let key = partner.name.to_lowercase();
            let entry = partners
                .entry(key)
                .or_insert_with(|| (partner.name.clone(), Vec::new()));
            entry.1.push(GroupShare {
                group_id: view.group_id,
                group_name: view.group_name.clone(),
                amount,
            });
        }
    }

    let mut result: Vec<PartnerBalance> = partners
        .into_values()
        .map(|(name, per_group)| {
            let net = round_minor(per_group.iter().map(|s| s.amount).sum());
            PartnerBalance { name, net, per_group }
        })
        .collect();

    // Descending |net|; equal magnitudes fall back to name order for
    // reproducible output.
    result.sort_by(|a, b| {
        b.net
            .abs()
            .partial_cmp(&a.net.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });

    let total_owed_to_me = round_minor(result.iter().filter(|p| p.net > 0.0).map(|p| p.net).sum());
    let total_i_owe = round_minor(
        result
            .iter()
            .filter(|p| p.net < 0.0)
            .map(|p| -p.net)
            .sum(),
    );

    CrossGroupSummary {
        partners: result,
        total_owed_to_me,
        total_i_owe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsync_types::Group;

    fn view(
        group_name: &str,
        me_name: &str,
        partner_names: &[&str],
    ) -> (GroupLedgerView, Vec<MemberId>) {
        let group = Group::new(group_name, "EUR");
        let me = Member::new(group.id, me_name);
        let mut members = vec![me.clone()];
        let mut partner_ids = Vec::new();
        for name in partner_names {
            let m = Member::new(group.id, name);
            partner_ids.push(m.id);
            members.push(m);
        }
        let v = GroupLedgerView {
            group_id: group.id,
            group_name: group_name.to_string(),
            me: me.id,
            members,
            transfers: Vec::new(),
        };
        (v, partner_ids)
    }

    #[test]
    fn partner_balances_merge_across_groups_by_name() {
        let (mut trip, trip_ids) = view("Trip", "Me", &["Bob"]);
        let (mut flat, flat_ids) = view("Flat", "Me", &["bob"]);

        // Bob owes me 30 in Trip; I owe bob 10 in Flat.
        trip.transfers.push(Transfer {
            from: trip_ids[0],
            to: trip.me,
            amount: 30.0,
        });
        flat.transfers.push(Transfer {
            from: flat.me,
            to: flat_ids[0],
            amount: 10.0,
        });

        let summary = aggregate_across_groups(&[trip, flat]);
        assert_eq!(summary.partners.len(), 1);
        let bob = &summary.partners[0];
        assert_eq!(bob.name, "Bob");
        assert_eq!(bob.net, 20.0);
        assert_eq!(bob.per_group.len(), 2);
        assert_eq!(summary.total_owed_to_me, 20.0);
        assert_eq!(summary.total_i_owe, 0.0);
    }

    #[test]
    fn sorted_by_descending_absolute_net() {
        let (mut v, ids) = view("Trip", "Me", &["Ana", "Ben", "Cleo"]);
        v.transfers.push(Transfer {
            from: ids[0],
            to: v.me,
            amount: 5.0,
        });
        v.transfers.push(Transfer {
            from: v.me,
            to: ids[1],
            amount: 50.0,
        });
        v.transfers.push(Transfer {
            from: ids[2],
            to: v.me,
            amount: 20.0,
        });

        let summary = aggregate_across_groups(&[v]);
        let names: Vec<&str> = summary.partners.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Ben", "Cleo", "Ana"]);
        assert_eq!(summary.total_owed_to_me, 25.0);
        assert_eq!(summary.total_i_owe, 50.0);
    }

    #[test]
    fn transfers_between_other_members_are_ignored() {
        let (mut v, ids) = view("Trip", "Me", &["Ana", "Ben"]);
        v.transfers.push(Transfer {
            from: ids[0],
            to: ids[1],
            amount: 40.0,
        });

        let summary = aggregate_across_groups(&[v]);
        assert!(summary.partners.is_empty());
        assert_eq!(summary.total_owed_to_me, 0.0);
    }

    #[test]
    fn empty_input_gives_empty_summary() {
        let summary = aggregate_across_groups(&[]);
        assert_eq!(summary, CrossGroupSummary::default());
    }
}
