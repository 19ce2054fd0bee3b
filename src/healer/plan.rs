use ulid::Ulid;

use crate::model::*;
use crate::store::Transaction;

use super::{HealPolicy, ResidualHandling, TransferScope};

/// One deficit moved from an overbooked roll onto a later roll.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTransfer {
    pub from: Ulid,
    pub to: Ulid,
    /// How far `from` was over capacity.
    pub deficit: f64,
    /// Meters moved onto `to`; at most `deficit`.
    pub meters: f64,
    pub from_expected: f64,
    pub from_reserved: f64,
    pub to_expected: f64,
    pub to_reserved: f64,
}

impl PlannedTransfer {
    /// Deficit left over after a partial transfer.
    pub fn residual(&self) -> f64 {
        (self.deficit - self.meters).max(0.0)
    }

    /// The pair write, conditional on both rolls still holding what was read.
    pub fn transaction(&self) -> Transaction {
        Transaction::new()
            .write(self.from, self.from_expected, self.from_reserved)
            .write(self.to, self.to_expected, self.to_reserved)
    }
}

/// An overbooked roll with no later roll able to take its deficit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedDeficit {
    pub roll: Ulid,
    pub article: String,
    pub roll_number: String,
    pub deficit: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HealStep {
    Transfer(PlannedTransfer),
    Unresolved(UnresolvedDeficit),
}

/// A step plus the scan index of its target.
pub(super) enum Step {
    Transfer { plan: PlannedTransfer, target: usize },
    Unresolved(UnresolvedDeficit),
}

impl Step {
    fn into_public(self) -> HealStep {
        match self {
            Step::Transfer { plan, .. } => HealStep::Transfer(plan),
            Step::Unresolved(deficit) => HealStep::Unresolved(deficit),
        }
    }
}

/// Put rolls in scan order: article, then roll number as a string.
pub fn sort_for_healing(rolls: &mut [FabricRoll]) {
    rolls.sort_by(FabricRoll::fifo_cmp);
}

/// What the healer does about roll `i`, or `None` if it is within capacity.
///
/// The target is the first later roll with spare capacity. Under
/// `TransferScope::FollowingRolls` that roll may belong to another article.
pub(super) fn step_at(rolls: &[FabricRoll], i: usize, policy: &HealPolicy) -> Option<Step> {
    let source = &rolls[i];
    if !source.is_overbooked() {
        return None;
    }
    let deficit = -source.available_meters();

    let target = rolls
        .iter()
        .enumerate()
        .skip(i + 1)
        .find(|(_, r)| {
            r.spare_meters() > METERS_EPSILON
                && match policy.scope {
                    TransferScope::FollowingRolls => true,
                    TransferScope::SameArticle => r.article == source.article,
                }
        });

    let Some((j, to)) = target else {
        return Some(Step::Unresolved(UnresolvedDeficit {
            roll: source.id,
            article: source.article.clone(),
            roll_number: source.roll_number.clone(),
            deficit,
        }));
    };

    let meters = to.spare_meters().min(deficit);
    let from_reserved = match policy.residual {
        ResidualHandling::Saturate => source.total_meters,
        ResidualHandling::Retain => source.total_meters + (deficit - meters),
    };
    Some(Step::Transfer {
        plan: PlannedTransfer {
            from: source.id,
            to: to.id,
            deficit,
            meters,
            from_expected: source.reserved_meters,
            from_reserved,
            to_expected: to.reserved_meters,
            to_reserved: to.reserved_meters + meters,
        },
        target: j,
    })
}

/// One heal pass over a snapshot, without touching any store.
///
/// Each transfer is applied to the working copy before the scan moves on,
/// so a roll that received meters offers only what it has left.
pub fn plan_pass(rolls: &[FabricRoll], policy: &HealPolicy) -> Vec<HealStep> {
    let mut working = rolls.to_vec();
    sort_for_healing(&mut working);

    let mut steps = Vec::new();
    for i in 0..working.len() {
        let Some(step) = step_at(&working, i, policy) else {
            continue;
        };
        if let Step::Transfer { plan, target } = &step {
            working[i].reserved_meters = plan.from_reserved;
            working[*target].reserved_meters = plan.to_reserved;
        }
        steps.push(step.into_public());
    }
    steps
}
