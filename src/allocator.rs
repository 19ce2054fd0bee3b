//! FIFO split of demand over roll capacity.
//!
//! Pure: reads roll capacities, never reservations, and never writes. One
//! `allocate` call shares a single usage map across all of its demands, so
//! earlier demands get first claim on the oldest rolls.

use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

/// One roll as the allocator sees it: identity and fixed capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct RollCapacity {
    pub id: Ulid,
    pub roll_number: String,
    pub total_meters: f64,
}

/// Rolls grouped by article, each group in FIFO order.
#[derive(Debug, Clone, Default)]
pub struct RollIndex {
    by_article: HashMap<String, Vec<RollCapacity>>,
}

impl RollIndex {
    /// Group and order rolls. Roll numbers compare as strings (`"10"` before
    /// `"9"`); equal numbers fall back to id so input order never matters.
    pub fn from_rolls<'a>(rolls: impl IntoIterator<Item = &'a FabricRoll>) -> Self {
        let mut by_article: HashMap<String, Vec<RollCapacity>> = HashMap::new();
        for roll in rolls {
            by_article
                .entry(roll.article.clone())
                .or_default()
                .push(RollCapacity {
                    id: roll.id,
                    roll_number: roll.roll_number.clone(),
                    total_meters: roll.total_meters,
                });
        }
        for group in by_article.values_mut() {
            group.sort_by(|a, b| {
                a.roll_number
                    .cmp(&b.roll_number)
                    .then_with(|| a.id.cmp(&b.id))
            });
        }
        Self { by_article }
    }

    pub fn rolls_for(&self, article: &str) -> &[RollCapacity] {
        self.by_article
            .get(article)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn find(&self, article: &str, roll_number: &str) -> Option<&RollCapacity> {
        self.rolls_for(article)
            .iter()
            .find(|r| r.roll_number == roll_number)
    }

    pub fn article_count(&self) -> usize {
        self.by_article.len()
    }
}

/// Split every demand over its article's rolls, oldest roll first.
///
/// Demands are processed in slice order. For each demand the emitted meters
/// (OK plus Overbooked) add up to `demand.meters()`. Demand naming a roll
/// skips FIFO and yields a single OK line for that roll.
pub fn allocate(demands: &[DemandRecord], index: &RollIndex) -> Vec<AllocationLineItem> {
    let mut used: HashMap<Ulid, f64> = HashMap::new();
    let mut lines = Vec::with_capacity(demands.len());

    for demand in demands {
        if let Some(roll_number) = &demand.assigned_roll {
            let id = index.find(&demand.article, roll_number).map(|r| r.id);
            lines.push(line(
                demand,
                RollAssignment::Roll {
                    id,
                    roll_number: roll_number.clone(),
                },
                demand.meters(),
                AllocationStatus::Ok,
            ));
            continue;
        }

        let mut remaining = demand.meters();
        for roll in index.rolls_for(&demand.article) {
            if remaining <= METERS_EPSILON {
                break;
            }
            let used_so_far = used.entry(roll.id).or_insert(0.0);
            let available = (roll.total_meters - *used_so_far).max(0.0);
            let take = available.min(remaining);
            if take > METERS_EPSILON {
                *used_so_far += take;
                remaining -= take;
                lines.push(line(
                    demand,
                    RollAssignment::Roll {
                        id: Some(roll.id),
                        roll_number: roll.roll_number.clone(),
                    },
                    take,
                    AllocationStatus::Ok,
                ));
            }
        }

        if remaining > METERS_EPSILON {
            tracing::debug!(
                order_id = %demand.order_id,
                article = %demand.article,
                meters = remaining,
                "demand exceeds roll capacity"
            );
            metrics::histogram!(crate::observability::ALLOCATION_OVERBOOKED_METERS).record(remaining);
            lines.push(line(
                demand,
                RollAssignment::Unassigned,
                remaining,
                AllocationStatus::Overbooked,
            ));
        }
    }

    lines
}

fn line(
    demand: &DemandRecord,
    roll: RollAssignment,
    meters: f64,
    status: AllocationStatus,
) -> AllocationLineItem {
    AllocationLineItem {
        order_id: demand.order_id,
        client: demand.client.clone(),
        article: demand.article.clone(),
        roll,
        meters,
        status,
        order_date: demand.order_date.clone(),
    }
}

/// Meters placed on rolls vs. meters that found no capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AllocationTotals {
    pub ok_meters: f64,
    pub overbooked_meters: f64,
}

impl AllocationTotals {
    pub fn of(lines: &[AllocationLineItem]) -> Self {
        lines.iter().fold(Self::default(), |mut acc, l| {
            match l.status {
                AllocationStatus::Ok => acc.ok_meters += l.meters,
                AllocationStatus::Overbooked => acc.overbooked_meters += l.meters,
            }
            acc
        })
    }

    pub fn total(&self) -> f64 {
        self.ok_meters + self.overbooked_meters
    }
}
