//! Repairs overbooked rolls by moving their deficit onto later rolls.
//!
//! A pass reads every roll, sorts them into FIFO order and scans once. For
//! each roll over capacity it finds the first later roll with spare meters
//! and commits one two-roll transaction. At most one transfer happens per
//! overbooked roll per pass. A deficit with no taker is reported and left
//! in the store as it is.

mod plan;

pub use plan::{plan_pass, sort_for_healing, HealStep, PlannedTransfer, UnresolvedDeficit};

use std::time::Instant;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::*;
use crate::store::{InventoryStore, StoreError};

use plan::Step;

/// Which later rolls may take a deficit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransferScope {
    /// Any later roll in scan order, even one of the next article.
    #[default]
    FollowingRolls,
    /// Only later rolls of the same article.
    SameArticle,
}

impl TransferScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "following" | "following_rolls" => Some(Self::FollowingRolls),
            "same_article" | "article" => Some(Self::SameArticle),
            _ => None,
        }
    }
}

/// What the source roll is written as after a partial transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResidualHandling {
    /// Exactly its capacity. Whatever the target could not take is dropped.
    #[default]
    Saturate,
    /// Capacity plus the untransferred residual, so the next pass sees it.
    Retain,
}

impl ResidualHandling {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "saturate" => Some(Self::Saturate),
            "retain" => Some(Self::Retain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealPolicy {
    pub scope: TransferScope,
    pub residual: ResidualHandling,
    /// Passes run until one commits nothing or this many have run.
    pub max_passes: u32,
    /// Fresh re-reads after a conflicting commit before giving up on a pair.
    pub max_conflict_retries: u32,
}

impl Default for HealPolicy {
    fn default() -> Self {
        Self {
            scope: TransferScope::FollowingRolls,
            residual: ResidualHandling::Saturate,
            max_passes: 1,
            max_conflict_retries: 3,
        }
    }
}

/// A transfer that kept conflicting with concurrent writers.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferConflict {
    pub from: Ulid,
    pub to: Ulid,
    pub meters: f64,
    /// Commit attempts made, the first one included.
    pub attempts: u32,
}

impl std::fmt::Display for TransferConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "transfer of {:.2} m from roll {} to roll {} conflicted {} times",
            self.meters, self.from, self.to, self.attempts
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Committed(PlannedTransfer),
    /// The source was back within capacity once re-read.
    AlreadyHealed,
    Unresolved(UnresolvedDeficit),
    Conflict(TransferConflict),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealReport {
    pub passes: u32,
    pub transfers: Vec<PlannedTransfer>,
    /// Deficits found by the last pass with nowhere to go.
    pub unresolved: Vec<UnresolvedDeficit>,
    pub conflicts: Vec<TransferConflict>,
    /// Roll documents written.
    pub writes: usize,
}

impl HealReport {
    pub fn is_noop(&self) -> bool {
        self.writes == 0
    }

    pub fn meters_transferred(&self) -> f64 {
        self.transfers.iter().map(|t| t.meters).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HealError {
    Store(StoreError),
}

impl From<StoreError> for HealError {
    fn from(e: StoreError) -> Self {
        HealError::Store(e)
    }
}

impl std::fmt::Display for HealError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealError::Store(e) => write!(f, "heal aborted: {e}"),
        }
    }
}

impl std::error::Error for HealError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HealError::Store(e) => Some(e),
        }
    }
}

pub struct Healer<'a, S: InventoryStore + ?Sized> {
    store: &'a S,
    policy: HealPolicy,
}

impl<'a, S: InventoryStore + ?Sized> Healer<'a, S> {
    pub fn new(store: &'a S, policy: HealPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &HealPolicy {
        &self.policy
    }

    /// Run passes against the store. Conflicts that outlast their retries
    /// are reported, not raised; any other store failure aborts.
    pub async fn heal(&self) -> Result<HealReport, HealError> {
        let mut report = HealReport::default();
        while report.passes < self.policy.max_passes.max(1) {
            if self.pass(&mut report).await? == 0 {
                break;
            }
        }

        if report.is_noop() {
            debug!(passes = report.passes, unresolved = report.unresolved.len(), "nothing to heal");
        } else {
            info!(
                passes = report.passes,
                transfers = report.transfers.len(),
                meters = report.meters_transferred(),
                unresolved = report.unresolved.len(),
                conflicts = report.conflicts.len(),
                "heal complete"
            );
        }
        Ok(report)
    }

    /// Try again a transfer given up on earlier, from fresh reads.
    pub async fn retry(&self, conflict: &TransferConflict) -> Result<TransferOutcome, HealError> {
        let mut rolls = self.store.list_rolls().await?;
        sort_for_healing(&mut rolls);
        let Some(i) = rolls.iter().position(|r| r.id == conflict.from) else {
            return Ok(TransferOutcome::AlreadyHealed);
        };
        match plan::step_at(&rolls, i, &self.policy) {
            Some(step) => self.settle(&mut rolls, i, step).await,
            None => Ok(TransferOutcome::AlreadyHealed),
        }
    }

    /// One scan. Returns the number of transfers committed.
    async fn pass(&self, report: &mut HealReport) -> Result<usize, HealError> {
        let started = Instant::now();
        let mut rolls = self.store.list_rolls().await?;
        sort_for_healing(&mut rolls);
        report.passes += 1;
        report.unresolved.clear();
        metrics::counter!(HEAL_PASSES_TOTAL).increment(1);

        let mut committed = 0;
        for i in 0..rolls.len() {
            let Some(step) = plan::step_at(&rolls, i, &self.policy) else {
                continue;
            };
            match self.settle(&mut rolls, i, step).await? {
                TransferOutcome::Committed(transfer) => {
                    committed += 1;
                    report.writes += 2;
                    report.transfers.push(transfer);
                }
                TransferOutcome::Unresolved(deficit) => report.unresolved.push(deficit),
                TransferOutcome::Conflict(conflict) => report.conflicts.push(conflict),
                TransferOutcome::AlreadyHealed => {}
            }
        }

        metrics::histogram!(HEAL_PASS_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        Ok(committed)
    }

    /// Carry out one step, re-reading and re-planning after each conflict.
    async fn settle(
        &self,
        rolls: &mut [FabricRoll],
        i: usize,
        mut step: Step,
    ) -> Result<TransferOutcome, HealError> {
        let mut attempts = 0;
        loop {
            let (plan, target) = match step {
                Step::Transfer { plan, target } => (plan, target),
                Step::Unresolved(deficit) => {
                    warn!(
                        roll = %deficit.roll,
                        article = %deficit.article,
                        roll_number = %deficit.roll_number,
                        deficit = deficit.deficit,
                        "overbooked roll has no later roll with spare meters"
                    );
                    metrics::counter!(HEAL_UNRESOLVED_TOTAL).increment(1);
                    return Ok(TransferOutcome::Unresolved(deficit));
                }
            };

            attempts += 1;
            match self.store.commit(plan.transaction()).await {
                Ok(()) => {
                    rolls[i].reserved_meters = plan.from_reserved;
                    rolls[target].reserved_meters = plan.to_reserved;
                    info!(
                        from = %plan.from,
                        to = %plan.to,
                        meters = plan.meters,
                        residual = plan.residual(),
                        "moved deficit to later roll"
                    );
                    metrics::counter!(HEAL_TRANSFERS_TOTAL).increment(1);
                    metrics::histogram!(HEAL_TRANSFER_METERS).record(plan.meters);
                    return Ok(TransferOutcome::Committed(plan));
                }
                Err(e @ (StoreError::Conflict(_) | StoreError::NotFound(_))) => {
                    if attempts > self.policy.max_conflict_retries {
                        warn!(from = %plan.from, to = %plan.to, attempts, "giving up on conflicting transfer");
                        metrics::counter!(HEAL_CONFLICTS_TOTAL).increment(1);
                        return Ok(TransferOutcome::Conflict(TransferConflict {
                            from: plan.from,
                            to: plan.to,
                            meters: plan.meters,
                            attempts,
                        }));
                    }
                    debug!(from = %plan.from, to = %plan.to, attempts, "transfer conflicted: {e}");
                    self.refresh(rolls, i).await?;
                    self.refresh(rolls, target).await?;
                    match plan::step_at(rolls, i, &self.policy) {
                        Some(next) => step = next,
                        None => return Ok(TransferOutcome::AlreadyHealed),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn refresh(&self, rolls: &mut [FabricRoll], i: usize) -> Result<(), HealError> {
        match self.store.get_roll(rolls[i].id).await? {
            Some(fresh) => rolls[i] = fresh,
            // Deleted since the scan began: an empty roll neither gives nor takes.
            None => {
                rolls[i].total_meters = 0.0;
                rolls[i].reserved_meters = 0.0;
            }
        }
        Ok(())
    }
}
