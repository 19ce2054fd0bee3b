use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

/// Tolerance for every "more than zero" / "less than zero" meter comparison.
pub const METERS_EPSILON: f64 = 1e-9;

/// Remaining meters at or below this mark a roll as `Low`.
pub const DEFAULT_LOW_STOCK_METERS: f64 = 5.0;

/// A physical roll of fabric. `available_meters` is derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FabricRoll {
    pub id: Ulid,
    pub article: String,
    pub roll_number: String,
    #[serde(default)]
    pub supplier: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub total_meters: f64,
    #[serde(default)]
    pub reserved_meters: f64,
    #[serde(default)]
    pub last_edited_at: Option<Ms>,
}

impl FabricRoll {
    pub fn new(id: Ulid, new: NewRoll) -> Self {
        Self {
            id,
            article: new.article,
            roll_number: new.roll_number,
            supplier: new.supplier,
            color: new.color,
            description: new.description,
            total_meters: new.total_meters,
            reserved_meters: 0.0,
            last_edited_at: None,
        }
    }

    pub fn available_meters(&self) -> f64 {
        self.total_meters - self.reserved_meters
    }

    /// Capacity a transfer may still land on this roll (never negative).
    pub fn spare_meters(&self) -> f64 {
        self.available_meters().max(0.0)
    }

    pub fn is_overbooked(&self) -> bool {
        self.available_meters() < -METERS_EPSILON
    }

    pub fn stock_status(&self, low_threshold: f64) -> StockStatus {
        let available = self.available_meters();
        if available < -METERS_EPSILON {
            StockStatus::Overbooked
        } else if available <= low_threshold {
            StockStatus::Low
        } else {
            StockStatus::Ok
        }
    }

    /// FIFO order: article, then roll number as a plain string, then id.
    /// `"10"` sorts before `"9"`.
    pub fn fifo_cmp(&self, other: &FabricRoll) -> Ordering {
        self.article
            .cmp(&other.article)
            .then_with(|| self.roll_number.cmp(&other.roll_number))
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockStatus {
    Ok,
    Low,
    Overbooked,
}

impl StockStatus {
    pub fn label(&self) -> &'static str {
        match self {
            StockStatus::Ok => "OK",
            StockStatus::Low => "Low",
            StockStatus::Overbooked => "Overbooked",
        }
    }
}

/// Input for a freshly received roll. Reservation always starts at zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRoll {
    pub article: String,
    pub roll_number: String,
    pub supplier: String,
    pub color: String,
    pub description: String,
    pub total_meters: f64,
}

/// Direct edit of a roll. `None` leaves the field untouched.
///
/// Setting `reserved_meters` above `total_meters` is accepted; the next heal
/// pass picks it up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollPatch {
    pub total_meters: Option<f64>,
    pub reserved_meters: Option<f64>,
    pub color: Option<String>,
    pub description: Option<String>,
}

impl RollPatch {
    pub fn is_empty(&self) -> bool {
        self.total_meters.is_none()
            && self.reserved_meters.is_none()
            && self.color.is_none()
            && self.description.is_none()
    }

    pub(crate) fn apply(&self, roll: &mut FabricRoll, edited_at: Ms) {
        if let Some(total) = self.total_meters {
            roll.total_meters = total;
        }
        if let Some(reserved) = self.reserved_meters {
            roll.reserved_meters = reserved;
        }
        if let Some(color) = &self.color {
            roll.color = color.clone();
        }
        if let Some(description) = &self.description {
            roll.description = description.clone();
        }
        roll.last_edited_at = Some(edited_at);
    }
}

/// One write inside an atomic multi-roll commit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollWrite {
    pub id: Ulid,
    /// Reservation the writer read; the commit fails if the roll moved since.
    pub expected_reserved: f64,
    pub reserved_meters: f64,
}

// ── Orders and demand ────────────────────────────────────────────

/// A roll an order already names, with the meters it takes from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedRoll {
    pub roll_number: String,
    pub reserved: f64,
}

/// An order as the demand source keeps it. Quantities may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDocument {
    pub id: Ulid,
    pub client: String,
    pub fabric_code: String,
    pub fabric_description: String,
    pub fabric_consumption: Option<f64>,
    pub ordered_quantity: Option<f64>,
    pub order_date: Option<String>,
    pub assigned_rolls: Vec<AssignedRoll>,
    pub actual_consumed_meters: Option<f64>,
    pub actual_cut_meters: Option<f64>,
    /// Production stage, e.g. `"In Stitching"` or `"Delivered"`.
    pub status: Option<String>,
    pub cut_date: Option<String>,
    /// Roll recorded on the order itself, used when no roll is assigned.
    pub roll_number: Option<String>,
}

/// Stages an order reaches only after its fabric has been cut.
pub fn is_cut_status(status: &str) -> bool {
    let s = status.trim().to_lowercase();
    matches!(s.as_str(), "in stitching" | "qc" | "packing" | "delivered") || s.starts_with("qc-recontrol")
}

impl OrderDocument {
    pub fn is_cut(&self) -> bool {
        self.status.as_deref().is_some_and(is_cut_status)
    }
}

/// A correction to an order's cut. Lives in the order's `recuts` subcollection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecutRecord {
    pub id: Ulid,
    pub meters: f64,
    pub reason: Option<String>,
    pub timestamp: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemandRecord {
    pub order_id: Ulid,
    pub client: String,
    pub article: String,
    pub reserved: f64,
    /// Roll number the order already names; such demand skips FIFO.
    pub assigned_roll: Option<String>,
    pub order_date: Option<String>,
}

impl DemandRecord {
    /// Meters to place. Negative or non-finite demand places nothing.
    pub fn meters(&self) -> f64 {
        if self.reserved.is_finite() && self.reserved > 0.0 {
            self.reserved
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollAssignment {
    /// `id` is `None` only for a pre-assigned roll number no roll carries.
    Roll { id: Option<Ulid>, roll_number: String },
    Unassigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationStatus {
    Ok,
    Overbooked,
}

impl AllocationStatus {
    pub fn label(&self) -> &'static str {
        match self {
            AllocationStatus::Ok => "OK",
            AllocationStatus::Overbooked => "Overbooked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationLineItem {
    pub order_id: Ulid,
    pub client: String,
    pub article: String,
    pub roll: RollAssignment,
    pub meters: f64,
    pub status: AllocationStatus,
    pub order_date: Option<String>,
}

impl AllocationLineItem {
    pub fn roll_number(&self) -> Option<&str> {
        match &self.roll {
            RollAssignment::Roll { roll_number, .. } => Some(roll_number),
            RollAssignment::Unassigned => None,
        }
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    RollAdded {
        roll: FabricRoll,
    },
    RollUpdated {
        id: Ulid,
        patch: RollPatch,
        edited_at: Ms,
    },
    RollDeleted {
        id: Ulid,
    },
    ReservationAdded {
        roll_id: Ulid,
        meters: f64,
    },
    /// All writes of one transaction. Replayed as a unit.
    ReservationsCommitted {
        writes: Vec<RollWrite>,
    },
    OrderPut {
        order: OrderDocument,
    },
    OrderDeleted {
        id: Ulid,
    },
    RecutAdded {
        order_id: Ulid,
        recut: RecutRecord,
    },
}
