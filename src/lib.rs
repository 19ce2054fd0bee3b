//! Fabric roll inventory: FIFO allocation of order demand over rolls, and
//! a healer that moves overbooked meters onto later rolls.

pub mod allocator;
pub mod config;
pub mod demand;
pub mod healer;
pub mod inventory;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod notify;
pub mod observability;
pub mod store;
pub mod wal;
