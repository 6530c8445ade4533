//! Domain model, events and step reconciliation

pub mod events;
pub mod model;
pub mod steps;
pub mod sync;
