//! Data layer module
//!
//! SQLite persistence for bridge-side state: entities, profile overlays,
//! follow relationships in both directions, and the AP <-> CC object
//! cross reference.

mod database;
mod models;

pub use database::Database;
pub use models::*;
