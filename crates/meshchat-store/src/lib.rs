//! # meshchat-store
//!
//! Local persistence for the meshchat core, backed by SQLite.
//!
//! Only the state that must survive a restart lives here: the ids we already
//! sent read receipts for, the fingerprints we verified out of band, the
//! favorites relationship table, blocked peers, the store-and-forward
//! outbox and direct-message history. Public timelines and identity address
//! maps are volatile and stay in memory.

pub mod blocked;
pub mod database;
pub mod favorites;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod outbox;
pub mod receipts;
pub mod verified;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
