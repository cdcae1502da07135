//! Core engine for the cadence sprint board: data model, rank key space,
//! append-only change log, state-transition engine with a review gate,
//! point-in-time reconstruction, and the SQLite store behind them.
//!
//! # Conventions
//!
//! - **Errors**: every fallible public function returns
//!   [`error::Result`]; the [`error::Error`] taxonomy maps one-to-one onto
//!   caller-facing outcomes (not-found, validation, gate-blocked,
//!   transient conflict, unauthorized, storage).
//! - **Logging**: `tracing` macros; the crates install no subscriber.
//! - **History**: the change log is the single source of historical
//!   truth. Live item fields are a cache of "latest" — point-in-time
//!   questions go through [`history`].

pub mod changelog;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod model;
pub mod rank;
pub mod reviews;

pub use changelog::ChangeEntry;
pub use error::{Error, ErrorCode, Result};
pub use model::{
    ItemType, Priority, Resolution, Review, ReviewStatus, Sprint, SprintStatus, Status, WorkItem,
};
pub use rank::Rank;
