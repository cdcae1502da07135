//! Aggregate model types: work items, sprints, reviews.

pub mod item;
pub mod review;
pub mod sprint;

pub use item::{ItemType, ParseEnumError, Priority, Resolution, Status, WorkItem};
pub use review::{ChecklistItem, Review, ReviewStatus, ReviewVerdict, Reviewer, ReviewerStatus};
pub use sprint::{Sprint, SprintStatus};
