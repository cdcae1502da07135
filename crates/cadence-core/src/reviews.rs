//! Review workflow operations.
//!
//! The pure state machine lives on [`Review`](crate::model::Review); this
//! module loads the aggregate, applies one action, and persists the
//! result inside a single transaction. Reviewer and checklist sub-records
//! are stored as JSON columns.
//!
//! Reviews are never hard-deleted: cancellation and expiry are terminal
//! states, and the soft-delete column exists only for administrative
//! cleanup by outer layers.

use chrono::Utc;
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::config::ReviewConfig;
use crate::db::query;
use crate::db::us_from_datetime;
use crate::error::{Error, Result};
use crate::model::{ChecklistItem, Review, ReviewStatus, ReviewVerdict, Reviewer};

/// Input for [`request_review`].
#[derive(Debug, Clone, Default)]
pub struct RequestReview {
    pub reviewers: Vec<String>,
    /// Falls back to the configured default when absent.
    pub required_approvals: Option<u32>,
    pub checklist: Vec<String>,
}

/// Request a review on an item, gating its transition into done until the
/// review is approved, cancelled, or expired.
///
/// # Errors
///
/// Fails with [`Error::NotFound`] for an unknown item and
/// [`Error::Validation`] for an empty or duplicated reviewer list or a
/// zero approval threshold.
pub fn request_review(
    conn: &mut Connection,
    item_id: &str,
    input: &RequestReview,
    requested_by: &str,
    config: &ReviewConfig,
) -> Result<Review> {
    if input.reviewers.is_empty() {
        return Err(Error::validation(
            "a review needs at least one reviewer".to_string(),
        ));
    }
    let mut seen = std::collections::HashSet::new();
    for user in &input.reviewers {
        if !seen.insert(user.as_str()) {
            return Err(Error::validation(format!(
                "reviewer '{user}' listed more than once"
            )));
        }
    }

    let required_approvals = input
        .required_approvals
        .unwrap_or(config.default_required_approvals);
    if required_approvals == 0 {
        return Err(Error::validation(
            "required approvals must be at least 1".to_string(),
        ));
    }

    let now = Utc::now();
    let tx = conn
        .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
        .map_err(Error::from_sqlite)?;

    let item =
        query::get_item(&tx, item_id)?.ok_or_else(|| Error::not_found("item", item_id))?;

    let review = Review {
        id: Uuid::new_v4().to_string(),
        item_id: item.id.clone(),
        requested_by: requested_by.to_string(),
        reviewers: input
            .reviewers
            .iter()
            .map(|user| Reviewer::pending(user.clone()))
            .collect(),
        required_approvals,
        checklist: input
            .checklist
            .iter()
            .map(|label| ChecklistItem::open(label.clone()))
            .collect(),
        status: ReviewStatus::Pending,
        created_at: now,
        deleted_at: None,
    };

    let reviewers_json = to_json(&review.reviewers)?;
    let checklist_json = to_json(&review.checklist)?;
    tx.execute(
        "INSERT INTO reviews (review_id, item_id, requested_by, required_approvals, \
         reviewers_json, checklist_json, status, created_at_us, deleted_at_us) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
        params![
            review.id,
            review.item_id,
            review.requested_by,
            review.required_approvals,
            reviewers_json,
            checklist_json,
            review.status.as_str(),
            us_from_datetime(review.created_at),
        ],
    )
    .map_err(Error::from_sqlite)?;

    tx.commit().map_err(Error::from_sqlite)?;
    tracing::info!(item = %item.key, review = %review.id, reviewers = review.reviewers.len(),
        "review requested");
    Ok(review)
}

/// Approve on behalf of `user`.
///
/// # Errors
///
/// Fails per the state machine: unknown review, terminal review, or a
/// non-reviewer acting.
pub fn approve(
    conn: &mut Connection,
    review_id: &str,
    user: &str,
    comment: Option<String>,
) -> Result<Review> {
    with_review(conn, review_id, |review| {
        review.record_verdict(user, ReviewVerdict::Approve, comment.clone(), Utc::now())
    })
}

/// Request changes on behalf of `user`.
///
/// # Errors
///
/// Fails per the state machine: unknown review, terminal review, or a
/// non-reviewer acting.
pub fn request_changes(
    conn: &mut Connection,
    review_id: &str,
    user: &str,
    comment: Option<String>,
) -> Result<Review> {
    with_review(conn, review_id, |review| {
        review.record_verdict(
            user,
            ReviewVerdict::RequestChanges,
            comment.clone(),
            Utc::now(),
        )
    })
}

/// Cancel the review. Requester-only; terminal.
///
/// # Errors
///
/// Fails with [`Error::Unauthorized`] for anyone but the requester.
pub fn cancel_review(conn: &mut Connection, review_id: &str, by: &str) -> Result<Review> {
    with_review(conn, review_id, |review| review.cancel(by))
}

/// Expire the review (out-of-band terminal transition).
///
/// # Errors
///
/// Fails with [`Error::Validation`] when already terminal.
pub fn expire_review(conn: &mut Connection, review_id: &str) -> Result<Review> {
    with_review(conn, review_id, Review::expire)
}

/// Toggle one checklist entry.
///
/// # Errors
///
/// Fails with [`Error::Validation`] for a bad index or terminal review.
pub fn toggle_checklist(
    conn: &mut Connection,
    review_id: &str,
    index: usize,
    user: &str,
) -> Result<Review> {
    with_review(conn, review_id, |review| {
        review.toggle_checklist(index, user, Utc::now())
    })
}

/// Add a pending reviewer to the roster.
///
/// # Errors
///
/// Fails with [`Error::Validation`] on duplicates or a terminal review.
pub fn add_reviewer(conn: &mut Connection, review_id: &str, user: &str) -> Result<Review> {
    with_review(conn, review_id, |review| review.add_reviewer(user))
}

/// Remove a reviewer from the roster.
///
/// # Errors
///
/// Fails with [`Error::Validation`] when absent or terminal.
pub fn remove_reviewer(conn: &mut Connection, review_id: &str, user: &str) -> Result<Review> {
    with_review(conn, review_id, |review| review.remove_reviewer(user))
}

fn with_review<F>(conn: &mut Connection, review_id: &str, mut apply: F) -> Result<Review>
where
    F: FnMut(&mut Review) -> Result<()>,
{
    let tx = conn
        .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
        .map_err(Error::from_sqlite)?;

    let mut review = query::get_review(&tx, review_id)?
        .ok_or_else(|| Error::not_found("review", review_id))?;

    apply(&mut review)?;

    let reviewers_json = to_json(&review.reviewers)?;
    let checklist_json = to_json(&review.checklist)?;
    tx.execute(
        "UPDATE reviews SET reviewers_json = ?1, checklist_json = ?2, status = ?3, \
         required_approvals = ?4 WHERE review_id = ?5",
        params![
            reviewers_json,
            checklist_json,
            review.status.as_str(),
            review.required_approvals,
            review.id,
        ],
    )
    .map_err(Error::from_sqlite)?;

    tx.commit().map_err(Error::from_sqlite)?;
    Ok(review)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::validation(format!("review sub-records are not serializable: {e}")))
}
