//! Order keys for work items within a status column.
//!
//! A [`Rank`] is a lowercase `a..z` string compared lexicographically.
//! [`between`] computes a key strictly between two neighbors without
//! touching any other row, synthesizing a longer key when the neighbors
//! are adjacent in the key space. Keys therefore grow over time;
//! [`needs_renormalization`] detects when a column has fragmented and
//! [`renormalize`] produces fresh evenly spaced keys for it.
//!
//! Invariants:
//!
//! - [`between`] never returns a key equal to either bound, and never
//!   returns an out-of-order key. When no key can exist between the bounds
//!   it fails with [`RankError::Exhausted`] instead of guessing.
//! - Generated keys never end in `a` (the minimum digit). A key ending in
//!   `a` can be the immediate successor of its own prefix, which would
//!   leave no room in front of it.

use serde::{Deserialize, Serialize};
use std::fmt;

const MIN_DIGIT: u8 = b'a';
const BASE: u32 = 26;

/// Keys longer than this signal fragmentation. Columns are renormalized
/// well before the scheme actually runs out of room.
pub const DEFAULT_MAX_KEY_LEN: usize = 32;

/// Numeric gap between neighboring keys after renormalization (`26^2`).
const RENORMALIZE_GAP: u128 = 676;

/// An opaque, totally ordered position key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rank(String);

impl Rank {
    /// Parse a rank from storage, validating the character set.
    ///
    /// # Errors
    ///
    /// Returns [`RankError::InvalidKey`] if the key is empty or contains
    /// anything but lowercase ASCII letters.
    pub fn parse(raw: impl Into<String>) -> Result<Self, RankError> {
        let raw = raw.into();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(RankError::InvalidKey(raw));
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failure modes of the key space.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RankError {
    /// The stored key is not a valid `a..z` string.
    #[error("invalid rank key '{0}': expected non-empty lowercase a-z")]
    InvalidKey(String),

    /// Both bounds are the same key. The column holds duplicate ranks and
    /// must be renormalized before inserting.
    #[error("rank bounds are equal ('{0}'): renormalize the column first")]
    EqualBounds(String),

    /// The bounds are not in ascending order.
    #[error("rank bounds are inverted ('{prev}' >= '{next}')")]
    InvertedBounds { prev: String, next: String },

    /// No key exists strictly between the bounds. Renormalize the column.
    #[error("no rank fits between '{prev}' and '{next}': renormalize the column first")]
    Exhausted { prev: String, next: String },
}

/// The key for an insert into an empty column: the midpoint of the space.
#[must_use]
pub fn initial() -> Rank {
    Rank("n".to_string())
}

/// Compute a key strictly between `prev` and `next`.
///
/// `None` for `prev` means "before everything", `None` for `next` means
/// "after everything"; both `None` behaves like [`initial`].
///
/// # Errors
///
/// Returns [`RankError::EqualBounds`] / [`RankError::InvertedBounds`] for
/// degenerate inputs and [`RankError::Exhausted`] when the key space has
/// no room between the bounds.
pub fn between(prev: Option<&Rank>, next: Option<&Rank>) -> Result<Rank, RankError> {
    if let (Some(p), Some(n)) = (prev, next) {
        if p == n {
            return Err(RankError::EqualBounds(p.0.clone()));
        }
        if p > n {
            return Err(RankError::InvertedBounds {
                prev: p.0.clone(),
                next: n.0.clone(),
            });
        }
    }

    let lower = prev.map_or(&[] as &[u8], |p| p.0.as_bytes());
    let upper = next.map(|n| n.0.as_bytes());

    let key = midpoint(lower, upper).ok_or_else(|| RankError::Exhausted {
        prev: prev.map_or_else(String::new, |p| p.0.clone()),
        next: next.map_or_else(String::new, |n| n.0.clone()),
    })?;

    // Safety net, not a code path: midpoint's invariants guarantee order.
    debug_assert!(prev.is_none_or(|p| p.0.as_bytes() < key.as_slice()));
    debug_assert!(next.is_none_or(|n| key.as_slice() < n.0.as_bytes()));

    Ok(Rank(String::from_utf8(key).unwrap_or_else(|_| "n".to_string())))
}

/// Digit-wise midpoint between `lower` and `upper` (`None` = unbounded
/// above). Returns `None` when the upper bound is exhausted while the
/// produced prefix still equals it, i.e. no key fits.
fn midpoint(lower: &[u8], upper: Option<&[u8]>) -> Option<Vec<u8>> {
    let mut out: Vec<u8> = Vec::with_capacity(lower.len() + 1);
    let mut upper_open = upper.is_none();
    let mut i = 0usize;

    loop {
        let lo = lower.get(i).map_or(0, |b| u32::from(b - MIN_DIGIT));
        let hi = if upper_open {
            BASE
        } else {
            let bound = upper.unwrap_or_default();
            u32::from(*bound.get(i)? - MIN_DIGIT)
        };

        if hi >= lo + 2 {
            let mid = lo + (hi - lo) / 2;
            out.push(to_digit(mid));
            return Some(out);
        }

        out.push(to_digit(lo));
        if hi == lo + 1 {
            // Everything extending the current prefix beyond `lower`'s tail
            // now sorts below `upper`; the bound is no longer a constraint.
            upper_open = true;
        }
        i += 1;
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn to_digit(value: u32) -> u8 {
    MIN_DIGIT + (value as u8)
}

/// Whether a column's keys are fragmented: any adjacent pair (in sorted
/// order) is equal, has no key between it, or would force a key longer
/// than `max_key_len`.
#[must_use]
pub fn needs_renormalization(ranks: &[Rank], max_key_len: usize) -> bool {
    if ranks.len() < 2 {
        return false;
    }

    let mut sorted: Vec<&Rank> = ranks.iter().collect();
    sorted.sort();

    sorted.windows(2).any(|pair| {
        if pair[0] == pair[1] {
            return true;
        }
        match between(Some(pair[0]), Some(pair[1])) {
            Ok(mid) => mid.len() > max_key_len,
            Err(_) => true,
        }
    })
}

/// Produce `count` fresh, evenly spaced keys in ascending order.
///
/// The caller assigns them to the column's items in their current rank
/// order, so relative order is preserved by construction. Key width grows
/// with the column size; every adjacent pair is separated by a numeric gap
/// of at least [`RENORMALIZE_GAP`] so the column immediately passes
/// [`needs_renormalization`] again.
#[must_use]
pub fn renormalize(count: usize) -> Vec<Rank> {
    if count == 0 {
        return Vec::new();
    }

    let slots = count as u128 + 1;
    let mut width = 2usize;
    let mut capacity = u128::from(BASE).pow(2);
    while capacity / slots < RENORMALIZE_GAP {
        width += 1;
        capacity *= u128::from(BASE);
    }
    let step = capacity / slots;

    (1..=count as u128)
        .map(|i| {
            let mut position = i * step;
            // Keys ending in the minimum digit have no room in front of
            // them; nudge onto the next value. The gap is far larger than
            // one, so order and distinctness are unaffected.
            if position % u128::from(BASE) == 0 {
                position += 1;
            }
            Rank(encode(position, width))
        })
        .collect()
}

fn encode(mut value: u128, width: usize) -> String {
    let mut digits = vec![MIN_DIGIT; width];
    let mut slot = width;
    while value > 0 && slot > 0 {
        slot -= 1;
        #[allow(clippy::cast_possible_truncation)]
        let digit = (value % u128::from(BASE)) as u8;
        digits[slot] = MIN_DIGIT + digit;
        value /= u128::from(BASE);
    }
    String::from_utf8(digits).unwrap_or_else(|_| "n".repeat(width))
}
