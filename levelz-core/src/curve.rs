//! Experience curve: the quadratic mapping between levels and experience.
//!
//! ```text
//! experience(L) = floor((A·L² + B·L + C·(1+m)) · (1+m))
//! level(xp)     = floor((-B + sqrt(B² - 4A·(C·(1+m) - ceil(xp/(1+m))))) / 2A)
//! ```
//!
//! with `A = 5`, `B = 50`, `C = 100` and a per-guild modifier `m`. The closed
//! form inverse can land one level off at exact boundaries because of the
//! floor/ceil pair, so [`level_for_experience`] corrects its estimate against
//! [`experience_for_level`]. The result is the largest level whose boundary is
//! at or below `xp`, which makes the two functions exact inverses and the
//! level monotone in experience.
//!
//! Stored player experience carries a floor of [`EXPERIENCE_FLOOR`]; use
//! [`level_of`] and [`level_info`] for stored values.

use serde::{Deserialize, Serialize};

use crate::types::{EXPERIENCE_FLOOR, GuildLevelConfig};

/// Quadratic `a` term.
const A: f64 = 5.0;
/// Quadratic `b` term.
const B: f64 = 50.0;
/// Quadratic `c` term.
const C: f64 = 100.0;

/// Modifier used when a guild has no override.
pub const DEFAULT_MODIFIER: f64 = 0.3715;

/// Smallest modifier for which consecutive level boundaries stay distinct.
pub const MIN_MODIFIER: f64 = -0.98;

/// Resolve the modifier a guild levels with.
///
/// A missing config or a negative override means [`DEFAULT_MODIFIER`].
#[must_use]
pub fn effective_modifier(config: Option<&GuildLevelConfig>) -> f64 {
    match config {
        Some(c) if c.level_modifier >= 0.0 => c.level_modifier,
        _ => DEFAULT_MODIFIER,
    }
}

/// Minimum experience needed to reach `level`.
#[must_use]
pub fn experience_for_level(level: u64, modifier: f64) -> i64 {
    let k = 1.0 + modifier;
    let l = level as f64;
    ((A * l * l + B * l + C * k) * k).floor() as i64
}

/// Highest level reachable with `xp` experience.
///
/// Levels stop at the last one whose boundary fits in an `i64`.
///
/// Returns 0 for a non-positive `1 + modifier` or a negative discriminant
/// (experience far below the level 0 boundary).
#[must_use]
pub fn level_for_experience(xp: i64, modifier: f64) -> u64 {
    let k = 1.0 + modifier;
    if k <= 0.0 {
        return 0;
    }

    let discriminant = B * B - 4.0 * A * (C * k - (xp as f64 / k).ceil());
    if !discriminant.is_finite() || discriminant < 0.0 {
        return 0;
    }

    let estimate = (-B + discriminant.sqrt()) / (2.0 * A);
    let mut level = if estimate <= 0.0 { 0 } else { estimate.floor() as u64 };

    // Boundaries past the i64 range all saturate to i64::MAX; levels whose
    // boundary saturated are unreachable.
    while level > 0 && !boundary_within(experience_for_level(level, modifier), xp) {
        level -= 1;
    }
    while boundary_within(experience_for_level(level + 1, modifier), xp) {
        level += 1;
    }
    level
}

fn boundary_within(boundary: i64, xp: i64) -> bool {
    boundary <= xp && boundary < i64::MAX
}

/// Difference between the level 0 boundary and the stored experience floor.
///
/// Adding it to stored experience makes a fresh record land exactly on the
/// level 0 boundary.
#[must_use]
pub fn zero_offset(modifier: f64) -> i64 {
    experience_for_level(0, modifier) - EXPERIENCE_FLOOR
}

/// Level of a stored experience value (one that includes the floor).
#[must_use]
pub fn level_of(stored_experience: i64, modifier: f64) -> u64 {
    level_for_experience(stored_experience.saturating_add(zero_offset(modifier)), modifier)
}

/// Stored experience at which `level` is reached.
#[must_use]
pub fn stored_experience_for_level(level: u64, modifier: f64) -> i64 {
    experience_for_level(level, modifier) - zero_offset(modifier)
}

// ---------------------------------------------------------------------------
// Level progress
// ---------------------------------------------------------------------------

/// Where a player sits on the curve, as shown by rank views.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelInfo {
    /// Current level.
    pub level: u64,
    /// Experience shown to users: stored experience minus the floor, never negative.
    pub display_experience: i64,
    /// Curve experience at the start of the current level.
    pub current_level_experience: i64,
    /// Curve experience at the start of the next level.
    pub next_level_experience: i64,
    /// Experience still needed for the next level.
    pub remaining: i64,
    /// Progress through the current level, 0.0–100.0.
    pub progress_percent: f64,
}

/// Compute [`LevelInfo`] for a stored experience value.
#[must_use]
pub fn level_info(stored_experience: i64, modifier: f64) -> LevelInfo {
    let experience = stored_experience.saturating_add(zero_offset(modifier));
    let level = level_for_experience(experience, modifier);
    let current = experience_for_level(level, modifier);
    let next = experience_for_level(level + 1, modifier);

    let span = (next - current).max(1);
    let progress = ((experience - current) as f64 / span as f64 * 100.0).clamp(0.0, 100.0);

    LevelInfo {
        level,
        display_experience: (stored_experience - EXPERIENCE_FLOOR).max(0),
        current_level_experience: current,
        next_level_experience: next,
        remaining: (next - experience).max(0),
        progress_percent: progress,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
