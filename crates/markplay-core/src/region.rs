// crates/markplay-core/src/region.rs
//
// The playable sub-interval of the media.
//
// The controller owns the one live Region. The drag widget and the config
// only *propose* bounds; every proposal goes through `Region::clamped` so the
// invariant `0 <= start < end <= duration` holds for any input, including
// NaN from a malformed drag event.

use serde::{Deserialize, Serialize};

/// Effective playable interval `[start, end]` in media seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub start: f64,
    pub end:   f64,
}

impl Region {
    /// Build a region from proposed bounds, repairing anything invalid.
    ///
    /// - Non-finite `start` becomes `0`, non-finite `end` becomes `duration`.
    /// - Both bounds are clamped to `[0, duration]`.
    /// - When `end <= start`, `end` becomes `start + min_len`; if that runs
    ///   past `duration` the region is pinned to `[duration - min_len, duration]`.
    ///
    /// `duration` must be positive; a media with zero length never reaches
    /// region construction (the controller stays idle).
    pub fn clamped(start: f64, end: f64, duration: f64, min_len: f64) -> Self {
        let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
        let min_len  = min_len.max(f64::EPSILON).min(duration);

        let mut start = (if start.is_finite() { start } else { 0.0 }).clamp(0.0, duration);
        let mut end   = (if end.is_finite() { end } else { duration }).clamp(0.0, duration);

        if end <= start {
            end = start + min_len;
            if end > duration {
                end   = duration;
                start = (duration - min_len).max(0.0);
            }
        }
        Self { start, end }
    }

    /// Region built from configured bounds once the media duration is known.
    ///
    /// `start` falls back to 0. `end` falls back to the duration, and so does
    /// a configured end at or beyond the duration.
    pub fn from_config(start: Option<f64>, end: Option<f64>, duration: f64, min_len: f64) -> Self {
        let end = match end {
            Some(e) if e < duration => e,
            _                       => duration,
        };
        Self::clamped(start.unwrap_or(0.0), end, duration, min_len)
    }

    /// Half-open playable test: `start <= t < end`.
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }

    /// `t` when it is playable, otherwise the region start.
    pub fn clamp_playable(&self, t: f64) -> f64 {
        if self.contains(t) { t } else { self.start }
    }

    pub fn len(&self) -> f64 {
        self.end - self.start
    }
}

/// `region.end`, or the media duration while no region exists yet.
pub fn effective_end(region: Option<&Region>, duration: f64) -> f64 {
    region.map_or(duration, |r| r.end)
}
