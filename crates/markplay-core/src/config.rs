// crates/markplay-core/src/config.rs
//
// Session configuration: what to play, which slice of it, where to pause,
// and the timing tolerances for the engine in use.
//
// Raw fields are free text (they come from a card template or a JSON file),
// so `SessionConfig` keeps them as strings and `resolve()` turns them into a
// `SessionPlan` of plain seconds. Only a missing media reference is fatal;
// every other bad field degrades to its default with a warning.
//
// The tolerance numbers are workarounds for imprecise playback engines. They
// are data, not constants, because values tuned for one engine do not carry
// over to another.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::helpers::time::{parse_pause_marks, parse_time};
use crate::region::Region;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing media reference")]
    MissingMedia,
    #[error("could not read config {path}: {source}")]
    Read {
        path:   String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Input device class. Coarse pointers (touch) deliver gesture events later
/// and less precisely, so they get wider windows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerProfile {
    #[default]
    Precise,
    Coarse,
}

/// Timing tolerances. Media-time values are in seconds, wall-clock values in
/// milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// Minimum lead at which a tick counts as "at the mark".
    pub tick_halt_window:        f64,
    /// Extra lead per unit of playback rate (faster playback, bigger steps).
    pub tick_halt_rate_factor:   f64,
    /// A tick this close to the region end parks.
    pub end_detect_window:       f64,
    /// Parking position is this far before the region end.
    pub end_park_offset:         f64,
    /// Added to a mark when snapping on halt (negative = just before).
    pub halt_offset:             f64,
    /// Resume from a mark starts this far past it.
    pub resume_nudge:            f64,
    /// Marks this close to the right of a user seek count as passed.
    pub seek_grace:              f64,
    /// An engine seek landing this close to the region end counts as parked.
    pub park_seek_match:         f64,
    /// Smallest region a drag may produce.
    pub min_region_len:          f64,
    /// Rate used in delay arithmetic when the real rate is smaller.
    pub rate_floor:              f64,
    /// A tick this far behind the previous one is a discontinuity.
    pub backward_jump_threshold: f64,
    /// Shortest timer the scheduler arms.
    pub min_timer_delay_ms:      u64,
    /// Suppression window after a user gesture.
    pub suppress_window_ms:      u64,
    /// Rendering-frame period used by the worker.
    pub frame_interval_ms:       u64,
}

impl Tolerances {
    /// Mouse / trackpad: fast, precise event delivery.
    pub const fn precise_pointer() -> Self {
        Self {
            tick_halt_window:        0.02,
            tick_halt_rate_factor:   0.005,
            end_detect_window:       0.004,
            end_park_offset:         0.02,
            halt_offset:             0.0,
            resume_nudge:            0.01,
            seek_grace:              0.05,
            park_seek_match:         0.003,
            min_region_len:          0.05,
            rate_floor:              0.05,
            backward_jump_threshold: 0.25,
            min_timer_delay_ms:      20,
            suppress_window_ms:      120,
            frame_interval_ms:       16,
        }
    }

    /// Touch: slower gesture delivery and coarser position updates.
    pub const fn coarse_pointer() -> Self {
        Self {
            tick_halt_window:        0.05,
            tick_halt_rate_factor:   0.005,
            end_detect_window:       0.01,
            end_park_offset:         0.03,
            halt_offset:             0.0,
            resume_nudge:            0.02,
            seek_grace:              0.15,
            park_seek_match:         0.01,
            min_region_len:          0.1,
            rate_floor:              0.05,
            backward_jump_threshold: 0.4,
            min_timer_delay_ms:      20,
            suppress_window_ms:      350,
            frame_interval_ms:       16,
        }
    }

    pub const fn for_pointer(profile: PointerProfile) -> Self {
        match profile {
            PointerProfile::Precise => Self::precise_pointer(),
            PointerProfile::Coarse  => Self::coarse_pointer(),
        }
    }

    /// How far ahead of a mark a tick may be and still halt on it.
    pub fn tick_halt_epsilon(&self, rate: f64) -> f64 {
        self.tick_halt_window.max(self.tick_halt_rate_factor * rate.abs())
    }

    pub fn min_timer_delay(&self) -> Duration {
        Duration::from_millis(self.min_timer_delay_ms)
    }

    pub fn suppress_window(&self) -> Duration {
        Duration::from_millis(self.suppress_window_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

impl Default for Tolerances {
    fn default() -> Self {
        Self::precise_pointer()
    }
}

/// Per-field tolerance overrides. Fields left out keep the value of the
/// preset they are applied to, so a tweak to one window does not drag the
/// other fields back to the precise-pointer numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToleranceOverrides {
    pub tick_halt_window:        Option<f64>,
    pub tick_halt_rate_factor:   Option<f64>,
    pub end_detect_window:       Option<f64>,
    pub end_park_offset:         Option<f64>,
    pub halt_offset:             Option<f64>,
    pub resume_nudge:            Option<f64>,
    pub seek_grace:              Option<f64>,
    pub park_seek_match:         Option<f64>,
    pub min_region_len:          Option<f64>,
    pub rate_floor:              Option<f64>,
    pub backward_jump_threshold: Option<f64>,
    pub min_timer_delay_ms:      Option<u64>,
    pub suppress_window_ms:      Option<u64>,
    pub frame_interval_ms:       Option<u64>,
}

impl ToleranceOverrides {
    pub fn apply_to(&self, base: Tolerances) -> Tolerances {
        Tolerances {
            tick_halt_window:        self.tick_halt_window.unwrap_or(base.tick_halt_window),
            tick_halt_rate_factor:   self.tick_halt_rate_factor.unwrap_or(base.tick_halt_rate_factor),
            end_detect_window:       self.end_detect_window.unwrap_or(base.end_detect_window),
            end_park_offset:         self.end_park_offset.unwrap_or(base.end_park_offset),
            halt_offset:             self.halt_offset.unwrap_or(base.halt_offset),
            resume_nudge:            self.resume_nudge.unwrap_or(base.resume_nudge),
            seek_grace:              self.seek_grace.unwrap_or(base.seek_grace),
            park_seek_match:         self.park_seek_match.unwrap_or(base.park_seek_match),
            min_region_len:          self.min_region_len.unwrap_or(base.min_region_len),
            rate_floor:              self.rate_floor.unwrap_or(base.rate_floor),
            backward_jump_threshold: self.backward_jump_threshold.unwrap_or(base.backward_jump_threshold),
            min_timer_delay_ms:      self.min_timer_delay_ms.unwrap_or(base.min_timer_delay_ms),
            suppress_window_ms:      self.suppress_window_ms.unwrap_or(base.suppress_window_ms),
            frame_interval_ms:       self.frame_interval_ms.unwrap_or(base.frame_interval_ms),
        }
    }
}

/// Raw session fields as a person typed them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Media reference, optionally wrapped as `[sound:file.mp3]`.
    pub media:        String,
    /// Region start.
    pub start:        Option<String>,
    /// Region end.
    pub end:          Option<String>,
    /// Used as the region end when `end` is absent or unparseable
    /// (typically the start of the following clip).
    pub fallback_end: Option<String>,
    /// Free-text pause marks.
    pub pause_marks:  String,
    pub pointer:      PointerProfile,
    /// Applied on top of the pointer preset.
    pub tolerances:   ToleranceOverrides,
}

/// Resolved session: plain seconds, ready for the controller.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionPlan {
    pub media:      String,
    pub start:      Option<f64>,
    pub end:        Option<f64>,
    pub marks:      Vec<f64>,
    pub tolerances: Tolerances,
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parse the free-text fields. Fails only when the media reference is empty.
    pub fn resolve(&self) -> Result<SessionPlan, ConfigError> {
        let media = clean_media_ref(&self.media).ok_or(ConfigError::MissingMedia)?;

        let start = optional_time("start", self.start.as_deref());
        let end   = optional_time("end", self.end.as_deref())
            .or_else(|| optional_time("fallback_end", self.fallback_end.as_deref()));

        let marks = parse_pause_marks(&self.pause_marks);
        if !marks.is_empty() {
            log::debug!("[config] {} pause mark(s) requested", marks.len());
        }

        Ok(SessionPlan {
            media,
            start,
            end,
            marks,
            tolerances: self.tolerances.apply_to(Tolerances::for_pointer(self.pointer)),
        })
    }
}

impl SessionPlan {
    /// The configured region for media of `duration` seconds.
    pub fn region_for(&self, duration: f64) -> Region {
        Region::from_config(self.start, self.end, duration, self.tolerances.min_region_len)
    }
}

/// Strip the `[sound:...]` wrapper card templates put around file names.
/// Returns `None` for an empty reference.
pub fn clean_media_ref(raw: &str) -> Option<String> {
    let s = raw.trim();
    let s = s.strip_prefix("[sound:").unwrap_or(s);
    let s = s.strip_suffix(']').unwrap_or(s).trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn optional_time(field: &str, raw: Option<&str>) -> Option<f64> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = parse_time(raw);
    if parsed.is_none() {
        log::warn!("[config] {field}: cannot parse {raw:?}, using default");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn media_is_required() {
        let cfg = SessionConfig { media: "  ".into(), ..Default::default() };
        assert!(matches!(cfg.resolve(), Err(ConfigError::MissingMedia)));
    }

    #[test]
    fn sound_wrapper_is_stripped() {
        assert_eq!(clean_media_ref("[sound:clip.mp3]").as_deref(), Some("clip.mp3"));
        assert_eq!(clean_media_ref(" clip.ogg ").as_deref(), Some("clip.ogg"));
        assert_eq!(clean_media_ref("[sound:]"), None);
    }

    #[test]
    fn bad_times_degrade_to_defaults() {
        let cfg = SessionConfig {
            media: "a.mp3".into(),
            start: Some("soon".into()),
            end:   Some("later".into()),
            ..Default::default()
        };
        let plan = cfg.resolve().unwrap();
        assert_eq!(plan.start, None);
        assert_eq!(plan.end, None);
        assert_eq!(plan.region_for(20.0), Region { start: 0.0, end: 20.0 });
    }

    #[test]
    fn fallback_end_used_when_end_missing() {
        let cfg = SessionConfig {
            media:        "a.mp3".into(),
            start:        Some("0:02".into()),
            fallback_end: Some("7.5s".into()),
            ..Default::default()
        };
        let plan = cfg.resolve().unwrap();
        assert_eq!(plan.region_for(30.0), Region { start: 2.0, end: 7.5 });
    }

    #[test]
    fn pointer_profile_selects_preset() {
        let cfg = SessionConfig {
            media:   "a.mp3".into(),
            pointer: PointerProfile::Coarse,
            ..Default::default()
        };
        assert_eq!(cfg.resolve().unwrap().tolerances, Tolerances::coarse_pointer());
    }

    #[test]
    fn tick_epsilon_scales_with_rate() {
        let t = Tolerances::precise_pointer();
        assert_eq!(t.tick_halt_epsilon(1.0), 0.02);
        assert!((t.tick_halt_epsilon(8.0) - 0.04).abs() < 1e-12);
    }

    #[test]
    fn loads_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "media": "[sound:talk.mp3]", "start": "1", "end": "0:10",
                 "pause_marks": "2, 5, 8", "tolerances": {{ "suppress_window_ms": 200 }} }}"#
        )
        .unwrap();

        let plan = SessionConfig::load(file.path()).unwrap().resolve().unwrap();
        assert_eq!(plan.media, "talk.mp3");
        assert_eq!(plan.marks, vec![2.0, 5.0, 8.0]);
        assert_eq!(plan.tolerances.suppress_window_ms, 200);
        assert_eq!(plan.tolerances.end_park_offset, Tolerances::default().end_park_offset);
        assert_eq!(plan.region_for(60.0), Region { start: 1.0, end: 10.0 });
    }

    #[test]
    fn partial_override_keeps_selected_preset() {
        let cfg = SessionConfig::from_json_str(
            r#"{ "media": "a.mp3", "pointer": "coarse", "tolerances": { "suppress_window_ms": 400 } }"#,
        )
        .unwrap();
        let tol = cfg.resolve().unwrap().tolerances;
        let coarse = Tolerances::coarse_pointer();
        assert_eq!(tol.suppress_window_ms, 400);
        assert_eq!(tol.seek_grace, coarse.seek_grace);
        assert_eq!(tol.end_park_offset, coarse.end_park_offset);
        assert_eq!(tol.min_region_len, coarse.min_region_len);
        assert_eq!(tol, Tolerances { suppress_window_ms: 400, ..coarse });
    }

    #[test]
    fn unknown_tolerance_field_is_rejected() {
        let err = SessionConfig::from_json_str(
            r#"{ "media": "a.mp3", "tolerances": { "seek_grase": 0.2 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = SessionConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
