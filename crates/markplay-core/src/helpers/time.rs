// crates/markplay-core/src/helpers/time.rs
//
// Time parsing and formatting for session fields.
//
// Config fields arrive as free text typed by a person: `75`, `75.5s`, `1:15`,
// `0:01:15`. Everything downstream works in f64 seconds, so this is the one
// place that turns text into seconds and seconds back into text.

/// Parse a single timestamp into seconds.
///
/// Accepted forms (surrounding whitespace and case are ignored):
///
/// | Input       | Seconds |
/// |-------------|---------|
/// | `12`        | 12.0    |
/// | `12.5s`     | 12.5    |
/// | `1:15`      | 75.0    |
/// | `1:02:03.5` | 3723.5  |
///
/// Returns `None` for empty input, unparseable input, negative values and
/// non-finite values. Callers decide the fallback.
///
/// ```
/// use markplay_core::helpers::time::parse_time;
/// assert_eq!(parse_time("12.5s"), Some(12.5));
/// assert_eq!(parse_time(" 1:15 "), Some(75.0));
/// assert_eq!(parse_time("1:02:03.5"), Some(3723.5));
/// assert_eq!(parse_time("abc"), None);
/// ```
pub fn parse_time(raw: &str) -> Option<f64> {
    let s = raw.trim().to_ascii_lowercase();
    if s.is_empty() {
        return None;
    }

    let secs = if let Some(body) = s.strip_suffix('s') {
        body.trim().parse::<f64>().ok()?
    } else if s.contains(':') {
        let parts: Vec<f64> = s
            .split(':')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [m, sec]       => m * 60.0 + sec,
            [h, m, sec]    => h * 3600.0 + m * 60.0 + sec,
            _              => return None,
        }
    } else {
        s.parse::<f64>().ok()?
    };

    (secs.is_finite() && secs >= 0.0).then_some(secs)
}

/// Parse a free-text list of pause marks into sorted, de-duplicated seconds.
///
/// Tokens are separated by commas, semicolons, pipes or whitespace and each
/// token goes through [`parse_time`]. A bare `s` token is accepted as a unit
/// that was typed apart from its number (`"3 s, 7 s"`). Anything else that
/// does not parse is skipped with a warning; one bad token never discards the
/// rest of the list.
///
/// ```
/// use markplay_core::helpers::time::parse_pause_marks;
/// assert_eq!(parse_pause_marks("8, 2s; 0:05 2"), vec![2.0, 5.0, 8.0]);
/// assert!(parse_pause_marks("").is_empty());
/// ```
pub fn parse_pause_marks(raw: &str) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::new();
    for token in raw
        .split(|c: char| c == ',' || c == ';' || c == '|' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        if token.eq_ignore_ascii_case("s") {
            continue;
        }
        match parse_time(token) {
            Some(v) => out.push(v),
            None    => log::warn!("[config] ignoring unparseable pause mark {token:?}"),
        }
    }

    out.sort_by(f64::total_cmp);
    out.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    out
}

/// Format a position in seconds as `M:SS.cc` for status lines.
///
/// ```
/// use markplay_core::helpers::time::format_clock;
/// assert_eq!(format_clock(0.0),   "0:00.00");
/// assert_eq!(format_clock(75.5),  "1:15.50");
/// assert_eq!(format_clock(-3.0),  "0:00.00");
/// ```
pub fn format_clock(secs: f64) -> String {
    let secs  = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
    let total_cs = (secs * 100.0).round() as u64;
    let m  = total_cs / 6000;
    let s  = (total_cs / 100) % 60;
    let cs = total_cs % 100;
    format!("{m}:{s:02}.{cs:02}")
}

/// Length label for a media file or a wait limit: tenths of a second under a
/// minute (`4.2s`), then `m:ss`, then `h:mm:ss` once an hour is reached.
pub fn format_duration(secs: f64) -> String {
    if secs.is_nan() || secs < 60.0 {
        return format!("{secs:.1}s");
    }
    let whole = secs as u64;
    let (h, m, s) = (whole / 3600, (whole / 60) % 60, whole % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_labels() {
        assert_eq!(format_duration(4.2), "4.2s");
        assert_eq!(format_duration(187.0), "3:07");
        assert_eq!(format_duration(3600.0), "1:00:00");
        assert_eq!(format_duration(3875.0), "1:04:35");
    }

    #[test]
    fn plain_seconds() {
        assert_eq!(parse_time("12"), Some(12.0));
        assert_eq!(parse_time("0"), Some(0.0));
    }

    #[test]
    fn suffix_and_case() {
        assert_eq!(parse_time("3.25S"), Some(3.25));
        assert_eq!(parse_time(" 4 s"), Some(4.0));
    }

    #[test]
    fn clock_forms() {
        assert_eq!(parse_time("2:30"), Some(150.0));
        assert_eq!(parse_time("1:00:00"), Some(3600.0));
        assert_eq!(parse_time("1:2:3:4"), None);
        assert_eq!(parse_time("1:xx"), None);
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert_eq!(parse_time("-1"), None);
        assert_eq!(parse_time(""), None);
        assert_eq!(parse_time("   "), None);
        assert_eq!(parse_time("inf"), None);
        assert_eq!(parse_time("NaN"), None);
    }

    #[test]
    fn marks_sorted_and_deduped() {
        assert_eq!(parse_pause_marks("5 2 5 8 2.0"), vec![2.0, 5.0, 8.0]);
    }

    #[test]
    fn marks_skip_bad_tokens() {
        assert_eq!(parse_pause_marks("1, banana, 3"), vec![1.0, 3.0]);
    }

    #[test]
    fn marks_accept_detached_unit() {
        assert_eq!(parse_pause_marks("3 s, 7 s"), vec![3.0, 7.0]);
    }

    #[test]
    fn marks_accept_clock_forms() {
        assert_eq!(parse_pause_marks("1:00|0:30"), vec![30.0, 60.0]);
    }

    #[test]
    fn clock_rounds_to_centiseconds() {
        assert_eq!(format_clock(9.999), "0:10.00");
        assert_eq!(format_clock(600.0), "10:00.00");
    }
}
