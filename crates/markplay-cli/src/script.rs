// crates/markplay-cli/src/script.rs
//
// Session scripts: a `;`- or newline-separated list of commands.
//
//   play | pause | toggle | stop | reset | prev     control surface
//   skip <secs> | speed <rate>                      control surface with argument
//   click <t> | drag <start> <end>                  timeline gestures
//   run <secs> | wait                               let time pass / until the next halt
//   key <g|h|j|k|l|p>                               keyboard shortcut
//   status                                          print a snapshot
//
// Times accept the same forms as the session config (`12`, `12.5s`, `1:15`).

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use markplay_core::helpers::time::parse_time;
use markplay_core::ControllerEvent;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Step {
    Send(ControllerEvent),
    Click(f64),
    Drag { start: f64, end: f64 },
    Run(Duration),
    UntilHalt,
    Status,
}

/// Keyboard shortcuts as laid out on the practice card.
pub fn key_event(key: char) -> Option<ControllerEvent> {
    match key.to_ascii_lowercase() {
        'g'       => Some(ControllerEvent::SkipBy(-3.0)),
        'h'       => Some(ControllerEvent::JumpToPreviousMark),
        'j'       => Some(ControllerEvent::PlayPause),
        'k'       => Some(ControllerEvent::SkipBy(0.5)),
        'l' | 'p' => Some(ControllerEvent::SkipBy(-100.0)),
        _         => None,
    }
}

pub fn parse_script(src: &str) -> Result<Vec<Step>> {
    src.split(|c: char| c == ';' || c == '\n')
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with('#'))
        .map(|s| parse_step(s).with_context(|| format!("in script command {s:?}")))
        .collect()
}

pub fn parse_step(cmd: &str) -> Result<Step> {
    let mut words = cmd.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let args: Vec<&str> = words.collect();

    let step = match (verb.as_str(), args.as_slice()) {
        ("play", [])              => Step::Send(ControllerEvent::PlayRequested),
        ("pause", [])             => Step::Send(ControllerEvent::PauseRequested),
        ("toggle", [])            => Step::Send(ControllerEvent::PlayPause),
        ("stop", [])              => Step::Send(ControllerEvent::Stop),
        ("reset", [])             => Step::Send(ControllerEvent::ResetRequested),
        ("prev", [])              => Step::Send(ControllerEvent::JumpToPreviousMark),
        ("skip", [d])             => Step::Send(ControllerEvent::SkipBy(signed_secs(d)?)),
        ("speed", [r])            => Step::Send(ControllerEvent::RateChanged(
            r.parse::<f64>().map_err(|_| anyhow!("bad rate {r:?}"))?,
        )),
        ("click", [t])            => Step::Click(secs(t)?),
        ("drag", [s, e])          => Step::Drag { start: secs(s)?, end: secs(e)? },
        ("run", [d])              => Step::Run(run_length(d)?),
        ("wait", [])              => Step::UntilHalt,
        ("status", [])            => Step::Status,
        ("key", [k])              => {
            let mut chars = k.chars();
            match (chars.next().and_then(key_event), chars.next()) {
                (Some(ev), None) => Step::Send(ev),
                _                => bail!("unknown key {k:?}"),
            }
        }
        _ => bail!("unknown command"),
    };
    Ok(step)
}

fn secs(raw: &str) -> Result<f64> {
    parse_time(raw).ok_or_else(|| anyhow!("bad time {raw:?}"))
}

/// Length of a `run` step. Rejects values too large for a `Duration`.
fn run_length(raw: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(secs(raw)?).map_err(|e| anyhow!("bad run length {raw:?}: {e}"))
}

/// Like `secs` but keeps a leading minus: `skip -3`, `skip -0:05`.
fn signed_secs(raw: &str) -> Result<f64> {
    match raw.strip_prefix('-') {
        Some(rest) => secs(rest).map(|v| -v),
        None       => secs(raw.strip_prefix('+').unwrap_or(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_session() {
        let steps = parse_script("play; wait\nclick 0:05 ; skip -3; speed 0.5; drag 1 7.5s; status").unwrap();
        assert_eq!(
            steps,
            vec![
                Step::Send(ControllerEvent::PlayRequested),
                Step::UntilHalt,
                Step::Click(5.0),
                Step::Send(ControllerEvent::SkipBy(-3.0)),
                Step::Send(ControllerEvent::RateChanged(0.5)),
                Step::Drag { start: 1.0, end: 7.5 },
                Step::Status,
            ]
        );
    }

    #[test]
    fn comments_and_blank_lines_skipped() {
        let steps = parse_script("# warm up\n\nrun 1.5\n").unwrap();
        assert_eq!(steps, vec![Step::Run(Duration::from_millis(1500))]);
    }

    #[test]
    fn keys_map_to_shortcuts() {
        assert_eq!(parse_step("key j").unwrap(), Step::Send(ControllerEvent::PlayPause));
        assert_eq!(key_event('G'), Some(ControllerEvent::SkipBy(-3.0)));
        assert_eq!(key_event('p'), Some(ControllerEvent::SkipBy(-100.0)));
        assert_eq!(key_event('x'), None);
        assert!(parse_step("key jj").is_err());
    }

    #[test]
    fn errors_name_the_command() {
        let err = parse_script("play; jump 4").unwrap_err();
        assert!(format!("{err:#}").contains("jump 4"));
        assert!(parse_step("click soon").is_err());
        assert!(parse_step("skip").is_err());
        assert!(parse_step("run 1e30").is_err());
    }
}
