// crates/markplay-cli/src/main.rs
//
// `markplay`: load a session config and drive it against the simulated
// engine, either as a deterministic script in virtual time or live against
// the wall clock.

mod realtime;
mod script;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use markplay_control::sim::Harness;
use markplay_core::helpers::time::{format_clock, format_duration};
use markplay_core::{ControllerEvent, ControllerNotice, PointerProfile, SessionConfig, Snapshot};

use crate::script::{parse_script, Step};

#[derive(Debug, Parser)]
#[command(
    version,
    about = "Play a region of a recording, pausing at marks, against a simulated engine"
)]
struct Args {
    /// Session config (JSON). Flags below override its fields.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Media reference (`clip.mp3` or `[sound:clip.mp3]`)
    #[arg(long)]
    media: Option<String>,

    /// Region start (`12`, `12.5s`, `1:15`)
    #[arg(long)]
    start: Option<String>,

    /// Region end
    #[arg(long)]
    end: Option<String>,

    /// Pause marks, free text (`2, 5s; 0:08`)
    #[arg(long)]
    marks: Option<String>,

    #[arg(long, value_enum)]
    pointer: Option<PointerArg>,

    /// Length of the simulated media in seconds
    #[arg(long, default_value_t = 60.0)]
    duration: f64,

    /// Commands to run in virtual time, e.g. "play; wait; click 5; wait; status"
    #[arg(long, short)]
    script: Option<String>,

    /// Run live on the wall clock, reading commands from stdin
    #[arg(long, conflicts_with = "script")]
    realtime: bool,

    /// Print notices and snapshots as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PointerArg {
    Precise,
    Coarse,
}

impl From<PointerArg> for PointerProfile {
    fn from(p: PointerArg) -> Self {
        match p {
            PointerArg::Precise => PointerProfile::Precise,
            PointerArg::Coarse  => PointerProfile::Coarse,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "warn"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    let cfg  = session_config(&args)?;
    let plan = cfg.resolve().context("session config is unusable")?;

    if !(args.duration.is_finite() && args.duration > 0.0) {
        bail!("--duration must be a positive number of seconds");
    }
    log::info!(
        "[cli] {} ({}), {} mark(s)",
        plan.media,
        format_duration(args.duration),
        plan.marks.len()
    );

    let out = Output { json: args.json };
    if args.realtime {
        return realtime::run(plan, args.duration, out);
    }
    let Some(src) = args.script.as_deref() else {
        bail!("nothing to do: pass --script or --realtime");
    };
    let steps = parse_script(src)?;
    run_script(Harness::new(plan, args.duration), &steps, out)
}

fn session_config(args: &Args) -> Result<SessionConfig> {
    let mut cfg = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(m) = &args.media {
        cfg.media = m.clone();
    }
    if args.start.is_some() {
        cfg.start = args.start.clone();
    }
    if args.end.is_some() {
        cfg.end = args.end.clone();
    }
    if let Some(m) = &args.marks {
        cfg.pause_marks = m.clone();
    }
    if let Some(p) = args.pointer {
        cfg.pointer = p.into();
    }
    Ok(cfg)
}

/// Longest a `wait` runs before giving up on a halt.
const WAIT_LIMIT: Duration = Duration::from_secs(3600);

fn run_script(mut h: Harness, steps: &[Step], out: Output) -> Result<()> {
    h.load();
    out.flush(&mut h);

    for step in steps {
        match *step {
            Step::Send(ev)            => h.send(ev),
            Step::Click(t)            => h.click(t),
            Step::Drag { start, end } => h.send(ControllerEvent::RegionChanged { start, end }),
            Step::Run(d)              => h.run_for(d),
            Step::UntilHalt           => {
                if !h.run_until_halt(WAIT_LIMIT) {
                    log::warn!("[cli] wait: no halt within {}", format_duration(WAIT_LIMIT.as_secs_f64()));
                }
            }
            Step::Status => {
                let snap = h.controller.snapshot();
                out.snapshot(&snap)?;
            }
        }
        out.flush(&mut h);
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Output {
    json: bool,
}

impl Output {
    fn flush(&self, h: &mut Harness) {
        let position = h.position();
        for n in h.controller.drain_notices() {
            if let Err(e) = self.notice(position, &n) {
                log::warn!("[cli] could not print notice: {e}");
            }
        }
    }

    pub(crate) fn notice(&self, position: f64, n: &ControllerNotice) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(n)?);
            return Ok(());
        }
        let line = match n {
            ControllerNotice::StateChanged { from, to } => format!("{} -> {}", from.label(), to.label()),
            ControllerNotice::HaltedAtMark { mark, .. } => format!("halted at mark {}", format_clock(*mark)),
            ControllerNotice::ParkedAtEnd { position: at } => format!("parked at {}", format_clock(*at)),
            ControllerNotice::Revoked                   => "session revoked".to_string(),
        };
        println!("{:>9}  {line}", format_clock(position));
        Ok(())
    }

    pub(crate) fn snapshot(&self, snap: &Snapshot) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(snap)?);
            return Ok(());
        }
        let region = snap
            .region
            .map(|r| format!("[{} - {}]", format_clock(r.start), format_clock(r.end)))
            .unwrap_or_else(|| "none".into());
        let next = snap
            .next_mark()
            .map(format_clock)
            .unwrap_or_else(|| "end".into());
        println!(
            "{:>9}  {} region {region} next {next} rate {}x marks {:?}",
            format_clock(snap.position),
            snap.state.label(),
            snap.rate,
            snap.active_marks,
        );
        Ok(())
    }
}
