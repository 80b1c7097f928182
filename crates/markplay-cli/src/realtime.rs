// crates/markplay-cli/src/realtime.rs
//
// Live mode: the controller runs on a ControllerWorker against the system
// clock, and a ticker thread plays the part of the media element (advances
// the simulated engine, reports position ticks and play/pause events).
// Commands come from stdin, one script line at a time.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

use markplay_control::sim::{EngineEvent, SimulatedEngine};
use markplay_control::{Controller, ControllerWorker, PlaybackEngine, Registry, SystemClock};
use markplay_core::{ControllerEvent, SessionPlan};

use crate::script::{parse_script, Step};
use crate::Output;

const ENGINE_STEP:   Duration = Duration::from_millis(10);
const TICK_INTERVAL: Duration = Duration::from_millis(250);

pub fn run(plan: SessionPlan, duration: f64, out: Output) -> Result<()> {
    let engine     = SimulatedEngine::new(duration);
    let controller = Controller::new(engine.clone(), SystemClock::new(), plan, &Registry::global());
    let mut worker = ControllerWorker::spawn(controller);
    let stop       = Arc::new(AtomicBool::new(false));

    worker.send(ControllerEvent::MediaReady(duration))?;

    // ── Media element stand-in ────────────────────────────────────────────────
    let ticker = {
        let engine = engine.clone();
        let stop   = Arc::clone(&stop);
        let tx     = worker.sender();
        thread::spawn(move || {
            let mut last      = Instant::now();
            let mut last_tick = Instant::now();
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(ENGINE_STEP);
                let now = Instant::now();
                engine.advance(now.duration_since(last).as_secs_f64());
                last = now;

                let mut events: Vec<ControllerEvent> = engine
                    .drain_events()
                    .into_iter()
                    .map(|e| match e {
                        EngineEvent::Started => ControllerEvent::PlaybackStarted,
                        EngineEvent::Paused  => ControllerEvent::PlaybackPaused,
                    })
                    .collect();
                if now.duration_since(last_tick) >= TICK_INTERVAL {
                    last_tick = now;
                    if engine.is_playing() {
                        events.push(ControllerEvent::Tick(engine.current_time()));
                    }
                }
                // A stopped worker just means the session is ending.
                if events.into_iter().any(|ev| tx.send(ev).is_err()) {
                    return;
                }
            }
        })
    };

    // ── Notice printer ────────────────────────────────────────────────────────
    let printer = {
        let notices = worker.notices.clone();
        let engine  = engine.clone();
        thread::spawn(move || {
            for n in notices.iter() {
                if let Err(e) = out.notice(engine.current_time(), &n) {
                    log::warn!("[cli] could not print notice: {e}");
                }
            }
        })
    };

    eprintln!("markplay live: play, pause, toggle, stop, reset, prev, skip N, speed R, click T, drag S E, key C, status, quit");
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().eq_ignore_ascii_case("quit") {
            break;
        }
        let steps = match parse_script(&line) {
            Ok(steps) => steps,
            Err(e) => {
                eprintln!("{e:#}");
                continue;
            }
        };
        for step in steps {
            match step {
                Step::Send(ev) => worker.send(ev)?,
                Step::Click(t) => {
                    worker.send(ControllerEvent::UserInteraction)?;
                    engine.user_seek(t);
                    worker.send(ControllerEvent::UserSeek(t))?;
                }
                Step::Drag { start, end } => worker.send(ControllerEvent::RegionChanged { start, end })?,
                Step::Run(d)   => thread::sleep(d),
                Step::UntilHalt => eprintln!("wait is only meaningful in --script mode"),
                Step::Status   => match worker.snapshot() {
                    Some(snap) => out.snapshot(&snap)?,
                    None       => eprintln!("controller is not responding"),
                },
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    if ticker.join().is_err() {
        log::error!("[cli] ticker thread panicked");
    }
    worker.shutdown();
    if printer.join().is_err() {
        log::error!("[cli] printer thread panicked");
    }
    Ok(())
}
