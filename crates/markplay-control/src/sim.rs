// crates/markplay-control/src/sim.rs
//
// Deterministic stand-ins for the outside world.
//
// SimulatedEngine behaves like a media element: position advances only when
// someone calls `advance`, play/pause report back as queued engine events,
// and reaching the end of the media stops playback. Clones share one media
// state, so the controller can own one handle while a harness or a ticker
// thread drives another.
//
// Harness wires a controller to a SimulatedEngine and a ManualClock and steps
// virtual time from one due event to the next (timer deadline, rendering
// frame, position tick), so whole sessions run in microseconds and the same
// way every time. Tests use it; so does the CLI's scripted mode.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use markplay_core::{ControllerEvent, ControllerState, Region, SessionPlan};

use crate::clock::{Clock, ManualClock, WallTime};
use crate::controller::Controller;
use crate::engine::{EngineError, PlaybackEngine, RegionOverlay};
use crate::registry::Registry;

/// Something the engine reports back asynchronously.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    Started,
    Paused,
}

#[derive(Debug)]
struct SimMedia {
    duration:   f64,
    position:   f64,
    playing:    bool,
    rate:       f64,
    outbox:     Vec<EngineEvent>,
    fail_play:  bool,
    fail_seek:  bool,
}

// ── SimulatedEngine ───────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct SimulatedEngine {
    inner: Arc<Mutex<SimMedia>>,
}

impl SimulatedEngine {
    pub fn new(duration: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimMedia {
                duration,
                position:  0.0,
                playing:   false,
                rate:      1.0,
                outbox:    Vec::new(),
                fail_play: false,
                fail_seek: false,
            })),
        }
    }

    /// Let `secs` of wall time pass. Media time moves by `secs * rate` while
    /// playing; running into the end stops playback like a media element does.
    pub fn advance(&self, secs: f64) {
        let mut m = self.inner.lock();
        if !m.playing || secs <= 0.0 {
            return;
        }
        m.position += secs * m.rate;
        if m.position >= m.duration {
            m.position = m.duration;
            m.playing  = false;
            m.outbox.push(EngineEvent::Paused);
        }
    }

    /// Position change made by the user directly on the engine (a click on
    /// its own timeline). Emits nothing; the host reports it as a seek.
    pub fn user_seek(&self, t: f64) {
        let mut m = self.inner.lock();
        m.position = t.clamp(0.0, m.duration);
    }

    /// Play started outside the controller (media keys, OS controls).
    pub fn external_play(&self) {
        let mut m = self.inner.lock();
        if !m.playing {
            m.playing = true;
            m.outbox.push(EngineEvent::Started);
        }
    }

    pub fn drain_events(&self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.inner.lock().outbox)
    }

    pub fn rate(&self) -> f64 {
        self.inner.lock().rate
    }

    pub fn fail_plays(&self, fail: bool) {
        self.inner.lock().fail_play = fail;
    }

    pub fn fail_seeks(&self, fail: bool) {
        self.inner.lock().fail_seek = fail;
    }
}

impl PlaybackEngine for SimulatedEngine {
    fn play(&mut self) -> Result<(), EngineError> {
        let mut m = self.inner.lock();
        if m.duration <= 0.0 {
            return Err(EngineError::NotReady);
        }
        if m.fail_play {
            return Err(EngineError::PlayRejected("simulated rejection".into()));
        }
        if m.position >= m.duration {
            m.position = 0.0;
        }
        if !m.playing {
            m.playing = true;
            m.outbox.push(EngineEvent::Started);
        }
        Ok(())
    }

    fn pause(&mut self) {
        let mut m = self.inner.lock();
        if m.playing {
            m.playing = false;
            m.outbox.push(EngineEvent::Paused);
        }
    }

    fn is_playing(&self) -> bool {
        self.inner.lock().playing
    }

    fn current_time(&self) -> f64 {
        self.inner.lock().position
    }

    fn set_time(&mut self, t: f64) -> Result<(), EngineError> {
        let mut m = self.inner.lock();
        if m.fail_seek {
            return Err(EngineError::SeekFailed { target: t, reason: "simulated failure".into() });
        }
        m.position = t.clamp(0.0, m.duration);
        Ok(())
    }

    fn duration(&self) -> f64 {
        self.inner.lock().duration
    }

    fn set_playback_rate(&mut self, rate: f64, _preserve_pitch: bool) {
        self.inner.lock().rate = rate;
    }
}

// ── SimOverlay ────────────────────────────────────────────────────────────────

/// Overlay that remembers what it was asked to draw.
#[derive(Clone, Debug, Default)]
pub struct SimOverlay {
    regions: Arc<Mutex<Vec<Region>>>,
}

impl SimOverlay {
    pub fn regions(&self) -> Vec<Region> {
        self.regions.lock().clone()
    }
}

impl RegionOverlay for SimOverlay {
    fn add_region(&mut self, region: Region) {
        self.regions.lock().push(region);
    }

    fn clear_regions(&mut self) {
        self.regions.lock().clear();
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

/// Upper bound on events handled by one `run_*` call; a guard against a
/// controller that keeps re-arming without time moving.
const MAX_STEPS: usize = 200_000;

pub struct Harness {
    pub clock:      ManualClock,
    pub engine:     SimulatedEngine,
    pub overlay:    SimOverlay,
    pub controller: Controller<SimulatedEngine, ManualClock>,
    /// Deliver periodic position ticks.
    pub ticks:      bool,
    /// Fire the controller's timer at its deadline.
    pub timers:     bool,
    duration:       f64,
    tick_interval:  Duration,
    frame_interval: Duration,
    next_tick:      WallTime,
}

impl Harness {
    /// Harness with its own private registry.
    pub fn new(plan: SessionPlan, duration: f64) -> Self {
        Self::with_registry(plan, duration, &Arc::new(Registry::default()))
    }

    pub fn with_registry(plan: SessionPlan, duration: f64, registry: &Arc<Registry>) -> Self {
        let clock          = ManualClock::new();
        let engine         = SimulatedEngine::new(duration);
        let overlay        = SimOverlay::default();
        let frame_interval = plan.tolerances.frame_interval();
        let tick_interval  = Duration::from_millis(250);

        let controller = Controller::new(engine.clone(), clock.clone(), plan, registry)
            .with_overlay(Box::new(overlay.clone()));

        Self {
            clock,
            engine,
            overlay,
            controller,
            ticks: true,
            timers: true,
            duration,
            tick_interval,
            frame_interval,
            next_tick: WallTime::ZERO + tick_interval,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self.next_tick     = self.clock.now() + self.tick_interval;
        self
    }

    /// Report the media as loaded.
    pub fn load(&mut self) {
        let duration = self.duration;
        self.send(ControllerEvent::MediaReady(duration));
    }

    /// Hand one event to the controller, then let pending frame work run.
    pub fn send(&mut self, event: ControllerEvent) {
        self.deliver(event);
        self.settle();
    }

    /// A click on the timeline at `t`: gesture, engine-side seek, confirmation.
    pub fn click(&mut self, t: f64) {
        self.deliver(ControllerEvent::UserInteraction);
        self.engine.user_seek(t);
        self.deliver(ControllerEvent::UserSeek(t));
        self.settle();
    }

    /// Run until no frame continuation is queued.
    pub fn settle(&mut self) {
        for _ in 0..64 {
            if !self.controller.has_frame_work() {
                return;
            }
            let frame = self.next_frame_after(self.clock.now());
            while self.controller.has_frame_work() && self.step(frame) {}
        }
    }

    /// Advance virtual time by `d`, handling everything that falls due.
    pub fn run_for(&mut self, d: Duration) {
        let until = self.clock.now() + d;
        for _ in 0..MAX_STEPS {
            if !self.step(until) {
                return;
            }
        }
        log::warn!("[sim] run_for gave up after {MAX_STEPS} steps");
    }

    /// Run until the controller halts on its own (mark or end) or `max`
    /// passes. Returns whether it halted.
    pub fn run_until_halt(&mut self, max: Duration) -> bool {
        let until = self.clock.now() + max;
        for _ in 0..MAX_STEPS {
            let fired = self.step(until);
            if self.controller.state().is_auto_halted() {
                self.settle();
                return true;
            }
            if !fired {
                return false;
            }
        }
        false
    }

    pub fn state(&self) -> ControllerState {
        self.controller.state()
    }

    pub fn position(&self) -> f64 {
        self.controller.position()
    }

    pub fn now(&self) -> WallTime {
        self.clock.now()
    }

    // ── stepping ──────────────────────────────────────────────────────────────

    /// Move to the earliest due event (or `until`) and fire it. Returns false
    /// when nothing was due before `until`.
    fn step(&mut self, until: WallTime) -> bool {
        let now   = self.clock.now();
        let timer = if self.timers { self.controller.next_timer() } else { None };
        let frame = self.controller.has_frame_work().then(|| self.next_frame_after(now));
        let tick  = self.ticks.then_some(self.next_tick);

        let at = [timer.map(|(_, d)| d), frame, tick]
            .into_iter()
            .flatten()
            .fold(until, WallTime::min)
            .max(now);
        self.advance_to(at);

        if let Some((token, deadline)) = timer {
            if deadline <= at {
                self.deliver(ControllerEvent::MarkTimerFired(token));
                return true;
            }
        }
        if frame.is_some_and(|f| f <= at) {
            self.deliver(ControllerEvent::FrameElapsed);
            return true;
        }
        if tick.is_some_and(|t| t <= at) {
            self.next_tick = self.next_tick + self.tick_interval;
            if self.engine.is_playing() {
                let t = self.engine.current_time();
                self.deliver(ControllerEvent::Tick(t));
            }
            return true;
        }
        false
    }

    fn advance_to(&mut self, at: WallTime) {
        let now = self.clock.now();
        if at > now {
            self.engine.advance(at.saturating_since(now).as_secs_f64());
            self.clock.set(at);
        }
        if !self.ticks {
            while self.next_tick <= at {
                self.next_tick = self.next_tick + self.tick_interval;
            }
        }
        self.pump();
    }

    fn next_frame_after(&self, now: WallTime) -> WallTime {
        let fi = u64::try_from(self.frame_interval.as_micros()).unwrap_or(u64::MAX).max(1);
        WallTime::from_micros((now.as_micros() / fi + 1) * fi)
    }

    fn deliver(&mut self, event: ControllerEvent) {
        self.controller.handle(event);
        self.pump();
    }

    /// Feed engine-side events back as controller events.
    fn pump(&mut self) {
        for _ in 0..32 {
            let events = self.engine.drain_events();
            if events.is_empty() {
                return;
            }
            for e in events {
                self.controller.handle(match e {
                    EngineEvent::Started => ControllerEvent::PlaybackStarted,
                    EngineEvent::Paused  => ControllerEvent::PlaybackPaused,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_advances_only_while_playing() {
        let mut e = SimulatedEngine::new(10.0);
        e.advance(1.0);
        assert_eq!(e.current_time(), 0.0);
        e.play().unwrap();
        e.advance(1.5);
        assert_eq!(e.current_time(), 1.5);
        e.set_playback_rate(2.0, true);
        e.advance(1.0);
        assert_eq!(e.current_time(), 3.5);
        assert_eq!(e.drain_events(), vec![EngineEvent::Started]);
    }

    #[test]
    fn engine_stops_at_end() {
        let mut e = SimulatedEngine::new(2.0);
        e.play().unwrap();
        e.advance(5.0);
        assert_eq!(e.current_time(), 2.0);
        assert!(!e.is_playing());
        assert_eq!(e.drain_events(), vec![EngineEvent::Started, EngineEvent::Paused]);
    }

    #[test]
    fn clones_share_media() {
        let a = SimulatedEngine::new(10.0);
        let mut b = a.clone();
        b.set_time(4.0).unwrap();
        assert_eq!(a.current_time(), 4.0);
    }

    #[test]
    fn rejected_play_reports_error() {
        let mut e = SimulatedEngine::new(10.0);
        e.fail_plays(true);
        assert!(matches!(e.play(), Err(EngineError::PlayRejected(_))));
        assert!(!e.is_playing());
    }

    #[test]
    fn overlay_records_regions() {
        let mut o = SimOverlay::default();
        o.add_region(Region { start: 1.0, end: 2.0 });
        assert_eq!(o.regions().len(), 1);
        o.clear_regions();
        assert!(o.regions().is_empty());
    }
}
