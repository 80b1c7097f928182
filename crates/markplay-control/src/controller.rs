// crates/markplay-control/src/controller.rs
//
// The controller state machine. Single owner of the engine, the live region,
// the mark cursor, the one armed timer and the deferred frame work.
//
// Everything comes in through `handle(event)`, one event at a time. Deferred
// work (timer fires, frame continuations) carries a token or an epoch and
// re-validates against the current state before acting, so the most recent
// user decision always beats anything scheduled before it.
//
// The host is responsible for delivering:
//   - MarkTimerFired(token) once `next_timer()`'s deadline passes
//   - FrameElapsed on the next rendering frame while `has_frame_work()`
//   - engine callbacks (ticks, play/pause confirmations, seeks)
// ControllerWorker and sim::Harness both do exactly that.

use std::sync::Arc;

use markplay_core::marks::MARK_EPSILON;
use markplay_core::region::effective_end;
use markplay_core::{
    ControllerEvent, ControllerNotice, ControllerState, MarkIndex, Region, SessionPlan, Snapshot,
    TimerToken, Tolerances,
};

use crate::arbiter::{InteractionArbiter, PendingInteraction};
use crate::clock::{Clock, SystemClock, WallTime};
use crate::engine::{NoOverlay, PlaybackEngine, RegionOverlay};
use crate::registry::{Lease, Registry};
use crate::scheduler::{self, park_point, PauseScheduler, Plan, PlanInput, TimerPurpose};
use crate::snap::{apply_seek, snap_to, FrameQueue, FrameTask, SnapOutcome};

use markplay_core::ControllerState::{Idle, ParkedAtEnd, Paused, PausedAtMark, Playing, Resetting};

pub struct Controller<E: PlaybackEngine, K: Clock = SystemClock> {
    engine:    E,
    clock:     K,
    overlay:   Box<dyn RegionOverlay>,
    plan:      SessionPlan,
    tol:       Tolerances,

    state:     ControllerState,
    duration:  f64,
    region:    Option<Region>,
    marks:     MarkIndex,
    /// Cursor into the active marks: the next one playback will stop at.
    next_idx:  usize,
    rate:      f64,
    /// Bumped by every decision that invalidates queued frame work.
    epoch:     u64,
    last_tick: Option<f64>,

    scheduler: PauseScheduler,
    arbiter:   InteractionArbiter,
    frames:    FrameQueue,

    lease:     Lease,
    revoked:   bool,
    notices:   Vec<ControllerNotice>,
}

impl<E: PlaybackEngine, K: Clock> Controller<E, K> {
    /// Build a controller and register it with `registry`, revoking whatever
    /// controller held the host before. Stays `Idle` until `MediaReady`.
    pub fn new(engine: E, clock: K, plan: SessionPlan, registry: &Arc<Registry>) -> Self {
        let tol   = plan.tolerances;
        let mut marks = MarkIndex::new(plan.marks.clone());
        marks.clear_active();
        let lease = registry.register();
        log::info!(
            "[controller] session {} for {:?}, {} requested mark(s)",
            lease.id(),
            plan.media,
            marks.requested().len()
        );

        Self {
            engine,
            clock,
            overlay:   Box::new(NoOverlay),
            plan,
            tol,
            state:     Idle,
            duration:  0.0,
            region:    None,
            marks,
            next_idx:  0,
            rate:      1.0,
            epoch:     0,
            last_tick: None,
            scheduler: PauseScheduler::default(),
            arbiter:   InteractionArbiter::default(),
            frames:    FrameQueue::default(),
            lease,
            revoked:   false,
            notices:   Vec::new(),
        }
    }

    pub fn with_overlay(mut self, overlay: Box<dyn RegionOverlay>) -> Self {
        self.overlay = overlay;
        self
    }

    // ── Read side ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn region(&self) -> Option<Region> {
        self.region
    }

    pub fn tolerances(&self) -> &Tolerances {
        &self.tol
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn now(&self) -> WallTime {
        self.clock.now()
    }

    /// Where the playhead is, or is about to be once a deferred snap lands.
    pub fn position(&self) -> f64 {
        self.frames
            .pending_snap(self.epoch)
            .unwrap_or_else(|| self.engine.current_time())
    }

    /// The armed timer, for the host to fire at its deadline.
    pub fn next_timer(&self) -> Option<(TimerToken, WallTime)> {
        self.scheduler.next_deadline()
    }

    /// The host should deliver `FrameElapsed` on the next frame.
    pub fn has_frame_work(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state:           self.state,
            position:        self.position(),
            duration:        self.duration,
            region:          self.region,
            active_marks:    self.marks.active().to_vec(),
            next_mark_index: self.next_idx,
            rate:            self.rate,
        }
    }

    pub fn drain_notices(&mut self) -> Vec<ControllerNotice> {
        std::mem::take(&mut self.notices)
    }

    // ── Control surface ───────────────────────────────────────────────────────

    pub fn play_pause(&mut self) {
        self.handle(ControllerEvent::PlayPause);
    }

    pub fn stop(&mut self) {
        self.handle(ControllerEvent::Stop);
    }

    pub fn reset_region(&mut self) {
        self.handle(ControllerEvent::ResetRequested);
    }

    pub fn set_speed(&mut self, rate: f64) {
        self.handle(ControllerEvent::RateChanged(rate));
    }

    pub fn skip_by(&mut self, delta: f64) {
        self.handle(ControllerEvent::SkipBy(delta));
    }

    pub fn jump_to_previous_mark_and_play(&mut self) {
        self.handle(ControllerEvent::JumpToPreviousMark);
    }

    // ── Event dispatch ────────────────────────────────────────────────────────

    pub fn handle(&mut self, event: ControllerEvent) {
        if self.revoked {
            return;
        }
        if self.lease.is_revoked() {
            self.tear_down();
            return;
        }

        if event.is_chatty() {
            log::trace!("[controller] {event:?} in {}", self.state.label());
        } else {
            log::debug!("[controller] {event:?} in {}", self.state.label());
        }

        if event.is_user_driven()
            && !matches!(event, ControllerEvent::UserInteraction | ControllerEvent::UserSeek(_))
        {
            self.arbiter.cancel_pending();
        }

        match event {
            ControllerEvent::MediaReady(duration)    => self.on_media_ready(duration),
            ControllerEvent::Tick(t)                 => self.on_tick(t),
            ControllerEvent::PlaybackStarted         => self.on_playback_started(),
            ControllerEvent::PlaybackPaused          => self.on_playback_paused(),
            ControllerEvent::MarkTimerFired(token)   => self.on_timer(token),
            ControllerEvent::FrameElapsed            => self.on_frame(),
            ControllerEvent::RegionChanged { start, end } => self.on_region_changed(start, end),
            ControllerEvent::UserInteraction         => self.on_user_interaction(),
            ControllerEvent::UserSeek(t)             => self.on_user_seek(t),
            ControllerEvent::PlayRequested           => self.resume(),
            ControllerEvent::PauseRequested          => self.pause(),
            ControllerEvent::ResetRequested          => self.on_reset(),
            ControllerEvent::RateChanged(rate)       => self.on_rate_changed(rate),
            ControllerEvent::PlayPause               => {
                if self.state == Playing { self.pause() } else { self.resume() }
            }
            ControllerEvent::Stop                    => self.on_stop(),
            ControllerEvent::SkipBy(delta)           => self.on_skip(delta),
            ControllerEvent::JumpToPreviousMark      => self.on_jump_previous(),
        }
    }

    // ── Engine feedback ───────────────────────────────────────────────────────

    fn on_media_ready(&mut self, duration: f64) {
        if !(duration.is_finite() && duration > 0.0) {
            log::warn!("[controller] ignoring media with unusable duration {duration}");
            return;
        }
        if self.state != Idle {
            log::info!("[controller] media reloaded ({duration:.3}s)");
        }

        self.duration = duration;
        self.scheduler.cancel();
        self.frames.clear();
        self.arbiter.clear();
        self.bump_epoch();
        if self.engine.is_playing() {
            self.engine.pause();
        }

        let region = self.plan.region_for(duration);
        self.install_region(region);
        apply_seek(&mut self.engine, region.start, "load");
        self.next_idx = self.marks.first_strictly_after(region.start);
        self.set_state(Paused);
    }

    fn on_tick(&mut self, t: f64) {
        let prev = self.last_tick.replace(t);
        if !self.is_running() || self.frames.has_pending(self.epoch) {
            return;
        }
        if self.arbiter.is_suppressing(self.clock.now()) {
            return;
        }
        let Some(region) = self.region else { return };

        if prev.is_some_and(|p| p - t > self.tol.backward_jump_threshold) {
            self.next_idx = self.marks.first_strictly_after(t);
            log::debug!("[controller] position jumped back to {t:.3}s, next mark #{}", self.next_idx);
            self.reschedule();
        }

        if t < region.start - self.tol.end_detect_window {
            log::debug!("[controller] playing before region start ({t:.3}s), forcing to start");
            self.start_playing_from(region.start);
            return;
        }

        if let Some(mark) = self.marks.get(self.next_idx) {
            let eps = self.tol.tick_halt_epsilon(self.rate);
            if mark < park_point(region.end, &self.tol) && t + eps >= mark {
                self.halt_at_mark(mark);
                return;
            }
        }

        if t >= region.end - self.tol.end_detect_window {
            self.park_at_end();
        }
    }

    fn on_playback_started(&mut self) {
        match self.state {
            Idle => {}
            Resetting => {
                log::debug!("[controller] play while resetting, pausing");
                self.engine.pause();
            }
            Playing => {
                if !self.frames.has_pending(self.epoch) {
                    self.reschedule();
                }
            }
            Paused | PausedAtMark { .. } | ParkedAtEnd => {
                if !self.engine.is_playing() {
                    // Confirmation of a play that has since been undone.
                    return;
                }
                // Started from outside (media keys): same guards as a play request.
                let Some(landing) = self.resume_landing() else { return };
                if (landing - self.engine.current_time()).abs() <= MARK_EPSILON {
                    self.scheduler.cancel();
                    self.bump_epoch();
                    self.next_idx = self.marks.first_strictly_after(landing);
                    self.set_state(Playing);
                    self.reschedule();
                } else {
                    self.start_playing_from(landing);
                }
            }
        }
    }

    fn on_playback_paused(&mut self) {
        if self.state != Playing || self.engine.is_playing() || self.frames.has_pending(self.epoch) {
            return;
        }
        self.scheduler.cancel();
        let end = effective_end(self.region.as_ref(), self.duration);
        if self.region.is_some() && self.engine.current_time() >= end - self.tol.end_detect_window {
            // The engine ran into the end before a tick or timer caught it.
            self.park_at_end();
        } else {
            log::debug!("[controller] engine paused on its own");
            self.set_state(Paused);
        }
    }

    // ── Deferred work ─────────────────────────────────────────────────────────

    fn on_timer(&mut self, token: TimerToken) {
        let Some(timer) = self.scheduler.take_if_current(token) else {
            log::trace!("[controller] stale timer {token:?}");
            return;
        };
        if timer.purpose == TimerPurpose::SuppressionRecheck {
            self.reschedule();
            return;
        }
        if !self.is_running() {
            return;
        }
        if self.arbiter.is_suppressing(self.clock.now()) {
            self.reschedule();
            return;
        }
        let Some(region) = self.region else { return };
        let pos = self.engine.current_time();
        let eps = self.tol.tick_halt_epsilon(self.rate);

        match timer.purpose {
            TimerPurpose::HaltAtMark { mark } => {
                if self.marks.get(self.next_idx) != Some(mark) || pos + eps < mark {
                    log::debug!("[scheduler] timer for {mark:.3}s no longer valid at {pos:.3}s, re-planning");
                    self.reschedule();
                } else {
                    self.halt_at_mark(mark);
                }
            }
            TimerPurpose::ParkAtEnd => {
                if pos + eps < park_point(region.end, &self.tol) {
                    self.reschedule();
                } else {
                    self.park_at_end();
                }
            }
            TimerPurpose::SuppressionRecheck => {}
        }
    }

    fn on_frame(&mut self) {
        for (epoch, task) in self.frames.take_all() {
            if epoch != self.epoch {
                log::trace!("[controller] dropping stale frame task {task:?}");
                continue;
            }
            match task {
                FrameTask::Snap { target } => {
                    apply_seek(&mut self.engine, target, "frame");
                }
                FrameTask::Play => self.run_play(),
                FrameTask::SettleReset => {
                    if self.state == Resetting {
                        self.set_state(Paused);
                    }
                }
            }
        }
    }

    fn run_play(&mut self) {
        if self.state != Playing {
            return;
        }
        match self.engine.play() {
            Ok(()) => self.reschedule(),
            Err(e) => {
                log::warn!("[controller] engine refused to play: {e}");
                self.scheduler.cancel();
                self.set_state(Paused);
            }
        }
    }

    // ── Region ────────────────────────────────────────────────────────────────

    fn on_region_changed(&mut self, start: f64, end: f64) {
        if !self.state.is_ready() {
            log::debug!("[controller] region proposal ignored in {}", self.state.label());
            return;
        }
        let region = Region::clamped(start, end, self.duration, self.tol.min_region_len);
        if region.start != start || region.end != end {
            log::warn!(
                "[controller] region [{start:.3}, {end:.3}] repaired to [{:.3}, {:.3}]",
                region.start,
                region.end
            );
            self.install_region(region);
        } else {
            self.region = Some(region);
            self.marks.filter_to_region(&region);
            log::debug!(
                "[controller] region now [{:.3}, {:.3}], {} active mark(s)",
                region.start,
                region.end,
                self.marks.len()
            );
        }

        self.scheduler.cancel();
        let pos = self.position();

        match self.state {
            ParkedAtEnd => {
                self.next_idx = self.marks.first_strictly_after(pos);
                self.set_state(Paused);
            }
            PausedAtMark { mark } => {
                self.next_idx = self.marks.first_strictly_after(mark);
                if mark < region.start || mark > region.end {
                    self.set_state(Paused);
                }
            }
            Playing => {
                self.next_idx = self.marks.first_strictly_after(pos);
                if pos >= park_point(region.end, &self.tol) {
                    self.park_at_end();
                } else if pos < region.start {
                    self.start_playing_from(region.start);
                } else {
                    self.reschedule();
                }
            }
            _ => {
                self.next_idx = self.marks.first_strictly_after(pos);
            }
        }
    }

    fn on_reset(&mut self) {
        if self.state == Idle {
            log::warn!("[controller] reset ignored, no media loaded");
            return;
        }
        self.set_state(Resetting);
        if self.engine.is_playing() {
            self.engine.pause();
        }
        self.scheduler.cancel();
        self.frames.clear();
        self.arbiter.clear();
        self.bump_epoch();

        let region = self.plan.region_for(self.duration);
        self.install_region(region);
        apply_seek(&mut self.engine, region.start, "reset");
        self.next_idx = self.marks.first_strictly_after(region.start);
        self.frames.push(self.epoch, FrameTask::SettleReset);
    }

    fn install_region(&mut self, region: Region) {
        self.overlay.clear_regions();
        self.overlay.add_region(region);
        self.region = Some(region);
        self.marks.filter_to_region(&region);
        log::info!(
            "[controller] region [{:.3}, {:.3}] of {:.3}s, {} active mark(s)",
            region.start,
            region.end,
            self.duration,
            self.marks.len()
        );
    }

    // ── User gestures ─────────────────────────────────────────────────────────

    fn on_user_interaction(&mut self) {
        if !self.state.is_ready() {
            return;
        }
        let engine_playing = self.engine.is_playing();
        self.arbiter.begin(self.clock.now(), self.tol.suppress_window(), engine_playing);
        self.scheduler.cancel();
        self.frames.clear();
        self.bump_epoch();

        if self.state.is_auto_halted() || (self.state == Playing && !engine_playing) {
            self.set_state(Paused);
        }
        // Playing through the gesture: come back when the window closes.
        self.reschedule();
    }

    fn on_user_seek(&mut self, t: f64) {
        if !self.state.is_ready() {
            return;
        }
        if !t.is_finite() {
            log::warn!("[controller] ignoring seek to {t}");
            return;
        }
        let Some(region) = self.region else { return };
        match self.arbiter.take_pending() {
            Some(gesture) => self.land_gesture(t, region, gesture),
            None          => self.on_engine_seek(t, region),
        }
    }

    /// Seek confirmation for a timeline gesture.
    fn land_gesture(&mut self, t: f64, region: Region, gesture: PendingInteraction) {
        self.scheduler.cancel();
        let landing = region.clamp_playable(t);

        let mut deferred = false;
        if (landing - self.engine.current_time()).abs() > MARK_EPSILON {
            deferred = snap_to(&mut self.engine, &mut self.frames, self.epoch, landing)
                == SnapOutcome::Deferred;
        }
        self.next_idx = self.marks.first_after_grace(landing, self.tol.seek_grace);

        if !(gesture.autoplay || deferred || self.engine.is_playing()) {
            return;
        }
        log::debug!(
            "[arbiter] gesture lands at {landing:.3}s after {} ms, next mark #{} (autoplay {})",
            self.clock.now().saturating_since(gesture.started_at).as_millis(),
            self.next_idx,
            gesture.autoplay
        );
        self.set_state(Playing);
        if self.engine.is_playing() {
            self.reschedule();
        } else if !self.frames.has_pending_play(self.epoch) {
            self.frames.push(self.epoch, FrameTask::Play);
        }
    }

    /// A position change nobody announced with a gesture.
    fn on_engine_seek(&mut self, t: f64, region: Region) {
        if self.state.is_auto_halted() && (t - self.position()).abs() <= self.tol.park_seek_match {
            // Echo of our own halt snap.
            return;
        }
        self.scheduler.cancel();

        if (t - region.end).abs() < self.tol.park_seek_match && self.state != Playing {
            self.next_idx = self.marks.len();
            self.set_state(ParkedAtEnd);
            return;
        }
        if self.state.is_auto_halted() {
            self.set_state(Paused);
        }
        self.next_idx = self.marks.first_strictly_after(t);

        if self.state == Playing {
            if t < region.start {
                self.start_playing_from(region.start);
            } else if t >= park_point(region.end, &self.tol) {
                self.park_at_end();
            } else {
                self.reschedule();
            }
        }
    }

    // ── Explicit requests ─────────────────────────────────────────────────────

    fn resume(&mut self) {
        match self.state {
            Idle => log::warn!("[controller] play ignored, no media loaded"),
            Resetting => {
                log::debug!("[controller] play swallowed while resetting");
                if self.engine.is_playing() {
                    self.engine.pause();
                }
            }
            Playing => {
                if !self.engine.is_playing() && !self.frames.has_pending_play(self.epoch) {
                    self.frames.push(self.epoch, FrameTask::Play);
                }
            }
            Paused | PausedAtMark { .. } | ParkedAtEnd => {
                if let Some(landing) = self.resume_landing() {
                    self.start_playing_from(landing);
                }
            }
        }
    }

    fn pause(&mut self) {
        self.scheduler.cancel();
        self.frames.cancel_plays();
        if self.engine.is_playing() {
            self.engine.pause();
        }
        if self.state == Playing {
            self.set_state(Paused);
        }
    }

    fn on_stop(&mut self) {
        if !self.state.is_ready() {
            return;
        }
        let Some(region) = self.region else { return };
        self.scheduler.cancel();
        self.frames.clear();
        self.arbiter.clear();
        self.bump_epoch();
        if self.engine.is_playing() {
            self.engine.pause();
        }
        apply_seek(&mut self.engine, region.start, "stop");
        self.next_idx = self.marks.first_strictly_after(region.start);
        self.set_state(Paused);
    }

    fn on_rate_changed(&mut self, rate: f64) {
        if !(rate.is_finite() && rate > 0.0) {
            log::warn!("[controller] rejecting playback rate {rate}");
            return;
        }
        self.rate = rate;
        self.engine.set_playback_rate(rate, true);
        log::debug!("[controller] rate {rate}");
        if self.state == Playing {
            self.reschedule();
        }
    }

    fn on_skip(&mut self, delta: f64) {
        if !self.state.is_ready() || !delta.is_finite() {
            return;
        }
        let Some(region) = self.region else { return };
        let base = if self.state == ParkedAtEnd { region.end } else { self.position() };
        let hi   = park_point(region.end, &self.tol).max(region.start);
        let target = (base + delta).clamp(region.start, hi);

        match self.state {
            Playing | PausedAtMark { .. } | ParkedAtEnd => self.start_playing_from(target),
            _ => {
                self.scheduler.cancel();
                self.frames.clear();
                self.bump_epoch();
                snap_to(&mut self.engine, &mut self.frames, self.epoch, target);
                self.next_idx = self.marks.first_strictly_after(target);
            }
        }
    }

    fn on_jump_previous(&mut self) {
        if !self.state.is_ready() {
            return;
        }
        let Some(region) = self.region else { return };
        let base = match self.state {
            ParkedAtEnd          => region.end,
            PausedAtMark { mark } => mark,
            _                    => self.position(),
        };
        let target = self.marks.last_strictly_before(base, region.start);
        log::debug!("[controller] previous mark from {base:.3}s is {target:.3}s");
        self.start_playing_from(target);
    }

    // ── Transitions ───────────────────────────────────────────────────────────

    fn halt_at_mark(&mut self, mark: f64) {
        let Some(region) = self.region else { return };
        self.scheduler.cancel();
        self.bump_epoch();
        let target = (mark + self.tol.halt_offset).max(region.start);
        snap_to(&mut self.engine, &mut self.frames, self.epoch, target);
        self.next_idx = self.marks.first_strictly_after(mark);
        self.set_state(PausedAtMark { mark });
        self.notices.push(ControllerNotice::HaltedAtMark { mark, position: target });
    }

    fn park_at_end(&mut self) {
        let Some(region) = self.region else { return };
        self.scheduler.cancel();
        self.bump_epoch();
        let target = park_point(region.end, &self.tol).max(region.start);
        snap_to(&mut self.engine, &mut self.frames, self.epoch, target);
        self.next_idx = self.marks.len();
        self.set_state(ParkedAtEnd);
        self.notices.push(ControllerNotice::ParkedAtEnd { position: target });
    }

    /// Move to `landing` and start the engine on the next frame.
    fn start_playing_from(&mut self, landing: f64) {
        self.scheduler.cancel();
        self.frames.clear();
        self.bump_epoch();
        if (landing - self.engine.current_time()).abs() > MARK_EPSILON {
            snap_to(&mut self.engine, &mut self.frames, self.epoch, landing);
        }
        self.next_idx = self.marks.first_strictly_after(landing);
        self.set_state(Playing);
        self.frames.push(self.epoch, FrameTask::Play);
    }

    /// Where a resume from the current state starts.
    fn resume_landing(&self) -> Option<f64> {
        let region = self.region?;
        let landing = match self.state {
            ParkedAtEnd           => region.start,
            PausedAtMark { mark } => self.playable_landing(&region, mark + self.tol.resume_nudge),
            _                     => self.playable_landing(&region, self.position()),
        };
        Some(landing)
    }

    /// `t` if playback can start there, else the region start.
    fn playable_landing(&self, region: &Region, t: f64) -> f64 {
        if t >= region.start && t < park_point(region.end, &self.tol) {
            t
        } else {
            region.start
        }
    }

    fn reschedule(&mut self) {
        self.scheduler.cancel();
        if !self.is_running() {
            return;
        }
        let Some(region) = self.region else { return };
        let now = self.clock.now();

        let (plan, idx) = scheduler::plan(PlanInput {
            position:       self.engine.current_time(),
            rate:           self.rate,
            now,
            suppress_until: self.arbiter.suppress_until(now),
            region_end:     region.end,
            next_idx:       self.next_idx,
            marks:          &self.marks,
            tolerances:     &self.tol,
        });
        self.next_idx = idx;

        match plan {
            Plan::Recheck { at } => {
                self.scheduler.arm(at, TimerPurpose::SuppressionRecheck);
                log::trace!("[scheduler] suppressed, recheck in {:?}", at.saturating_since(now));
            }
            Plan::Arm { deadline, purpose } => {
                let token = self.scheduler.arm(deadline, purpose);
                log::debug!(
                    "[scheduler] {purpose:?} in {:?} ({token:?})",
                    deadline.saturating_since(now)
                );
            }
            Plan::ParkNow => self.park_at_end(),
        }
    }

    fn is_running(&self) -> bool {
        self.state == Playing && self.engine.is_playing()
    }

    /// Start a new playhead generation. Deferred frame work from the old one
    /// goes stale, and the next tick is not compared against a pre-move tick.
    fn bump_epoch(&mut self) {
        self.epoch += 1;
        self.last_tick = None;
    }

    fn set_state(&mut self, to: ControllerState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        log::info!("[controller] {} -> {}", from.label(), to.label());
        self.notices.push(ControllerNotice::StateChanged { from, to });
    }

    fn tear_down(&mut self) {
        log::warn!("[controller] lease {} revoked, shutting down", self.lease.id());
        self.revoked = true;
        self.scheduler.cancel();
        self.frames.clear();
        self.arbiter.clear();
        if self.engine.is_playing() {
            self.engine.pause();
        }
        self.set_state(Idle);
        self.notices.push(ControllerNotice::Revoked);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::sim::Harness;

    fn plan(marks: &[f64]) -> SessionPlan {
        SessionPlan {
            media:      "clip.mp3".into(),
            start:      None,
            end:        None,
            marks:      marks.to_vec(),
            tolerances: Tolerances::default(),
        }
    }

    fn loaded(marks: &[f64]) -> Harness {
        let mut h = Harness::new(plan(marks), 10.0);
        h.load();
        h
    }

    fn assert_near(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected} ± {tol}, got {actual}"
        );
    }

    fn halted_mark(h: &Harness) -> Option<f64> {
        match h.state() {
            PausedAtMark { mark } => Some(mark),
            _ => None,
        }
    }

    const LONG: Duration = Duration::from_secs(30);

    #[test]
    fn idle_until_media_ready() {
        let mut h = Harness::new(plan(&[2.0]), 10.0);
        assert_eq!(h.state(), Idle);
        h.send(ControllerEvent::PlayRequested);
        assert_eq!(h.state(), Idle);
        assert!(!h.engine.is_playing());

        h.load();
        assert_eq!(h.state(), Paused);
        assert_eq!(h.controller.region(), Some(Region { start: 0.0, end: 10.0 }));
        assert_eq!(h.overlay.regions(), vec![Region { start: 0.0, end: 10.0 }]);
    }

    #[test]
    fn bad_duration_keeps_idle() {
        let mut h = Harness::new(plan(&[]), 10.0);
        h.send(ControllerEvent::MediaReady(f64::NAN));
        h.send(ControllerEvent::MediaReady(0.0));
        assert_eq!(h.state(), Idle);
    }

    #[test]
    fn load_moves_to_configured_start() {
        let mut p = plan(&[1.0, 3.0, 6.0]);
        p.start = Some(2.0);
        p.end   = Some(5.0);
        let mut h = Harness::new(p, 10.0);
        h.load();
        assert_eq!(h.position(), 2.0);
        assert_eq!(h.controller.snapshot().active_marks, vec![3.0]);
    }

    #[test]
    fn example_session_halts_at_each_mark_then_parks() {
        let mut h = loaded(&[2.0, 5.0, 8.0]);

        h.send(ControllerEvent::PlayRequested);
        assert_eq!(h.state(), Playing);
        assert!(h.engine.is_playing());

        for mark in [2.0, 5.0, 8.0] {
            assert!(h.run_until_halt(LONG));
            assert_eq!(halted_mark(&h), Some(mark));
            assert_near(h.position(), mark, 0.05);
            assert!(!h.engine.is_playing());
            h.send(ControllerEvent::PlayPause);
            assert_eq!(h.state(), Playing);
        }

        assert!(h.run_until_halt(LONG));
        assert_eq!(h.state(), ParkedAtEnd);
        assert!(h.position() <= 10.0);
        assert_near(h.position(), 10.0, 0.05);

        h.send(ControllerEvent::PlayPause);
        assert_eq!(h.state(), Playing);
        assert_near(h.position(), 0.0, 0.05);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(2.0));
    }

    #[test]
    fn halts_on_first_mark_ahead_only() {
        let mut h = loaded(&[2.0, 5.0, 8.0]);
        h.send(ControllerEvent::SkipBy(3.0));
        assert_eq!(h.state(), Paused);
        assert_near(h.position(), 3.0, 1e-9);

        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(5.0));
    }

    #[test]
    fn resume_after_halt_never_retriggers_same_mark() {
        let mut h = loaded(&[2.0, 5.0]);
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(2.0));

        h.send(ControllerEvent::PlayRequested);
        h.run_for(Duration::from_millis(500));
        assert_eq!(h.state(), Playing);
        assert!(h.position() > 2.0);

        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(5.0));
    }

    #[test]
    fn click_on_mark_while_paused_goes_to_next_mark() {
        let mut h = loaded(&[2.0, 5.0, 8.0]);
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(2.0));

        h.click(5.0);
        assert_eq!(h.state(), Playing);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(8.0));
    }

    #[test]
    fn click_while_playing_suppresses_then_continues() {
        let mut h = loaded(&[2.0, 5.0, 8.0]);
        h.send(ControllerEvent::PlayRequested);
        h.run_for(Duration::from_millis(500));

        h.click(4.97);
        assert_eq!(h.state(), Playing);
        assert!(h.engine.is_playing());
        assert!(matches!(
            h.controller.next_timer(),
            Some((_, at)) if at > h.now()
        ));
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(8.0));
    }

    #[test]
    fn click_outside_region_lands_on_start() {
        let mut p = plan(&[3.0]);
        p.start = Some(1.0);
        p.end   = Some(6.0);
        let mut h = Harness::new(p, 10.0);
        h.load();

        h.click(8.0);
        assert_eq!(h.state(), Playing);
        assert_near(h.engine.current_time(), 1.0, 0.05);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(3.0));
    }

    #[test]
    fn halving_rate_doubles_delay() {
        let mut h = loaded(&[5.0]);
        h.send(ControllerEvent::PlayRequested);
        h.run_for(Duration::from_millis(1000));

        let (_, at) = h.controller.next_timer().unwrap();
        let before = at.saturating_since(h.now()).as_secs_f64();
        let remaining = 5.0 - h.engine.current_time();
        assert_near(before, remaining, 0.001);

        h.send(ControllerEvent::RateChanged(0.5));
        let (_, at) = h.controller.next_timer().unwrap();
        let after = at.saturating_since(h.now()).as_secs_f64();
        assert_near(after, 2.0 * (5.0 - h.engine.current_time()), 0.001);
        assert!(after > 1.9 * before);

        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(5.0));
    }

    #[test]
    fn invalid_rate_rejected() {
        let mut h = loaded(&[]);
        h.send(ControllerEvent::RateChanged(0.0));
        h.send(ControllerEvent::RateChanged(-2.0));
        h.send(ControllerEvent::RateChanged(f64::INFINITY));
        assert_eq!(h.controller.snapshot().rate, 1.0);
        assert_eq!(h.engine.rate(), 1.0);
    }

    #[test]
    fn narrowing_region_drops_mark_ahead() {
        let mut h = loaded(&[2.0, 5.0, 8.0]);
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        h.send(ControllerEvent::PlayRequested);
        h.run_for(Duration::from_millis(500));

        h.send(ControllerEvent::RegionChanged { start: 0.0, end: 4.5 });
        assert_eq!(h.controller.snapshot().active_marks, vec![2.0]);

        assert!(h.run_until_halt(LONG));
        assert_eq!(h.state(), ParkedAtEnd);
        assert!(h.position() <= 4.5);
    }

    #[test]
    fn shrinking_region_behind_playhead_parks() {
        let mut h = loaded(&[]);
        h.send(ControllerEvent::PlayRequested);
        h.run_for(Duration::from_secs(3));
        h.send(ControllerEvent::RegionChanged { start: 0.0, end: 2.0 });
        assert_eq!(h.state(), ParkedAtEnd);
        assert!(h.position() <= 2.0);
    }

    #[test]
    fn inverted_region_is_repaired() {
        let mut h = loaded(&[]);
        h.send(ControllerEvent::RegionChanged { start: 6.0, end: 3.0 });
        let r = h.controller.region().unwrap();
        assert!(r.start < r.end);
        assert_eq!(r.start, 6.0);
        assert_eq!(h.overlay.regions(), vec![r]);
    }

    #[test]
    fn jump_previous_from_playing_lands_on_mark_and_continues() {
        let mut h = loaded(&[2.0, 5.0, 8.0]);
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(5.0));
        h.send(ControllerEvent::PlayRequested);
        h.run_for(Duration::from_secs(1));

        h.send(ControllerEvent::JumpToPreviousMark);
        assert_eq!(h.state(), Playing);
        assert_near(h.engine.current_time(), 5.0, 0.05);
        assert_eq!(h.controller.snapshot().next_mark(), Some(8.0));

        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(8.0));
    }

    #[test]
    fn jump_previous_from_halt_replays_chunk() {
        let mut h = loaded(&[2.0, 5.0, 8.0]);
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(5.0));

        h.send(ControllerEvent::JumpToPreviousMark);
        assert_near(h.position(), 2.0, 0.05);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(5.0));
    }

    #[test]
    fn jump_previous_without_marks_goes_to_start() {
        let mut p = plan(&[]);
        p.start = Some(1.5);
        let mut h = Harness::new(p, 10.0);
        h.load();
        h.send(ControllerEvent::PlayRequested);
        h.run_for(Duration::from_secs(2));
        h.send(ControllerEvent::JumpToPreviousMark);
        assert_near(h.engine.current_time(), 1.5, 0.05);
        assert_eq!(h.state(), Playing);
    }

    #[test]
    fn jump_previous_from_parked_uses_last_mark() {
        let mut h = loaded(&[2.0, 5.0]);
        h.send(ControllerEvent::SkipBy(6.0));
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        assert_eq!(h.state(), ParkedAtEnd);

        h.send(ControllerEvent::JumpToPreviousMark);
        assert_near(h.position(), 5.0, 0.05);
        assert_eq!(h.state(), Playing);
    }

    #[test]
    fn stale_timer_is_noop() {
        let mut h = loaded(&[2.0]);
        h.send(ControllerEvent::PlayRequested);
        let (token, _) = h.controller.next_timer().unwrap();

        h.send(ControllerEvent::PauseRequested);
        assert_eq!(h.state(), Paused);
        assert!(h.controller.next_timer().is_none());

        h.send(ControllerEvent::MarkTimerFired(token));
        assert_eq!(h.state(), Paused);
        assert!(h.controller.drain_notices().iter().all(|n| !matches!(n, ControllerNotice::HaltedAtMark { .. })));
    }

    #[test]
    fn superseded_frame_work_is_dropped() {
        let mut h = loaded(&[]);
        h.send(ControllerEvent::PlayRequested);
        h.run_for(Duration::from_secs(3));

        // Queue snap + play for 4.0, then park before the frame arrives.
        h.controller.handle(ControllerEvent::SkipBy(1.0));
        assert!(h.controller.has_frame_work());
        h.controller.handle(ControllerEvent::RegionChanged { start: 0.0, end: 3.5 });
        assert_eq!(h.state(), ParkedAtEnd);

        h.settle();
        assert_eq!(h.state(), ParkedAtEnd);
        assert!(!h.engine.is_playing());
        assert_near(h.engine.current_time(), 3.48, 1e-9);
    }

    #[test]
    fn play_while_resetting_is_swallowed() {
        let mut h = loaded(&[2.0]);
        h.send(ControllerEvent::PlayRequested);
        h.run_for(Duration::from_secs(1));

        h.controller.handle(ControllerEvent::ResetRequested);
        assert_eq!(h.state(), Resetting);
        h.controller.handle(ControllerEvent::PlayRequested);
        h.engine.external_play();
        h.controller.handle(ControllerEvent::PlaybackStarted);
        assert!(!h.engine.is_playing());
        assert_eq!(h.state(), Resetting);

        h.settle();
        assert_eq!(h.state(), Paused);
        assert_eq!(h.position(), 0.0);
        assert!(!h.engine.is_playing());
    }

    #[test]
    fn reset_restores_configured_region() {
        let mut p = plan(&[2.0, 5.0]);
        p.end = Some(7.0);
        let mut h = Harness::new(p, 10.0);
        h.load();
        h.send(ControllerEvent::RegionChanged { start: 3.0, end: 4.0 });
        assert!(h.controller.snapshot().active_marks.is_empty());

        h.send(ControllerEvent::ResetRequested);
        assert_eq!(h.state(), Paused);
        assert_eq!(h.controller.region(), Some(Region { start: 0.0, end: 7.0 }));
        assert_eq!(h.overlay.regions(), vec![Region { start: 0.0, end: 7.0 }]);
        assert_eq!(h.controller.snapshot().active_marks, vec![2.0, 5.0]);
    }

    #[test]
    fn stop_returns_to_start() {
        let mut h = loaded(&[2.0, 5.0]);
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        h.send(ControllerEvent::Stop);
        assert_eq!(h.state(), Paused);
        assert_eq!(h.position(), 0.0);
        assert_eq!(h.controller.snapshot().next_mark(), Some(2.0));
    }

    #[test]
    fn pause_then_play_continues_from_position() {
        let mut h = loaded(&[5.0]);
        h.send(ControllerEvent::PlayRequested);
        h.run_for(Duration::from_secs(2));
        h.send(ControllerEvent::PlayPause);
        assert_eq!(h.state(), Paused);
        let here = h.position();
        h.run_for(Duration::from_secs(1));
        assert_eq!(h.position(), here);

        h.send(ControllerEvent::PlayPause);
        assert_near(h.engine.current_time(), here, 0.05);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(5.0));
    }

    #[test]
    fn skip_clamps_into_region() {
        let mut h = loaded(&[]);
        h.send(ControllerEvent::SkipBy(-100.0));
        assert_eq!(h.position(), 0.0);
        h.send(ControllerEvent::SkipBy(100.0));
        assert_near(h.position(), 9.98, 1e-9);
        assert_eq!(h.state(), Paused);
    }

    #[test]
    fn skip_from_halt_resumes() {
        let mut h = loaded(&[2.0, 5.0]);
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        h.send(ControllerEvent::SkipBy(-1.0));
        assert_eq!(h.state(), Playing);
        assert_near(h.engine.current_time(), 1.0, 0.05);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(2.0));
    }

    #[test]
    fn ticks_alone_halt_on_marks() {
        let mut h = loaded(&[2.0, 5.0]);
        h.timers = false;
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(2.0));
        assert_near(h.position(), 2.0, 1e-9);

        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(5.0));

        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        assert_eq!(h.state(), ParkedAtEnd);
        assert!(h.position() <= 10.0);
    }

    #[test]
    fn ticks_alone_catch_early_mark_after_park() {
        let mut h = loaded(&[0.1, 5.0]);
        h.timers = false;
        h.send(ControllerEvent::SkipBy(6.0));
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        assert_eq!(h.state(), ParkedAtEnd);

        h.send(ControllerEvent::PlayPause);
        assert_eq!(h.controller.snapshot().next_mark(), Some(0.1));
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(0.1));
        assert_near(h.position(), 0.1, 1e-9);
    }

    #[test]
    fn coarse_ticks_snap_back_onto_mark() {
        let mut h = Harness::new(plan(&[2.5, 5.0]), 10.0).with_tick_interval(Duration::from_secs(1));
        h.load();
        h.timers = false;
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(2.5));
        assert_near(h.position(), 2.5, 1e-9);
    }

    #[test]
    fn timers_alone_halt_on_marks() {
        let mut h = loaded(&[2.0, 5.0]);
        h.ticks = false;
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(2.0));
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(5.0));
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        assert_eq!(h.state(), ParkedAtEnd);
    }

    #[test]
    fn external_play_from_halt_moves_past_mark() {
        let mut h = loaded(&[2.0, 5.0]);
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));

        h.engine.external_play();
        h.send(ControllerEvent::PlaybackStarted);
        assert_eq!(h.state(), Playing);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(5.0));
    }

    #[test]
    fn engine_pause_from_outside_pauses_controller() {
        let mut h = loaded(&[5.0]);
        h.send(ControllerEvent::PlayRequested);
        h.run_for(Duration::from_secs(1));
        let mut engine = h.engine.clone();
        engine.pause();
        h.send(ControllerEvent::PlaybackPaused);
        assert_eq!(h.state(), Paused);
        assert!(h.controller.next_timer().is_none());
    }

    #[test]
    fn engine_seek_to_region_end_parks() {
        let mut h = loaded(&[2.0]);
        h.engine.user_seek(10.0);
        h.send(ControllerEvent::UserSeek(10.0));
        assert_eq!(h.state(), ParkedAtEnd);
        h.send(ControllerEvent::PlayRequested);
        assert_near(h.engine.current_time(), 0.0, 0.05);
    }

    #[test]
    fn play_rejection_falls_back_to_paused() {
        let mut h = loaded(&[2.0]);
        h.engine.fail_plays(true);
        h.send(ControllerEvent::PlayRequested);
        assert_eq!(h.state(), Paused);
        assert!(h.controller.next_timer().is_none());
    }

    #[test]
    fn failed_seek_is_not_fatal() {
        let mut h = loaded(&[2.0, 5.0]);
        h.send(ControllerEvent::PlayRequested);
        h.engine.fail_seeks(true);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(2.0));
        h.engine.fail_seeks(false);
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        assert_eq!(halted_mark(&h), Some(5.0));
    }

    #[test]
    fn newer_session_revokes_older() {
        let registry = Arc::new(Registry::default());
        let mut first = Harness::with_registry(plan(&[2.0]), 10.0, &registry);
        first.load();
        first.send(ControllerEvent::PlayRequested);
        assert!(first.engine.is_playing());
        first.controller.drain_notices();

        let mut second = Harness::with_registry(plan(&[2.0]), 10.0, &registry);
        second.load();

        first.send(ControllerEvent::Tick(0.1));
        assert_eq!(first.state(), Idle);
        assert!(!first.engine.is_playing());
        assert!(first.controller.next_timer().is_none());
        assert_eq!(first.controller.drain_notices().last(), Some(&ControllerNotice::Revoked));

        first.send(ControllerEvent::PlayRequested);
        assert_eq!(first.state(), Idle);
        assert_eq!(second.state(), Paused);
    }

    #[test]
    fn notices_report_halts() {
        let mut h = loaded(&[2.0]);
        h.controller.drain_notices();
        h.send(ControllerEvent::PlayRequested);
        assert!(h.run_until_halt(LONG));
        let notices = h.controller.drain_notices();
        assert!(notices.contains(&ControllerNotice::HaltedAtMark { mark: 2.0, position: 2.0 }));
        assert!(notices.contains(&ControllerNotice::StateChanged { from: Paused, to: Playing }));
    }
}
