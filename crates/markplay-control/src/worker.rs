// crates/markplay-control/src/worker.rs
//
// ControllerWorker: runs one controller on its own thread.
//
// The controller itself never blocks and never spawns anything; it only says
// when it next needs attention (`next_timer`, `has_frame_work`). This thread
// turns that into a `recv_timeout` deadline and delivers MarkTimerFired and
// FrameElapsed itself, so the host only forwards engine callbacks and user
// commands. Notices go out on a bounded result channel; if nobody drains it
// they are dropped rather than stalling playback.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

use markplay_core::{ControllerEvent, ControllerNotice, Snapshot};

use crate::clock::{Clock, WallTime};
use crate::controller::Controller;
use crate::engine::PlaybackEngine;

#[derive(Debug, Error)]
#[error("controller worker has stopped")]
pub struct WorkerStopped;

// ── Internal types ────────────────────────────────────────────────────────────

enum WorkerMsg {
    Event(ControllerEvent),
    Snapshot(Sender<Snapshot>),
    Shutdown,
}

// ── ControllerWorker ──────────────────────────────────────────────────────────

pub struct ControllerWorker {
    tx:          Sender<WorkerMsg>,
    /// State changes, halts and revocation, in order.
    pub notices: Receiver<ControllerNotice>,
    handle:      Option<JoinHandle<()>>,
}

impl ControllerWorker {
    pub fn spawn<E, K>(controller: Controller<E, K>) -> Self
    where
        E: PlaybackEngine + 'static,
        K: Clock + 'static,
    {
        let (tx, rx)               = bounded(256);
        let (notice_tx, notices)   = bounded(512);
        let handle = thread::Builder::new()
            .name("markplay-controller".into())
            .spawn(move || run(controller, rx, notice_tx))
            .map_err(|e| log::error!("[worker] could not spawn controller thread: {e}"))
            .ok();

        Self { tx, notices, handle }
    }

    pub fn send(&self, event: ControllerEvent) -> Result<(), WorkerStopped> {
        self.tx.send(WorkerMsg::Event(event)).map_err(|_| WorkerStopped)
    }

    /// Event-only handle for other threads (engine callbacks, tickers).
    pub fn sender(&self) -> WorkerSender {
        WorkerSender { tx: self.tx.clone() }
    }

    /// Current controller view, or `None` if the worker is gone or busy for
    /// longer than a second.
    pub fn snapshot(&self) -> Option<Snapshot> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx.send(WorkerMsg::Snapshot(reply_tx)).ok()?;
        reply_rx.recv_timeout(Duration::from_secs(1)).ok()
    }

    /// Stop the thread and wait for it.
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(WorkerMsg::Shutdown);
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                log::error!("[worker] controller thread panicked");
            }
        }
    }
}

/// Cloneable event sender into a running worker.
#[derive(Clone)]
pub struct WorkerSender {
    tx: Sender<WorkerMsg>,
}

impl WorkerSender {
    pub fn send(&self, event: ControllerEvent) -> Result<(), WorkerStopped> {
        self.tx.send(WorkerMsg::Event(event)).map_err(|_| WorkerStopped)
    }
}

impl Drop for ControllerWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<E: PlaybackEngine, K: Clock>(
    mut controller: Controller<E, K>,
    rx:             Receiver<WorkerMsg>,
    notice_tx:      Sender<ControllerNotice>,
) {
    let frame_interval = controller.tolerances().frame_interval();
    let mut next_frame: Option<WallTime> = None;
    log::debug!("[worker] started");

    loop {
        let now = controller.now();
        if controller.has_frame_work() {
            next_frame.get_or_insert(now + frame_interval);
        } else {
            next_frame = None;
        }
        let deadline = [controller.next_timer().map(|(_, at)| at), next_frame]
            .into_iter()
            .flatten()
            .min();

        let msg = match deadline {
            Some(at) => rx.recv_timeout(at.saturating_since(now)),
            None     => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match msg {
            Ok(WorkerMsg::Event(event)) => controller.handle(event),
            Ok(WorkerMsg::Snapshot(reply)) => {
                let _ = reply.send(controller.snapshot());
            }
            Ok(WorkerMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let now = controller.now();
                if let Some((token, at)) = controller.next_timer() {
                    if at <= now {
                        controller.handle(ControllerEvent::MarkTimerFired(token));
                    }
                }
                if next_frame.is_some_and(|f| f <= now) {
                    next_frame = None;
                    controller.handle(ControllerEvent::FrameElapsed);
                }
            }
        }

        for notice in controller.drain_notices() {
            if notice_tx.try_send(notice).is_err() {
                log::trace!("[worker] notice channel full, dropping {notice:?}");
            }
        }
    }
    log::debug!("[worker] stopped");
}
