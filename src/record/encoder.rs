// SPDX-License-Identifier: MPL-2.0

//! Per-track encoder worker.
//!
//! Each track (video, audio) runs its own drain thread. Input arrives on
//! other threads through the codec session; `frame_available_soon` bumps a
//! coalesced counter that wakes the drain loop, which pulls every encoded
//! buffer the codec has ready and writes it to the muxer. Stopping is
//! cooperative: drain, signal end-of-stream, drain the flush, release.

use super::codec::{CodecOutput, CodecSession};
use super::muxer::{Muxer, TrackKind};
use crate::sync::ReadyLatch;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Codec or device selection failed during prepare
pub const ERROR_NO_CODEC: i32 = -1;
/// The codec reported its output format twice
pub const ERROR_FORMAT_CHANGED_TWICE: i32 = -2;
/// An encoded buffer arrived before the track registered with the muxer
pub const ERROR_MUXER_NOT_STARTED: i32 = -3;

/// Poll timeout for one dequeue attempt
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(10);
/// Consecutive empty polls tolerated before a drain pass gives up
const DRAIN_MISS_BUDGET: u32 = 5;
/// Empty polls tolerated while waiting for the end-of-stream flush
const EOS_MISS_BUDGET: u32 = 300;

/// Lifecycle callbacks from the encoder threads. All methods default to
/// no-ops so listeners implement only what they need.
pub trait EncoderListener: Send + Sync {
    fn on_prepared(&self, _kind: TrackKind) {}
    fn on_started(&self, _kind: TrackKind) {}
    fn on_stopped(&self, _kind: TrackKind) {}
    fn on_released(&self, _kind: TrackKind) {}
    fn on_error(&self, _kind: TrackKind, _code: i32) {}
}

/// Presentation-timestamp clock: wall time since construction, excluding
/// paused spans, clamped monotonic.
pub struct PtsClock {
    origin: Instant,
    paused_total: Duration,
    pause_begin: Option<Instant>,
    last_pts: u64,
}

impl PtsClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            paused_total: Duration::ZERO,
            pause_begin: None,
            last_pts: 0,
        }
    }

    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    pub fn resume(&mut self) {
        self.resume_at(Instant::now());
    }

    /// Next presentation timestamp in microseconds.
    pub fn now_us(&mut self) -> u64 {
        self.pts_at(Instant::now())
    }

    pub(crate) fn pause_at(&mut self, now: Instant) {
        if self.pause_begin.is_none() {
            self.pause_begin = Some(now);
        }
    }

    pub(crate) fn resume_at(&mut self, now: Instant) {
        if let Some(begin) = self.pause_begin.take() {
            self.paused_total += now.saturating_duration_since(begin);
        }
    }

    pub(crate) fn pts_at(&mut self, now: Instant) -> u64 {
        let mut excluded = self.paused_total;
        if let Some(begin) = self.pause_begin {
            excluded += now.saturating_duration_since(begin);
        }
        let elapsed = now.saturating_duration_since(self.origin);
        let pts = elapsed.saturating_sub(excluded).as_micros() as u64;
        self.last_pts = pts.max(self.last_pts);
        self.last_pts
    }
}

impl Default for PtsClock {
    fn default() -> Self {
        Self::new()
    }
}

struct TrackState {
    capturing: bool,
    request_stop: bool,
    request_drain: u32,
}

struct TrackShared {
    kind: TrackKind,
    state: Mutex<TrackState>,
    cond: Condvar,
    clock: Mutex<PtsClock>,
    session: Arc<dyn CodecSession>,
}

/// Cloneable handle to a track's shared state, used by the threads feeding
/// the codec input side.
#[derive(Clone)]
pub struct TrackHandle {
    shared: Arc<TrackShared>,
}

impl TrackHandle {
    /// Whether the track is capturing and not yet asked to stop.
    pub fn is_active(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.capturing && !state.request_stop
    }

    /// Next input timestamp from the track's pause-aware clock.
    pub fn pts_now_us(&self) -> u64 {
        self.shared.clock.lock().unwrap().now_us()
    }

    /// The codec session's input end.
    pub fn session(&self) -> &Arc<dyn CodecSession> {
        &self.shared.session
    }

    /// Signal that frame data is (or will soon be) available. Multiple
    /// signals before a drain coalesce; each drain pass consumes all
    /// available output. Returns whether the encoder accepted the signal.
    pub fn frame_available_soon(&self) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        if !state.capturing || state.request_stop {
            return false;
        }
        state.request_drain += 1;
        self.shared.cond.notify_all();
        true
    }
}

/// One encoder track and its drain thread.
pub struct TrackEncoder {
    shared: Arc<TrackShared>,
    join: Option<JoinHandle<()>>,
}

impl TrackEncoder {
    /// Spawn the drain thread. Returns once the thread's loop is live.
    pub fn spawn(
        kind: TrackKind,
        session: Arc<dyn CodecSession>,
        muxer: Arc<Muxer>,
        listener: Arc<dyn EncoderListener>,
    ) -> Self {
        let shared = Arc::new(TrackShared {
            kind,
            state: Mutex::new(TrackState {
                capturing: false,
                request_stop: false,
                request_drain: 0,
            }),
            cond: Condvar::new(),
            clock: Mutex::new(PtsClock::new()),
            session,
        });

        let ready = Arc::new(ReadyLatch::new());
        let ready_clone = Arc::clone(&ready);
        let shared_clone = Arc::clone(&shared);

        let join = std::thread::Builder::new()
            .name(format!("{}-encoder", kind))
            .spawn(move || {
                let mut loop_state = DrainLoop {
                    shared: shared_clone,
                    muxer,
                    listener,
                    track_index: 0,
                    muxer_started: false,
                    eos_signalled: false,
                };
                ready_clone.set_ready();
                loop_state.run();
            })
            .expect("failed to spawn encoder thread");
        ready.wait();

        Self {
            shared,
            join: Some(join),
        }
    }

    pub fn handle(&self) -> TrackHandle {
        TrackHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.shared.kind
    }

    /// Transition to capturing. Frames signalled from now on are drained.
    pub fn start_recording(&self) {
        debug!(kind = %self.shared.kind, "start recording");
        let mut state = self.shared.state.lock().unwrap();
        state.capturing = true;
        state.request_stop = false;
        self.shared.cond.notify_all();
    }

    /// Request a cooperative stop. Returns immediately; the drain thread
    /// flushes the codec and releases on its own schedule.
    pub fn stop_recording(&self) {
        debug!(kind = %self.shared.kind, "stop recording");
        let mut state = self.shared.state.lock().unwrap();
        if !state.capturing || state.request_stop {
            return;
        }
        state.request_stop = true;
        self.shared.cond.notify_all();
    }

    /// Pause or resume the presentation clock; paused spans are excluded
    /// from every subsequent timestamp.
    pub fn pause_recording(&self, paused: bool) {
        let mut clock = self.shared.clock.lock().unwrap();
        if paused {
            clock.pause();
        } else {
            clock.resume();
        }
    }

    /// Wait for the drain thread to finish its teardown.
    pub fn join(&mut self) {
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!(kind = %self.shared.kind, "encoder thread panicked");
            }
        }
    }
}

impl Drop for TrackEncoder {
    fn drop(&mut self) {
        {
            // unconditional, unlike stop_recording: a track that never
            // started capturing still needs its thread unparked
            let mut state = self.shared.state.lock().unwrap();
            state.request_stop = true;
            self.shared.cond.notify_all();
        }
        self.join();
    }
}

/// The drain thread's private state.
struct DrainLoop {
    shared: Arc<TrackShared>,
    muxer: Arc<Muxer>,
    listener: Arc<dyn EncoderListener>,
    track_index: usize,
    muxer_started: bool,
    eos_signalled: bool,
}

impl DrainLoop {
    fn run(&mut self) {
        debug!(kind = %self.shared.kind, "encoder thread started");
        {
            let mut state = self.shared.state.lock().unwrap();
            state.request_stop = false;
            state.request_drain = 0;
        }

        loop {
            let (request_stop, request_drain) = {
                let mut state = self.shared.state.lock().unwrap();
                let stop = state.request_stop;
                let drain = state.request_drain > 0;
                if drain {
                    state.request_drain -= 1;
                }
                (stop, drain)
            };

            if request_stop {
                self.drain();
                self.shared.session.signal_end_of_stream();
                self.eos_signalled = true;
                // flush the EOS buffer
                self.drain();
                self.release();
                break;
            }

            if request_drain {
                self.drain();
            } else {
                let state = self.shared.state.lock().unwrap();
                let _unused = self
                    .shared
                    .cond
                    .wait_timeout(state, Duration::from_millis(100))
                    .unwrap();
            }
        }

        let mut state = self.shared.state.lock().unwrap();
        state.capturing = false;
        state.request_stop = true;
        debug!(kind = %self.shared.kind, "encoder thread exiting");
    }

    fn capturing(&self) -> bool {
        self.shared.state.lock().unwrap().capturing
    }

    fn abort_capture(&self) {
        self.shared.state.lock().unwrap().capturing = false;
    }

    /// Pull all currently available codec output and hand it to the muxer.
    fn drain(&mut self) {
        let mut misses = 0u32;
        while self.capturing() {
            match self.shared.session.dequeue_output(DEQUEUE_TIMEOUT) {
                CodecOutput::TryAgain => {
                    misses += 1;
                    let budget = if self.eos_signalled {
                        EOS_MISS_BUDGET
                    } else {
                        DRAIN_MISS_BUDGET
                    };
                    if misses > budget {
                        if self.eos_signalled {
                            warn!(kind = %self.shared.kind, "codec never flushed EOS, giving up");
                            self.abort_capture();
                        }
                        break;
                    }
                }
                CodecOutput::FormatChanged(format) => {
                    debug!(kind = %self.shared.kind, caps = %format.caps, "output format changed");
                    if self.muxer_started {
                        // the format must settle exactly once, before data
                        error!(kind = %self.shared.kind, "format changed twice");
                        self.listener
                            .on_error(self.shared.kind, ERROR_FORMAT_CHANGED_TWICE);
                        self.abort_capture();
                        break;
                    }
                    match self.muxer.add_track(&format) {
                        Ok(index) => self.track_index = index,
                        Err(err) => {
                            error!(kind = %self.shared.kind, error = %err, "track registration failed");
                            self.listener.on_error(self.shared.kind, ERROR_MUXER_NOT_STARTED);
                            self.abort_capture();
                            break;
                        }
                    }
                    self.muxer_started = true;
                    match self.muxer.start() {
                        Ok(true) => {}
                        Ok(false) => {
                            // the sibling track hasn't arrived yet
                            self.muxer.wait_until_started();
                        }
                        Err(err) => {
                            error!(kind = %self.shared.kind, error = %err, "muxer start failed");
                            self.listener.on_error(self.shared.kind, ERROR_MUXER_NOT_STARTED);
                            self.abort_capture();
                            break;
                        }
                    }
                }
                CodecOutput::Buffer(mut sample) => {
                    if sample.data.is_empty() {
                        // codec-config buffer, already folded into the format
                        continue;
                    }
                    if !self.muxer_started {
                        error!(kind = %self.shared.kind, "buffer before format, aborting track");
                        self.listener.on_error(self.shared.kind, ERROR_MUXER_NOT_STARTED);
                        self.abort_capture();
                        break;
                    }
                    misses = 0;
                    sample.pts_us = self.shared.clock.lock().unwrap().now_us();
                    self.muxer.write_sample(self.track_index, &sample);
                }
                CodecOutput::EndOfStream => {
                    debug!(kind = %self.shared.kind, "end of stream drained");
                    self.abort_capture();
                    break;
                }
            }
        }
    }

    /// Best-effort teardown; every step logs rather than propagates so the
    /// release always completes.
    fn release(&mut self) {
        info!(kind = %self.shared.kind, "releasing encoder");
        self.shared.session.release();
        if self.muxer_started {
            self.muxer.stop();
            self.muxer_started = false;
        }
        self.listener.on_stopped(self.shared.kind);
        self.listener.on_released(self.shared.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pts_clock_monotonic() {
        let mut clock = PtsClock::new();
        let origin = clock.origin;
        let t1 = clock.pts_at(origin + Duration::from_millis(10));
        let t2 = clock.pts_at(origin + Duration::from_millis(20));
        assert_eq!(t1, 10_000);
        assert_eq!(t2, 20_000);
    }

    #[test]
    fn test_pts_clock_excludes_paused_time() {
        let mut clock = PtsClock::new();
        let origin = clock.origin;
        clock.pause_at(origin + Duration::from_millis(10));
        clock.resume_at(origin + Duration::from_millis(40));
        // 50ms wall time minus 30ms paused
        assert_eq!(clock.pts_at(origin + Duration::from_millis(50)), 20_000);
    }

    #[test]
    fn test_pts_clock_frozen_while_paused() {
        let mut clock = PtsClock::new();
        let origin = clock.origin;
        let before = clock.pts_at(origin + Duration::from_millis(5));
        clock.pause_at(origin + Duration::from_millis(10));
        let during = clock.pts_at(origin + Duration::from_millis(500));
        assert_eq!(during, 10_000);
        assert!(during >= before);
    }

    #[test]
    fn test_pts_clock_never_regresses() {
        let mut clock = PtsClock::new();
        let origin = clock.origin;
        let late = clock.pts_at(origin + Duration::from_millis(30));
        // a clock read with an earlier instant must not go backwards
        let early = clock.pts_at(origin + Duration::from_millis(20));
        assert_eq!(early, late);
    }

    #[test]
    fn test_double_pause_is_idempotent() {
        let mut clock = PtsClock::new();
        let origin = clock.origin;
        clock.pause_at(origin + Duration::from_millis(10));
        clock.pause_at(origin + Duration::from_millis(20));
        clock.resume_at(origin + Duration::from_millis(30));
        // paused span is 10..30 from the first pause
        assert_eq!(clock.pts_at(origin + Duration::from_millis(40)), 20_000);
    }
}
