// SPDX-License-Identifier: MPL-2.0

//! End-to-end recording pipeline tests with scripted codec sessions

use prism::errors::RecordingError;
use prism::record::{
    CodecOutput, CodecSession, ContainerSink, EncodedSample, EncoderFactory, Muxer,
    RecordListener, Recorder, RecorderSettings, TrackFormat, TrackKind, VideoEncodeSettings,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SinkEvent {
    AddTrack(TrackKind),
    Start,
    Write(usize),
    Finalize,
}

#[derive(Clone, Default)]
struct SinkLog {
    events: Arc<Mutex<Vec<SinkEvent>>>,
    pts: Arc<Mutex<Vec<u64>>>,
}

impl SinkLog {
    fn snapshot(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, matcher: impl Fn(&SinkEvent) -> bool) -> usize {
        self.snapshot().iter().filter(|e| matcher(e)).count()
    }

    fn pts(&self) -> Vec<u64> {
        self.pts.lock().unwrap().clone()
    }
}

struct FakeSink {
    log: SinkLog,
    tracks: usize,
}

impl ContainerSink for FakeSink {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, RecordingError> {
        self.log
            .events
            .lock()
            .unwrap()
            .push(SinkEvent::AddTrack(format.kind));
        let index = self.tracks;
        self.tracks += 1;
        Ok(index)
    }

    fn start(&mut self) -> Result<(), RecordingError> {
        self.log.events.lock().unwrap().push(SinkEvent::Start);
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<(), RecordingError> {
        self.log.events.lock().unwrap().push(SinkEvent::Write(track));
        self.log.pts.lock().unwrap().push(sample.pts_us);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), RecordingError> {
        self.log.events.lock().unwrap().push(SinkEvent::Finalize);
        Ok(())
    }
}

struct FakeCodecState {
    format_sent: bool,
    pending: VecDeque<CodecOutput>,
    eos_signalled: bool,
    eos_delivered: bool,
    inputs: usize,
}

/// Scripted codec: every queued input produces one encoded buffer, the
/// first one preceded by the format notification. EOS drains through after
/// `signal_end_of_stream`.
struct FakeCodec {
    kind: TrackKind,
    state: Mutex<FakeCodecState>,
}

impl FakeCodec {
    fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            state: Mutex::new(FakeCodecState {
                format_sent: false,
                pending: VecDeque::new(),
                eos_signalled: false,
                eos_delivered: false,
                inputs: 0,
            }),
        }
    }

    fn format(&self) -> TrackFormat {
        TrackFormat {
            kind: self.kind,
            caps: match self.kind {
                TrackKind::Video => "video/x-h264".into(),
                TrackKind::Audio => "audio/mpeg".into(),
            },
        }
    }
}

impl CodecSession for FakeCodec {
    fn queue_input(&self, data: &[u8], pts_us: u64) -> Result<(), RecordingError> {
        let mut state = self.state.lock().unwrap();
        if state.eos_signalled {
            return Err(RecordingError::PipelineError("input after EOS".into()));
        }
        if !state.format_sent {
            state.format_sent = true;
            let format = self.format();
            state.pending.push_back(CodecOutput::FormatChanged(format));
        }
        state.inputs += 1;
        state.pending.push_back(CodecOutput::Buffer(EncodedSample {
            data: data.to_vec().into_iter().take(16).collect(),
            pts_us,
            keyframe: true,
        }));
        Ok(())
    }

    fn signal_end_of_stream(&self) {
        let mut state = self.state.lock().unwrap();
        state.eos_signalled = true;
        if !state.format_sent {
            // a codec that saw no input still settles its format on flush
            state.format_sent = true;
            let format = self.format();
            state.pending.push_back(CodecOutput::FormatChanged(format));
        }
    }

    fn dequeue_output(&self, timeout: Duration) -> CodecOutput {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(output) = state.pending.pop_front() {
                return output;
            }
            if state.eos_signalled && !state.eos_delivered {
                state.eos_delivered = true;
                return CodecOutput::EndOfStream;
            }
        }
        std::thread::sleep(timeout.min(Duration::from_millis(1)));
        CodecOutput::TryAgain
    }

    fn release(&self) {}
}

struct FakeFactory {
    log: SinkLog,
}

impl EncoderFactory for FakeFactory {
    fn container(&self, _path: &Path) -> Result<Box<dyn ContainerSink>, RecordingError> {
        Ok(Box::new(FakeSink {
            log: self.log.clone(),
            tracks: 0,
        }))
    }

    fn video_session(
        &self,
        _settings: &VideoEncodeSettings,
    ) -> Result<Arc<dyn CodecSession>, RecordingError> {
        Ok(Arc::new(FakeCodec::new(TrackKind::Video)))
    }

    fn audio_session(&self) -> Result<Arc<dyn CodecSession>, RecordingError> {
        Ok(Arc::new(FakeCodec::new(TrackKind::Audio)))
    }
}

struct FailingVideoFactory;

impl EncoderFactory for FailingVideoFactory {
    fn container(&self, _path: &Path) -> Result<Box<dyn ContainerSink>, RecordingError> {
        Ok(Box::new(FakeSink {
            log: SinkLog::default(),
            tracks: 0,
        }))
    }

    fn video_session(
        &self,
        _settings: &VideoEncodeSettings,
    ) -> Result<Arc<dyn CodecSession>, RecordingError> {
        Err(RecordingError::EncoderNotAvailable("no codec".into()))
    }

    fn audio_session(&self) -> Result<Arc<dyn CodecSession>, RecordingError> {
        Ok(Arc::new(FakeCodec::new(TrackKind::Audio)))
    }
}

#[derive(Clone, Default)]
struct ListenerLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl ListenerLog {
    fn snapshot(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn wait_for(&self, event: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.snapshot().iter().any(|e| e == event) {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!(
            "timed out waiting for {:?}; events = {:?}",
            event,
            self.snapshot()
        );
    }
}

impl RecordListener for ListenerLog {
    fn on_prepared(&self) {
        self.events.lock().unwrap().push("prepared".into());
    }

    fn on_started(&self) {
        self.events.lock().unwrap().push("started".into());
    }

    fn on_stopped(&self) {
        self.events.lock().unwrap().push("stopped".into());
    }

    fn on_released(&self) {
        self.events.lock().unwrap().push("released".into());
    }

    fn on_error(&self, code: i32) {
        self.events.lock().unwrap().push(format!("error({})", code));
    }
}

fn settings(enable_audio: bool) -> RecorderSettings {
    RecorderSettings {
        output_path: PathBuf::from("/tmp/prism-test.mp4"),
        width: 64,
        height: 64,
        enable_audio,
        enable_hd: false,
    }
}

fn run_session(enable_audio: bool, frames: usize) -> (SinkLog, ListenerLog) {
    let log = SinkLog::default();
    let listener = ListenerLog::default();

    let recorder = Recorder::spawn_with_factory(Box::new(FakeFactory { log: log.clone() }));
    recorder.wait_until_ready();
    recorder.prepare(settings(enable_audio), Arc::new(listener.clone()));
    recorder.start_recording();
    listener.wait_for("started");

    let frame = vec![0u8; 64 * 64 * 4];
    for _ in 0..frames {
        recorder.submit_frame(frame.clone());
        recorder.frame_available();
        std::thread::sleep(Duration::from_millis(2));
    }

    recorder.stop_recording();
    listener.wait_for("released");
    drop(recorder);

    (log, listener)
}

#[test]
fn test_video_only_session_writes_one_track() {
    let (log, listener) = run_session(false, 6);

    let events = log.snapshot();
    assert_eq!(log.count(|e| *e == SinkEvent::Start), 1);
    assert_eq!(log.count(|e| *e == SinkEvent::Finalize), 1);
    assert_eq!(log.count(|e| matches!(e, SinkEvent::AddTrack(TrackKind::Video))), 1);
    assert_eq!(log.count(|e| matches!(e, SinkEvent::AddTrack(TrackKind::Audio))), 0);
    assert!(
        log.count(|e| matches!(e, SinkEvent::Write(_))) >= 1,
        "at least one sample must land: {:?}",
        events
    );
    // no write after the container is finalized
    let finalize = events.iter().position(|e| *e == SinkEvent::Finalize).unwrap();
    assert!(events[finalize..].iter().all(|e| !matches!(e, SinkEvent::Write(_))));

    let lifecycle = listener.snapshot();
    assert_eq!(lifecycle, ["prepared", "started", "stopped", "released"]);
}

#[test]
fn test_audio_session_completes_rendezvous() {
    let (log, _listener) = run_session(true, 6);

    let events = log.snapshot();
    assert_eq!(log.count(|e| *e == SinkEvent::Start), 1, "events = {:?}", events);
    assert_eq!(log.count(|e| *e == SinkEvent::Finalize), 1);
    assert_eq!(log.count(|e| matches!(e, SinkEvent::AddTrack(_))), 2);

    // the container start must come after both tracks registered
    let start = events.iter().position(|e| *e == SinkEvent::Start).unwrap();
    let track_count_before_start = events[..start]
        .iter()
        .filter(|e| matches!(e, SinkEvent::AddTrack(_)))
        .count();
    assert_eq!(track_count_before_start, 2);

    // every write happens inside the started window
    let finalize = events.iter().position(|e| *e == SinkEvent::Finalize).unwrap();
    for (index, event) in events.iter().enumerate() {
        if matches!(event, SinkEvent::Write(_)) {
            assert!(index > start && index < finalize);
        }
    }
}

#[test]
fn test_prepare_failure_reports_error_code() {
    let listener = ListenerLog::default();
    let recorder = Recorder::spawn_with_factory(Box::new(FailingVideoFactory));
    recorder.wait_until_ready();
    recorder.prepare(settings(false), Arc::new(listener.clone()));
    listener.wait_for("error(-1)");
    drop(recorder);

    let events = listener.snapshot();
    assert!(events.iter().all(|e| e != "prepared"));
    assert!(events.iter().all(|e| e != "started"));
}

#[test]
fn test_frame_signals_before_start_are_ignored() {
    let log = SinkLog::default();
    let listener = ListenerLog::default();
    let recorder = Recorder::spawn_with_factory(Box::new(FakeFactory { log: log.clone() }));
    recorder.wait_until_ready();
    recorder.prepare(settings(false), Arc::new(listener.clone()));
    listener.wait_for("prepared");

    // not started yet: the frames must not reach the container
    recorder.submit_frame(vec![0u8; 64 * 64 * 4]);
    recorder.frame_available();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(log.count(|e| matches!(e, SinkEvent::Write(_))), 0);

    recorder.stop_recording();
    drop(recorder);
}

#[test]
fn test_pause_freezes_timestamps() {
    // Direct muxer/track test: paused spans must not advance sample pts.
    let log = SinkLog::default();
    let muxer = Arc::new(Muxer::new(
        Box::new(FakeSink {
            log: log.clone(),
            tracks: 0,
        }),
        1,
    ));
    let session: Arc<dyn CodecSession> = Arc::new(FakeCodec::new(TrackKind::Video));
    let track = prism::record::VideoTrack::new(
        Arc::clone(&session),
        muxer,
        Arc::new(NullEncoderListener),
    );
    track.start_recording();

    track.submit_frame(&[1u8; 8]);
    track.frame_available_soon();
    std::thread::sleep(Duration::from_millis(50));

    track.pause_recording(true);
    std::thread::sleep(Duration::from_millis(300));
    track.pause_recording(false);

    track.submit_frame(&[2u8; 8]);
    track.frame_available_soon();
    std::thread::sleep(Duration::from_millis(50));

    track.stop_recording();
    drop(track);

    assert_eq!(log.count(|e| matches!(e, SinkEvent::Write(_))), 2);
    let pts = log.pts();
    // over 400ms of wall time passed between the samples, but the 300ms
    // pause is excluded from the presentation clock
    let diff = pts[1] - pts[0];
    assert!(diff < 250_000, "pause not excluded from pts: diff = {}us", diff);
    assert!(pts[1] >= pts[0], "timestamps must be monotonic");
}

struct NullEncoderListener;

impl prism::record::EncoderListener for NullEncoderListener {}
