// SPDX-License-Identifier: MPL-2.0

//! Muxer start/stop rendezvous tests

use prism::errors::RecordingError;
use prism::record::{ContainerSink, EncodedSample, Muxer, TrackFormat, TrackKind};
use std::sync::{Arc, Mutex};

/// Everything the container saw, in order
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
}

impl SinkLog {
    fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, matcher: impl Fn(&SinkEvent) -> bool) -> usize {
        self.events().iter().filter(|e| matcher(e)).count()
    }
}

struct FakeSink {
    log: SinkLog,
    tracks: usize,
}

impl FakeSink {
    fn new(log: SinkLog) -> Self {
        Self { log, tracks: 0 }
    }
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

    fn write_sample(&mut self, track: usize, _sample: &EncodedSample) -> Result<(), RecordingError> {
        self.log.events.lock().unwrap().push(SinkEvent::Write(track));
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), RecordingError> {
        self.log.events.lock().unwrap().push(SinkEvent::Finalize);
        Ok(())
    }
}

fn video_format() -> TrackFormat {
    TrackFormat {
        kind: TrackKind::Video,
        caps: "video/x-h264".into(),
    }
}

fn audio_format() -> TrackFormat {
    TrackFormat {
        kind: TrackKind::Audio,
        caps: "audio/mpeg".into(),
    }
}

fn sample() -> EncodedSample {
    EncodedSample {
        data: vec![1, 2, 3],
        pts_us: 0,
        keyframe: true,
    }
}

#[test]
fn test_container_starts_only_after_both_tracks() {
    let log = SinkLog::default();
    let muxer = Muxer::new(Box::new(FakeSink::new(log.clone())), 2);

    let video = muxer.add_track(&video_format()).unwrap();
    assert!(!muxer.start().unwrap(), "first arrival must not start");
    assert!(!muxer.is_started());
    assert_eq!(log.count(|e| *e == SinkEvent::Start), 0);

    let audio = muxer.add_track(&audio_format()).unwrap();
    assert!(muxer.start().unwrap(), "second arrival completes the rendezvous");
    assert!(muxer.is_started());

    assert_ne!(video, audio);
    assert_eq!(log.count(|e| *e == SinkEvent::Start), 1);
}

#[test]
fn test_arrival_order_is_irrelevant() {
    for audio_first in [false, true] {
        let log = SinkLog::default();
        let muxer = Muxer::new(Box::new(FakeSink::new(log.clone())), 2);

        let (first, second) = if audio_first {
            (audio_format(), video_format())
        } else {
            (video_format(), audio_format())
        };
        muxer.add_track(&first).unwrap();
        assert!(!muxer.start().unwrap());
        muxer.add_track(&second).unwrap();
        assert!(muxer.start().unwrap());

        assert_eq!(
            log.count(|e| *e == SinkEvent::Start),
            1,
            "exactly one container start (audio_first = {})",
            audio_first
        );
    }
}

#[test]
fn test_single_track_starts_immediately() {
    let log = SinkLog::default();
    let muxer = Muxer::new(Box::new(FakeSink::new(log.clone())), 1);

    muxer.add_track(&video_format()).unwrap();
    assert!(muxer.start().unwrap());
    assert_eq!(log.count(|e| *e == SinkEvent::Start), 1);
}

#[test]
fn test_finalized_exactly_once_when_count_returns_to_zero() {
    let log = SinkLog::default();
    let muxer = Muxer::new(Box::new(FakeSink::new(log.clone())), 2);

    let video = muxer.add_track(&video_format()).unwrap();
    muxer.add_track(&audio_format()).unwrap();
    muxer.start().unwrap();
    muxer.start().unwrap();

    // first stop: the sibling is still flushing, no finalize yet
    muxer.stop();
    assert_eq!(log.count(|e| *e == SinkEvent::Finalize), 0);
    // writes from the still-running track keep landing
    muxer.write_sample(video, &sample());
    assert_eq!(log.count(|e| matches!(e, SinkEvent::Write(_))), 1);

    muxer.stop();
    assert_eq!(log.count(|e| *e == SinkEvent::Finalize), 1);
    assert!(!muxer.is_started());
}

#[test]
fn test_no_write_after_final_stop() {
    let log = SinkLog::default();
    let muxer = Muxer::new(Box::new(FakeSink::new(log.clone())), 1);

    let track = muxer.add_track(&video_format()).unwrap();
    muxer.start().unwrap();
    muxer.write_sample(track, &sample());
    muxer.stop();
    muxer.write_sample(track, &sample());

    let events = log.events();
    assert_eq!(events.last(), Some(&SinkEvent::Finalize));
    assert_eq!(log.count(|e| matches!(e, SinkEvent::Write(_))), 1);
}

#[test]
fn test_writes_before_start_are_dropped() {
    let log = SinkLog::default();
    let muxer = Muxer::new(Box::new(FakeSink::new(log.clone())), 2);

    let track = muxer.add_track(&video_format()).unwrap();
    muxer.start().unwrap();
    // only one of two tracks arrived; the container is not running
    muxer.write_sample(track, &sample());
    assert_eq!(log.count(|e| matches!(e, SinkEvent::Write(_))), 0);
}

#[test]
fn test_add_track_after_start_is_rejected() {
    let log = SinkLog::default();
    let muxer = Muxer::new(Box::new(FakeSink::new(log)), 1);

    muxer.add_track(&video_format()).unwrap();
    muxer.start().unwrap();
    assert!(muxer.add_track(&audio_format()).is_err());
}

#[test]
fn test_blocked_sibling_released_by_last_arrival() {
    let log = SinkLog::default();
    let muxer = Arc::new(Muxer::new(Box::new(FakeSink::new(log.clone())), 2));

    muxer.add_track(&video_format()).unwrap();
    assert!(!muxer.start().unwrap());

    let waiter = {
        let muxer = Arc::clone(&muxer);
        std::thread::spawn(move || {
            muxer.wait_until_started();
        })
    };

    std::thread::sleep(std::time::Duration::from_millis(30));
    muxer.add_track(&audio_format()).unwrap();
    assert!(muxer.start().unwrap());

    waiter.join().expect("blocked drain loop must be released");
    assert_eq!(log.count(|e| *e == SinkEvent::Start), 1);
}
