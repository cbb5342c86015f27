// SPDX-License-Identifier: MPL-2.0

//! Hardware-encoded recording pipeline.
//!
//! A [`Recorder`] owns its worker thread, a [`Muxer`] gating the MP4
//! container behind the two-track rendezvous, an H.264 video track fed by
//! the render thread's encoder surface, and an optional AAC audio track
//! with its own microphone capture thread.

mod audio;
mod codec;
mod encoder;
mod muxer;
mod video;

pub use audio::AudioTrack;
pub use codec::{
    AudioEncodeSettings, CodecOutput, CodecSession, EncoderProbe, GstAudioSession,
    GstVideoSession, VideoEncodeSettings, probe_encoders,
};
pub use encoder::{
    ERROR_FORMAT_CHANGED_TWICE, ERROR_MUXER_NOT_STARTED, ERROR_NO_CODEC, EncoderListener,
    PtsClock, TrackEncoder, TrackHandle,
};
pub use muxer::{ContainerSink, EncodedSample, GstContainerSink, Muxer, TrackFormat, TrackKind};
pub use video::{FRAME_RATE, KEYFRAME_INTERVAL, VideoTrack, calc_bitrate};

use crate::config::RecordSettings;
use crate::errors::RecordingError;
use crate::sync::ReadyLatch;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Container/codec preparation failed
pub const ERROR_PREPARE_FAILED: i32 = -4;

/// Everything a recording session needs up front
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub enable_audio: bool,
    pub enable_hd: bool,
}

impl RecorderSettings {
    pub fn from_config(output_path: PathBuf, record: &RecordSettings) -> Self {
        Self {
            output_path,
            width: record.width,
            height: record.height,
            enable_audio: record.enable_audio,
            enable_hd: record.bitrate_preset.multiplier() > 1,
        }
    }
}

/// Session lifecycle callbacks, fired from the recorder's threads.
pub trait RecordListener: Send + Sync {
    fn on_prepared(&self) {}
    fn on_started(&self) {}
    fn on_stopped(&self) {}
    fn on_released(&self) {}
    fn on_error(&self, _code: i32) {}
}

/// Builds the session's codec and container objects. Swappable so tests
/// can drive the pipeline with scripted codecs and an in-memory container.
pub trait EncoderFactory: Send {
    fn container(&self, path: &Path) -> Result<Box<dyn ContainerSink>, RecordingError>;
    fn video_session(
        &self,
        settings: &VideoEncodeSettings,
    ) -> Result<Arc<dyn CodecSession>, RecordingError>;
    fn audio_session(&self) -> Result<Arc<dyn CodecSession>, RecordingError>;
}

/// Production factory: GStreamer encoders and MP4 container.
pub struct GstEncoderFactory;

impl EncoderFactory for GstEncoderFactory {
    fn container(&self, path: &Path) -> Result<Box<dyn ContainerSink>, RecordingError> {
        Ok(Box::new(GstContainerSink::create(path)?))
    }

    fn video_session(
        &self,
        settings: &VideoEncodeSettings,
    ) -> Result<Arc<dyn CodecSession>, RecordingError> {
        Ok(Arc::new(GstVideoSession::new(settings)?))
    }

    fn audio_session(&self) -> Result<Arc<dyn CodecSession>, RecordingError> {
        Ok(Arc::new(GstAudioSession::new(&AudioEncodeSettings::default())?))
    }
}

enum RecorderCommand {
    Prepare {
        settings: RecorderSettings,
        listener: Arc<dyn RecordListener>,
    },
    Start,
    SubmitFrame(Vec<u8>),
    FrameAvailable,
    Stop,
    Pause,
    Resume,
    Quit,
}

/// Handle to the recorder worker thread.
pub struct Recorder {
    sender: Sender<RecorderCommand>,
    ready: Arc<ReadyLatch>,
    join: Option<JoinHandle<()>>,
}

impl Recorder {
    /// Spawn with the production GStreamer factory.
    pub fn spawn() -> Self {
        Self::spawn_with_factory(Box::new(GstEncoderFactory))
    }

    pub fn spawn_with_factory(factory: Box<dyn EncoderFactory>) -> Self {
        let (sender, receiver) = unbounded();
        let ready = Arc::new(ReadyLatch::new());
        let ready_clone = Arc::clone(&ready);

        let join = std::thread::Builder::new()
            .name("recorder".into())
            .spawn(move || {
                let mut worker = RecorderWorker::new(factory);
                ready_clone.set_ready();
                worker.run(receiver);
            })
            .expect("failed to spawn recorder thread");

        Self {
            sender,
            ready,
            join: Some(join),
        }
    }

    /// Block until the worker's message loop is live.
    pub fn wait_until_ready(&self) {
        self.ready.wait();
    }

    /// Configure the session and create both encoder tracks. Failures are
    /// reported through `listener.on_error`.
    pub fn prepare(&self, settings: RecorderSettings, listener: Arc<dyn RecordListener>) {
        self.send(RecorderCommand::Prepare { settings, listener });
    }

    pub fn start_recording(&self) {
        self.send(RecorderCommand::Start);
    }

    pub fn stop_recording(&self) {
        self.send(RecorderCommand::Stop);
    }

    pub fn pause_recording(&self) {
        self.send(RecorderCommand::Pause);
    }

    pub fn resume_recording(&self) {
        self.send(RecorderCommand::Resume);
    }

    /// Submit one composited RGBA frame read back from the encoder
    /// surface.
    pub fn submit_frame(&self, frame: Vec<u8>) {
        self.send(RecorderCommand::SubmitFrame(frame));
    }

    /// Signal the video track that a frame was just submitted.
    pub fn frame_available(&self) {
        self.send(RecorderCommand::FrameAvailable);
    }

    /// Shut the worker down. Pending commands are discarded; an active
    /// session is stopped and flushed first.
    pub fn release(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.sender.send(RecorderCommand::Quit);
            if join.join().is_err() {
                warn!("recorder thread panicked during shutdown");
            }
        }
    }

    fn send(&self, command: RecorderCommand) {
        if self.sender.send(command).is_err() {
            warn!("recorder is gone, dropping command");
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.release();
    }
}

/// Forwards per-track encoder events to the session listener once every
/// configured track has reported.
struct TrackEventBridge {
    expected: usize,
    counts: Mutex<BridgeCounts>,
    listener: Arc<dyn RecordListener>,
}

#[derive(Default)]
struct BridgeCounts {
    prepared: usize,
    stopped: usize,
    released: usize,
}

impl TrackEventBridge {
    fn new(expected: usize, listener: Arc<dyn RecordListener>) -> Self {
        Self {
            expected,
            counts: Mutex::new(BridgeCounts::default()),
            listener,
        }
    }
}

impl EncoderListener for TrackEventBridge {
    fn on_prepared(&self, _kind: TrackKind) {
        let mut counts = self.counts.lock().unwrap();
        counts.prepared += 1;
        if counts.prepared == self.expected {
            self.listener.on_prepared();
        }
    }

    fn on_stopped(&self, _kind: TrackKind) {
        let mut counts = self.counts.lock().unwrap();
        counts.stopped += 1;
        if counts.stopped == self.expected {
            self.listener.on_stopped();
        }
    }

    fn on_released(&self, _kind: TrackKind) {
        let mut counts = self.counts.lock().unwrap();
        counts.released += 1;
        if counts.released == self.expected {
            self.listener.on_released();
        }
    }

    fn on_error(&self, kind: TrackKind, code: i32) {
        error!(%kind, code, "encoder track error");
        self.listener.on_error(code);
    }
}

/// The recorder actor. Lives on the worker thread.
struct RecorderWorker {
    factory: Box<dyn EncoderFactory>,
    muxer: Option<Arc<Muxer>>,
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
    listener: Option<Arc<dyn RecordListener>>,
    recording: bool,
}

impl RecorderWorker {
    fn new(factory: Box<dyn EncoderFactory>) -> Self {
        Self {
            factory,
            muxer: None,
            video: None,
            audio: None,
            listener: None,
            recording: false,
        }
    }

    fn run(&mut self, receiver: Receiver<RecorderCommand>) {
        debug!("recorder loop started");
        while let Ok(command) = receiver.recv() {
            match command {
                RecorderCommand::Prepare { settings, listener } => {
                    self.prepare(settings, listener)
                }
                RecorderCommand::Start => self.start(),
                RecorderCommand::SubmitFrame(frame) => self.submit_frame(frame),
                RecorderCommand::FrameAvailable => self.frame_available(),
                RecorderCommand::Stop => self.stop(),
                RecorderCommand::Pause => self.pause(true),
                RecorderCommand::Resume => self.pause(false),
                // Quit short-circuits: anything still queued is discarded.
                RecorderCommand::Quit => break,
            }
        }
        self.stop();
        debug!("recorder loop exiting");
    }

    fn prepare(&mut self, settings: RecorderSettings, listener: Arc<dyn RecordListener>) {
        if self.video.is_some() {
            warn!("recorder already prepared, ignoring");
            listener.on_error(ERROR_PREPARE_FAILED);
            return;
        }
        info!(
            path = %settings.output_path.display(),
            width = settings.width,
            height = settings.height,
            audio = settings.enable_audio,
            hd = settings.enable_hd,
            "preparing recorder"
        );

        let expected_tracks = if settings.enable_audio { 2 } else { 1 };
        let bridge: Arc<dyn EncoderListener> = Arc::new(TrackEventBridge::new(
            expected_tracks,
            Arc::clone(&listener),
        ));

        let sink = match self.factory.container(&settings.output_path) {
            Ok(sink) => sink,
            Err(err) => {
                error!(error = %err, "container creation failed");
                listener.on_error(ERROR_PREPARE_FAILED);
                return;
            }
        };
        let muxer = Arc::new(Muxer::new(sink, expected_tracks));

        let video_settings = VideoEncodeSettings {
            width: settings.width,
            height: settings.height,
            frame_rate: FRAME_RATE,
            bitrate_bps: calc_bitrate(settings.width, settings.height, settings.enable_hd),
            keyframe_interval: KEYFRAME_INTERVAL,
        };
        let video_session = match self.factory.video_session(&video_settings) {
            Ok(session) => session,
            Err(err) => {
                error!(error = %err, "no video codec available");
                listener.on_error(ERROR_NO_CODEC);
                return;
            }
        };
        let video = VideoTrack::new(video_session, Arc::clone(&muxer), Arc::clone(&bridge));

        let audio = if settings.enable_audio {
            match self.factory.audio_session() {
                Ok(session) => Some(AudioTrack::new(
                    session,
                    Arc::clone(&muxer),
                    Arc::clone(&bridge),
                )),
                Err(err) => {
                    error!(error = %err, "no audio codec available");
                    listener.on_error(ERROR_NO_CODEC);
                    // tear the video track down again; its drain thread
                    // never started capturing
                    drop(video);
                    return;
                }
            }
        } else {
            None
        };

        self.muxer = Some(muxer);
        self.video = Some(video);
        self.audio = audio;
        self.listener = Some(listener);
    }

    fn start(&mut self) {
        let Some(video) = self.video.as_ref() else {
            warn!("start requested before prepare");
            return;
        };
        video.start_recording();
        if let Some(audio) = self.audio.as_mut() {
            audio.start_recording();
        }
        self.recording = true;
        if let Some(listener) = &self.listener {
            listener.on_started();
        }
        info!("recording started");
    }

    fn submit_frame(&mut self, frame: Vec<u8>) {
        if !self.recording {
            return;
        }
        if let Some(video) = self.video.as_ref() {
            video.submit_frame(&frame);
        }
    }

    fn frame_available(&mut self) {
        if !self.recording {
            return;
        }
        if let Some(video) = self.video.as_ref() {
            video.frame_available_soon();
        }
    }

    fn stop(&mut self) {
        if self.video.is_none() {
            return;
        }
        info!("stopping recording");
        if let Some(video) = self.video.as_ref() {
            video.stop_recording();
        }
        if let Some(audio) = self.audio.as_ref() {
            audio.stop_recording();
        }
        self.recording = false;

        // Wait for both drain threads to flush and release; the muxer
        // finalizes when the last one stops.
        if let Some(mut video) = self.video.take() {
            video.join();
        }
        if let Some(mut audio) = self.audio.take() {
            audio.join();
        }
        self.muxer = None;
        self.listener = None;
    }

    fn pause(&mut self, paused: bool) {
        if !self.recording {
            return;
        }
        debug!(paused, "recording pause state");
        if let Some(video) = self.video.as_ref() {
            video.pause_recording(paused);
        }
        if let Some(audio) = self.audio.as_ref() {
            audio.pause_recording(paused);
        }
    }
}
