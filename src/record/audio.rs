// SPDX-License-Identifier: MPL-2.0

//! Audio track: microphone capture feeding an AAC encoder.
//!
//! Starting the track spawns a dedicated capture thread that blocks on
//! device reads, slices the stream into fixed-size frames, and queues them
//! into the codec session, signalling the drain loop per frame.

use super::codec::CodecSession;
use super::encoder::{EncoderListener, TrackEncoder, TrackHandle};
use super::muxer::{Muxer, TrackKind};
use crate::errors::RecordingError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Samples per channel in one capture frame
const SAMPLES_PER_FRAME: usize = 1024;
/// Capture frame size in bytes: stereo, 16-bit
const FRAME_BYTES: usize = SAMPLES_PER_FRAME * 2 * 2;

/// The audio encoder track.
pub struct AudioTrack {
    encoder: TrackEncoder,
    handle: TrackHandle,
    capture: Option<JoinHandle<()>>,
}

impl AudioTrack {
    /// Wrap an existing codec session (used by tests and custom factories).
    pub fn new(
        session: Arc<dyn CodecSession>,
        muxer: Arc<Muxer>,
        listener: Arc<dyn EncoderListener>,
    ) -> Self {
        let encoder = TrackEncoder::spawn(TrackKind::Audio, session, muxer, Arc::clone(&listener));
        let handle = encoder.handle();
        listener.on_prepared(TrackKind::Audio);
        Self {
            encoder,
            handle,
            capture: None,
        }
    }

    pub fn handle(&self) -> TrackHandle {
        self.handle.clone()
    }

    /// Begin capturing: marks the track live and spawns the microphone
    /// thread. The thread exits on its own once a stop is requested.
    pub fn start_recording(&mut self) {
        self.encoder.start_recording();
        if self.capture.is_some() {
            return;
        }
        let handle = self.handle.clone();
        let join = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || capture_loop(handle))
            .expect("failed to spawn audio capture thread");
        self.capture = Some(join);
    }

    pub fn stop_recording(&self) {
        self.encoder.stop_recording();
    }

    pub fn pause_recording(&self, paused: bool) {
        self.encoder.pause_recording(paused);
    }

    /// Wait for the capture and drain threads to finish.
    pub fn join(&mut self) {
        if let Some(capture) = self.capture.take() {
            if capture.join().is_err() {
                warn!("audio capture thread panicked");
            }
        }
        self.encoder.join();
    }
}

/// Microphone capture loop: blocking reads, fixed-size frames into the
/// codec, one availability signal per frame.
fn capture_loop(track: TrackHandle) {
    let mut capture = match AudioCapture::open() {
        Ok(capture) => capture,
        Err(err) => {
            warn!(error = %err, "audio capture unavailable");
            return;
        }
    };
    info!("audio capture started");

    while track.is_active() {
        match capture.read_frame() {
            Some(frame) => {
                let pts = track.pts_now_us();
                if let Err(err) = track.session().queue_input(&frame, pts) {
                    warn!(error = %err, "audio frame rejected");
                    break;
                }
                track.frame_available_soon();
            }
            None => continue,
        }
    }
    // one final signal so the drain loop flushes what the codec holds
    track.frame_available_soon();

    capture.close();
    debug!("audio capture finished");
}

/// Microphone source producing fixed-size S16LE stereo frames at 44.1 kHz.
struct AudioCapture {
    pipeline: gst::Pipeline,
    appsink: AppSink,
    pending: Vec<u8>,
}

impl AudioCapture {
    fn open() -> Result<Self, RecordingError> {
        gst::init().map_err(|e| RecordingError::StartFailed(e.to_string()))?;

        let source = gst::ElementFactory::make("pipewiresrc")
            .build()
            .or_else(|_| gst::ElementFactory::make("autoaudiosrc").build())
            .map_err(|e| RecordingError::StartFailed(format!("audio source: {}", e)))?;

        let convert = gst::ElementFactory::make("audioconvert")
            .build()
            .map_err(|e| RecordingError::StartFailed(format!("audioconvert: {}", e)))?;
        let resample = gst::ElementFactory::make("audioresample")
            .build()
            .map_err(|e| RecordingError::StartFailed(format!("audioresample: {}", e)))?;

        let caps = gst::Caps::builder("audio/x-raw")
            .field("format", "S16LE")
            .field("rate", 44_100i32)
            .field("channels", 2i32)
            .field("layout", "interleaved")
            .build();
        let capsfilter = gst::ElementFactory::make("capsfilter")
            .property("caps", &caps)
            .build()
            .map_err(|e| RecordingError::StartFailed(format!("capsfilter: {}", e)))?;

        let appsink = gst::ElementFactory::make("appsink")
            .build()
            .map_err(|e| RecordingError::StartFailed(format!("appsink: {}", e)))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| RecordingError::StartFailed("appsink cast failed".into()))?;
        appsink.set_property("sync", false);

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many([&source, &convert, &resample, &capsfilter, appsink.upcast_ref()])
            .map_err(|e| RecordingError::StartFailed(e.to_string()))?;
        gst::Element::link_many([&source, &convert, &resample, &capsfilter, appsink.upcast_ref()])
            .map_err(|e| RecordingError::StartFailed(e.to_string()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| RecordingError::StartFailed(e.to_string()))?;

        Ok(Self {
            pipeline,
            appsink,
            pending: Vec::with_capacity(FRAME_BYTES * 2),
        })
    }

    /// Read until one full frame is buffered. Returns `None` on a read
    /// timeout so the caller can re-check for stop requests.
    fn read_frame(&mut self) -> Option<Vec<u8>> {
        while self.pending.len() < FRAME_BYTES {
            let sample = self
                .appsink
                .try_pull_sample(gst::ClockTime::from_mseconds(100))?;
            let buffer = sample.buffer()?;
            let map = buffer.map_readable().ok()?;
            self.pending.extend_from_slice(map.as_slice());
        }
        let frame = self.pending.drain(..FRAME_BYTES).collect();
        Some(frame)
    }

    fn close(self) {
        if let Err(err) = self.pipeline.set_state(gst::State::Null) {
            warn!(error = %err, "failed to stop audio capture pipeline");
        }
    }
}
