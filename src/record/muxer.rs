// SPDX-License-Identifier: MPL-2.0

//! Track multiplexing with a two-party startup rendezvous.
//!
//! The container must not start until every configured track has reported
//! its output format, and must be finalized exactly once after every track
//! has stopped. [`Muxer`] counts started tracks under one lock; whichever
//! track registers last performs the actual container start and wakes the
//! sibling's blocked drain loop. Arrival order is irrelevant.

use crate::errors::RecordingError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which stream a track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// Negotiated output format of an encoder track, reported once before any
/// encoded data.
#[derive(Debug, Clone)]
pub struct TrackFormat {
    pub kind: TrackKind,
    /// Serialized caps describing the encoded stream
    pub caps: String,
}

/// One encoded buffer ready for the container
#[derive(Debug, Clone)]
pub struct EncodedSample {
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds
    pub pts_us: u64,
    pub keyframe: bool,
}

/// Container backend written to by the muxer once started.
pub trait ContainerSink: Send {
    /// Register a track; returns its index. Only legal before `start`.
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, RecordingError>;

    /// Begin writing the container.
    fn start(&mut self) -> Result<(), RecordingError>;

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<(), RecordingError>;

    /// Flush and close the container. Called exactly once.
    fn finalize(&mut self) -> Result<(), RecordingError>;
}

struct MuxerState {
    sink: Box<dyn ContainerSink>,
    started_count: isize,
    is_started: bool,
    finalized: bool,
}

/// Serialized container access shared by the encoder drain threads.
pub struct Muxer {
    expected_tracks: usize,
    state: Mutex<MuxerState>,
    started_cond: Condvar,
}

impl Muxer {
    /// `expected_tracks` is 1 for video only, 2 with audio enabled.
    pub fn new(sink: Box<dyn ContainerSink>, expected_tracks: usize) -> Self {
        Self {
            expected_tracks,
            state: Mutex::new(MuxerState {
                sink,
                started_count: 0,
                is_started: false,
                finalized: false,
            }),
            started_cond: Condvar::new(),
        }
    }

    pub fn expected_tracks(&self) -> usize {
        self.expected_tracks
    }

    /// Register a track's output format. Fatal protocol error once started.
    pub fn add_track(&self, format: &TrackFormat) -> Result<usize, RecordingError> {
        let mut state = self.state.lock().unwrap();
        if state.is_started {
            return Err(RecordingError::MuxerProtocol(
                "track added after muxer start".into(),
            ));
        }
        let index = state.sink.add_track(format)?;
        debug!(kind = %format.kind, index, "muxer track registered");
        Ok(index)
    }

    /// One track requesting start. The container starts exactly once, when
    /// the started count reaches the configured track count; the caller
    /// that completes the rendezvous wakes every waiting sibling.
    ///
    /// Returns whether the container is running afterwards.
    pub fn start(&self) -> Result<bool, RecordingError> {
        let mut state = self.state.lock().unwrap();
        state.started_count += 1;
        debug!(count = state.started_count, expected = self.expected_tracks, "muxer start");
        if !state.is_started && state.started_count as usize == self.expected_tracks {
            state.sink.start()?;
            state.is_started = true;
            self.started_cond.notify_all();
            info!("container started");
        }
        Ok(state.is_started)
    }

    /// Block until the sibling track completes the start rendezvous.
    pub fn wait_until_started(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.is_started {
            let (guard, _timeout) = self
                .started_cond
                .wait_timeout(state, Duration::from_millis(100))
                .unwrap();
            state = guard;
        }
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().unwrap().is_started
    }

    /// One track stopping. The container is finalized exactly once, when
    /// the started count returns to zero; later writes are dropped.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.started_count -= 1;
        debug!(count = state.started_count, "muxer stop");
        if state.started_count <= 0 && state.is_started && !state.finalized {
            if let Err(err) = state.sink.finalize() {
                warn!(error = %err, "container finalize failed");
            }
            state.finalized = true;
            state.is_started = false;
            info!("container finalized");
        }
    }

    /// Write one encoded sample. Writes are serialized with the start/stop
    /// transitions by the muxer lock and dropped unless the container is
    /// running.
    pub fn write_sample(&self, track: usize, sample: &EncodedSample) {
        let mut state = self.state.lock().unwrap();
        if state.started_count > 0 && state.is_started {
            if let Err(err) = state.sink.write_sample(track, sample) {
                warn!(track, error = %err, "sample write failed");
            }
        } else {
            debug!(track, "dropping sample outside started window");
        }
    }
}

/// MP4 container sink backed by a GStreamer `mp4mux` pipeline. Each track
/// is an appsrc feeding the muxer; finalize sends EOS on every track and
/// waits for the pipeline to settle.
pub struct GstContainerSink {
    pipeline: gst::Pipeline,
    mux: gst::Element,
    appsrcs: Vec<AppSrc>,
}

impl GstContainerSink {
    pub fn create(path: &Path) -> Result<Self, RecordingError> {
        gst::init().map_err(|e| RecordingError::StartFailed(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RecordingError::StartFailed(e.to_string()))?;
        }

        let pipeline = gst::Pipeline::new();
        let mux = gst::ElementFactory::make("mp4mux")
            .build()
            .map_err(|e| RecordingError::StartFailed(format!("mp4mux: {}", e)))?;
        // Non-streamable output keeps the index seekable.
        if mux.has_property("streamable") {
            mux.set_property("streamable", false);
        }

        let location = path
            .to_str()
            .ok_or_else(|| RecordingError::StartFailed("non-UTF8 output path".into()))?;
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", location)
            .build()
            .map_err(|e| RecordingError::StartFailed(format!("filesink: {}", e)))?;

        pipeline
            .add_many([&mux, &filesink])
            .map_err(|e| RecordingError::StartFailed(e.to_string()))?;
        mux.link(&filesink)
            .map_err(|_| RecordingError::StartFailed("failed to link muxer to filesink".into()))?;

        info!(path = %path.display(), "container sink created");

        Ok(Self {
            pipeline,
            mux,
            appsrcs: Vec::new(),
        })
    }
}

impl ContainerSink for GstContainerSink {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, RecordingError> {
        let caps = gst::Caps::from_str(&format.caps)
            .map_err(|e| RecordingError::MuxerProtocol(format!("bad track caps: {}", e)))?;

        let appsrc = gst::ElementFactory::make("appsrc")
            .build()
            .map_err(|e| RecordingError::StartFailed(format!("appsrc: {}", e)))?
            .dynamic_cast::<AppSrc>()
            .map_err(|_| RecordingError::StartFailed("appsrc cast failed".into()))?;
        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_property("block", false);

        self.pipeline
            .add(appsrc.upcast_ref::<gst::Element>())
            .map_err(|e| RecordingError::StartFailed(e.to_string()))?;
        appsrc
            .link(&self.mux)
            .map_err(|_| RecordingError::StartFailed("failed to link track to muxer".into()))?;

        self.appsrcs.push(appsrc);
        Ok(self.appsrcs.len() - 1)
    }

    fn start(&mut self) -> Result<(), RecordingError> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| RecordingError::StartFailed(e.to_string()))?;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<(), RecordingError> {
        let appsrc = self
            .appsrcs
            .get(track)
            .ok_or_else(|| RecordingError::MuxerProtocol(format!("unknown track {}", track)))?;

        let mut buffer = gst::Buffer::from_slice(sample.data.clone());
        {
            let buffer = buffer.get_mut().expect("freshly created buffer is unique");
            buffer.set_pts(gst::ClockTime::from_useconds(sample.pts_us));
            buffer.set_dts(gst::ClockTime::from_useconds(sample.pts_us));
            if !sample.keyframe {
                buffer.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }
        appsrc
            .push_buffer(buffer)
            .map_err(|e| RecordingError::PipelineError(format!("push failed: {}", e)))?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), RecordingError> {
        for appsrc in &self.appsrcs {
            let _ = appsrc.end_of_stream();
        }

        // Let the muxer flush indexes before tearing the pipeline down.
        if let Some(bus) = self.pipeline.bus() {
            let _ = bus.timed_pop_filtered(
                gst::ClockTime::from_seconds(5),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            );
        }

        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| RecordingError::PipelineError(e.to_string()))?;
        Ok(())
    }
}

impl Drop for GstContainerSink {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
