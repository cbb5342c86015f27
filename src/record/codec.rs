// SPDX-License-Identifier: MPL-2.0

//! Codec sessions: poll-driven encoder handles.
//!
//! A [`CodecSession`] mirrors the shape of a hardware codec: callers queue
//! raw input on one side and poll encoded output with a bounded timeout on
//! the other. The first successful poll reports the negotiated output
//! format; encoded buffers follow; end-of-stream arrives after the final
//! flush. Production sessions wrap GStreamer encoder pipelines selected
//! hardware-first.

use super::muxer::{EncodedSample, TrackFormat, TrackKind};
use crate::errors::RecordingError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSrc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of polling a codec's output queue
#[derive(Debug)]
pub enum CodecOutput {
    /// Nothing available within the timeout
    TryAgain,
    /// Output format negotiated; reported at most once, before any buffer
    FormatChanged(TrackFormat),
    /// One encoded buffer
    Buffer(EncodedSample),
    /// The end-of-stream marker has drained through the codec
    EndOfStream,
}

/// An encoder with independent input and output ends. Implementations are
/// internally synchronized: input may be queued from a different thread
/// than the one draining output.
pub trait CodecSession: Send + Sync {
    /// Queue one raw input buffer with its capture timestamp.
    fn queue_input(&self, data: &[u8], pts_us: u64) -> Result<(), RecordingError>;

    /// Tell the codec no further input will arrive. The pending output,
    /// then `EndOfStream`, still drain normally.
    fn signal_end_of_stream(&self);

    /// Poll for encoded output, waiting at most `timeout`.
    fn dequeue_output(&self, timeout: Duration) -> CodecOutput;

    /// Stop and discard the codec. Idempotent.
    fn release(&self);
}

/// H.264 encoder elements in priority order, hardware first.
const H264_ENCODERS: &[(&str, bool)] = &[
    ("vah264enc", true),
    ("vaapih264enc", true),
    ("nvh264enc", true),
    ("qsvh264enc", true),
    ("amfh264enc", true),
    ("v4l2h264enc", true),
    ("x264enc", false),
    ("openh264enc", false),
];

/// AAC encoder elements in priority order.
const AAC_ENCODERS: &[&str] = &["fdkaacenc", "avenc_aac", "voaacenc"];

/// Video encode parameters
#[derive(Debug, Clone, Copy)]
pub struct VideoEncodeSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate_bps: u32,
    /// Keyframe interval in seconds
    pub keyframe_interval: u32,
}

/// Audio encode parameters; fixed to the container's AAC profile.
#[derive(Debug, Clone, Copy)]
pub struct AudioEncodeSettings {
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate_bps: u32,
}

impl Default for AudioEncodeSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            bitrate_bps: 96_000,
        }
    }
}

/// Availability of one known encoder element
#[derive(Debug, Clone)]
pub struct EncoderProbe {
    pub element: &'static str,
    pub kind: TrackKind,
    pub hardware: bool,
    pub available: bool,
}

/// Probe every known encoder element for availability.
pub fn probe_encoders() -> Result<Vec<EncoderProbe>, RecordingError> {
    gst::init().map_err(|e| RecordingError::StartFailed(e.to_string()))?;
    let mut probes = Vec::new();
    for &(element, hardware) in H264_ENCODERS {
        probes.push(EncoderProbe {
            element,
            kind: TrackKind::Video,
            hardware,
            available: gst::ElementFactory::find(element).is_some(),
        });
    }
    for &element in AAC_ENCODERS {
        probes.push(EncoderProbe {
            element,
            kind: TrackKind::Audio,
            hardware: false,
            available: gst::ElementFactory::find(element).is_some(),
        });
    }
    Ok(probes)
}

/// Pick the first H.264 encoder element available on this machine.
fn select_h264_encoder() -> Result<(gst::Element, &'static str), RecordingError> {
    for &(name, hardware) in H264_ENCODERS {
        if let Ok(encoder) = gst::ElementFactory::make(name).build() {
            info!(encoder = name, hardware, "selected video encoder");
            return Ok((encoder, name));
        }
    }
    Err(RecordingError::EncoderNotAvailable(
        "no H.264 encoder element available".into(),
    ))
}

/// Apply per-element bitrate and latency settings.
fn configure_h264_encoder(encoder: &gst::Element, name: &str, settings: &VideoEncodeSettings) {
    let bitrate_kbps = settings.bitrate_bps / 1000;
    match name {
        "x264enc" => {
            let _ = encoder.set_property_from_str("speed-preset", "veryfast");
            let _ = encoder.set_property_from_str("tune", "zerolatency");
            encoder.set_property("bitrate", bitrate_kbps);
            encoder.set_property(
                "key-int-max",
                settings.frame_rate * settings.keyframe_interval,
            );
        }
        "vah264enc" | "vaapih264enc" => {
            let _ = encoder.set_property_from_str("rate-control", "cbr");
            encoder.set_property("bitrate", bitrate_kbps);
        }
        "nvh264enc" => {
            encoder.set_property("bitrate", bitrate_kbps);
            let _ = encoder.set_property_from_str("rc-mode", "vbr");
        }
        "openh264enc" => {
            let _ = encoder.set_property_from_str("rate-control", "bitrate");
            encoder.set_property("bitrate", settings.bitrate_bps);
            let _ = encoder.set_property_from_str("usage-type", "camera");
        }
        "qsvh264enc" | "amfh264enc" => {
            encoder.set_property("bitrate", bitrate_kbps);
        }
        _ => {
            debug!(encoder = name, "using default encoder configuration");
        }
    }
}

/// Shared output end of a GStreamer-backed session.
struct SessionOutput {
    appsink: AppSink,
    kind: TrackKind,
    /// Buffer pulled together with the format notification, handed out on
    /// the next poll
    stashed: Mutex<VecDeque<EncodedSample>>,
    format_reported: Mutex<bool>,
}

impl SessionOutput {
    fn sample_from(buffer: &gst::BufferRef) -> Option<EncodedSample> {
        let map = buffer.map_readable().ok()?;
        Some(EncodedSample {
            data: map.as_slice().to_vec(),
            pts_us: buffer.pts().map(|t| t.useconds()).unwrap_or(0),
            keyframe: !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT),
        })
    }

    fn dequeue(&self, timeout: Duration) -> CodecOutput {
        if let Some(sample) = self.stashed.lock().unwrap().pop_front() {
            return CodecOutput::Buffer(sample);
        }

        let timeout = gst::ClockTime::from_useconds(timeout.as_micros() as u64);
        match self.appsink.try_pull_sample(timeout) {
            Some(sample) => {
                let Some(buffer) = sample.buffer() else {
                    return CodecOutput::TryAgain;
                };
                let Some(encoded) = Self::sample_from(buffer) else {
                    return CodecOutput::TryAgain;
                };

                let mut reported = self.format_reported.lock().unwrap();
                if !*reported {
                    *reported = true;
                    let caps = sample
                        .caps()
                        .map(|c| c.to_string())
                        .unwrap_or_default();
                    self.stashed.lock().unwrap().push_back(encoded);
                    return CodecOutput::FormatChanged(TrackFormat {
                        kind: self.kind,
                        caps,
                    });
                }
                CodecOutput::Buffer(encoded)
            }
            None => {
                if self.appsink.is_eos() {
                    CodecOutput::EndOfStream
                } else {
                    CodecOutput::TryAgain
                }
            }
        }
    }
}

/// GStreamer H.264 encode session: `appsrc ! videoconvert ! <encoder> !
/// h264parse ! appsink`, fed RGBA frames read back from the encoder's
/// input surface.
pub struct GstVideoSession {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    output: SessionOutput,
    frame_bytes: usize,
}

impl GstVideoSession {
    pub fn new(settings: &VideoEncodeSettings) -> Result<Self, RecordingError> {
        gst::init().map_err(|e| RecordingError::StartFailed(e.to_string()))?;

        let (encoder, encoder_name) = select_h264_encoder()?;
        configure_h264_encoder(&encoder, encoder_name, settings);

        let pipeline = gst::Pipeline::new();

        let appsrc = gst::ElementFactory::make("appsrc")
            .build()
            .map_err(|e| RecordingError::StartFailed(format!("appsrc: {}", e)))?
            .dynamic_cast::<AppSrc>()
            .map_err(|_| RecordingError::StartFailed("appsrc cast failed".into()))?;
        let input_caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGBA")
            .field("width", settings.width as i32)
            .field("height", settings.height as i32)
            .field("framerate", gst::Fraction::new(settings.frame_rate as i32, 1))
            .build();
        appsrc.set_caps(Some(&input_caps));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_property("is-live", true);
        appsrc.set_property("block", false);

        let convert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| RecordingError::StartFailed(format!("videoconvert: {}", e)))?;
        let parse = gst::ElementFactory::make("h264parse")
            .build()
            .map_err(|e| RecordingError::StartFailed(format!("h264parse: {}", e)))?;

        let out_caps = gst::Caps::builder("video/x-h264")
            .field("stream-format", "avc")
            .field("alignment", "au")
            .build();
        let appsink = gst::ElementFactory::make("appsink")
            .build()
            .map_err(|e| RecordingError::StartFailed(format!("appsink: {}", e)))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| RecordingError::StartFailed("appsink cast failed".into()))?;
        appsink.set_caps(Some(&out_caps));
        appsink.set_property("sync", false);

        pipeline
            .add_many([
                appsrc.upcast_ref::<gst::Element>(),
                &convert,
                &encoder,
                &parse,
                appsink.upcast_ref::<gst::Element>(),
            ])
            .map_err(|e| RecordingError::StartFailed(e.to_string()))?;
        gst::Element::link_many([
            appsrc.upcast_ref::<gst::Element>(),
            &convert,
            &encoder,
            &parse,
            appsink.upcast_ref::<gst::Element>(),
        ])
        .map_err(|e| RecordingError::StartFailed(e.to_string()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| RecordingError::StartFailed(e.to_string()))?;

        Ok(Self {
            pipeline,
            appsrc,
            output: SessionOutput {
                appsink,
                kind: TrackKind::Video,
                stashed: Mutex::new(VecDeque::new()),
                format_reported: Mutex::new(false),
            },
            frame_bytes: (settings.width * settings.height * 4) as usize,
        })
    }
}

impl CodecSession for GstVideoSession {
    fn queue_input(&self, data: &[u8], pts_us: u64) -> Result<(), RecordingError> {
        if data.len() != self.frame_bytes {
            return Err(RecordingError::PipelineError(format!(
                "frame size mismatch: got {} bytes, expected {}",
                data.len(),
                self.frame_bytes
            )));
        }
        let mut buffer = gst::Buffer::from_slice(data.to_vec());
        {
            let buffer = buffer.get_mut().expect("freshly created buffer is unique");
            buffer.set_pts(gst::ClockTime::from_useconds(pts_us));
        }
        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| RecordingError::PipelineError(format!("push failed: {}", e)))
    }

    fn signal_end_of_stream(&self) {
        debug!("sending EOS to video encoder");
        let _ = self.appsrc.end_of_stream();
    }

    fn dequeue_output(&self, timeout: Duration) -> CodecOutput {
        self.output.dequeue(timeout)
    }

    fn release(&self) {
        if let Err(err) = self.pipeline.set_state(gst::State::Null) {
            warn!(error = %err, "failed to stop video encode pipeline");
        }
    }
}

/// GStreamer AAC encode session: `appsrc ! audioconvert ! <encoder> !
/// aacparse ! appsink`, fed fixed-size S16LE frames from the capture
/// thread.
pub struct GstAudioSession {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    output: SessionOutput,
}

impl GstAudioSession {
    pub fn new(settings: &AudioEncodeSettings) -> Result<Self, RecordingError> {
        gst::init().map_err(|e| RecordingError::StartFailed(e.to_string()))?;

        let encoder = AAC_ENCODERS
            .iter()
            .find_map(|name| {
                gst::ElementFactory::make(name)
                    .build()
                    .ok()
                    .inspect(|_| info!(encoder = name, "selected audio encoder"))
            })
            .ok_or_else(|| {
                RecordingError::EncoderNotAvailable("no AAC encoder element available".into())
            })?;
        if encoder.has_property("bitrate") {
            encoder.set_property("bitrate", settings.bitrate_bps as i32);
        }

        let pipeline = gst::Pipeline::new();

        let appsrc = gst::ElementFactory::make("appsrc")
            .build()
            .map_err(|e| RecordingError::StartFailed(format!("appsrc: {}", e)))?
            .dynamic_cast::<AppSrc>()
            .map_err(|_| RecordingError::StartFailed("appsrc cast failed".into()))?;
        let input_caps = gst::Caps::builder("audio/x-raw")
            .field("format", "S16LE")
            .field("rate", settings.sample_rate as i32)
            .field("channels", settings.channels as i32)
            .field("layout", "interleaved")
            .build();
        appsrc.set_caps(Some(&input_caps));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_property("is-live", true);

        let convert = gst::ElementFactory::make("audioconvert")
            .build()
            .map_err(|e| RecordingError::StartFailed(format!("audioconvert: {}", e)))?;
        let parse = gst::ElementFactory::make("aacparse")
            .build()
            .map_err(|e| RecordingError::StartFailed(format!("aacparse: {}", e)))?;

        let appsink = gst::ElementFactory::make("appsink")
            .build()
            .map_err(|e| RecordingError::StartFailed(format!("appsink: {}", e)))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| RecordingError::StartFailed("appsink cast failed".into()))?;
        appsink.set_property("sync", false);

        pipeline
            .add_many([
                appsrc.upcast_ref::<gst::Element>(),
                &convert,
                &encoder,
                &parse,
                appsink.upcast_ref::<gst::Element>(),
            ])
            .map_err(|e| RecordingError::StartFailed(e.to_string()))?;
        gst::Element::link_many([
            appsrc.upcast_ref::<gst::Element>(),
            &convert,
            &encoder,
            &parse,
            appsink.upcast_ref::<gst::Element>(),
        ])
        .map_err(|e| RecordingError::StartFailed(e.to_string()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| RecordingError::StartFailed(e.to_string()))?;

        Ok(Self {
            pipeline,
            appsrc,
            output: SessionOutput {
                appsink,
                kind: TrackKind::Audio,
                stashed: Mutex::new(VecDeque::new()),
                format_reported: Mutex::new(false),
            },
        })
    }
}

impl CodecSession for GstAudioSession {
    fn queue_input(&self, data: &[u8], pts_us: u64) -> Result<(), RecordingError> {
        let mut buffer = gst::Buffer::from_slice(data.to_vec());
        {
            let buffer = buffer.get_mut().expect("freshly created buffer is unique");
            buffer.set_pts(gst::ClockTime::from_useconds(pts_us));
        }
        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| RecordingError::PipelineError(format!("push failed: {}", e)))
    }

    fn signal_end_of_stream(&self) {
        debug!("sending EOS to audio encoder");
        let _ = self.appsrc.end_of_stream();
    }

    fn dequeue_output(&self, timeout: Duration) -> CodecOutput {
        self.output.dequeue(timeout)
    }

    fn release(&self) {
        if let Err(err) = self.pipeline.set_state(gst::State::Null) {
            warn!(error = %err, "failed to stop audio encode pipeline");
        }
    }
}
