// SPDX-License-Identifier: MPL-2.0

//! Camera device boundary and the GStreamer capture backend

use super::types::{
    CameraFrame, Facing, FocusRegion, Resolution, SessionSettings,
};
use crate::errors::CameraError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Callback invoked with each preview frame, from the capture thread.
pub type FrameSink = Box<dyn Fn(CameraFrame) + Send + Sync + 'static>;

/// One camera device, owned exclusively by the camera worker thread.
pub trait CameraDevice: Send {
    fn facing(&self) -> Facing;

    /// Device/module identifier used for quirk lookups
    fn model(&self) -> &str;

    fn supported_sizes(&self) -> Vec<Resolution>;

    /// Apply session parameters. Rebuilds the running preview if needed.
    fn configure(&mut self, settings: &SessionSettings) -> Result<(), CameraError>;

    fn start_preview(&mut self, sink: FrameSink) -> Result<(), CameraError>;

    fn stop_preview(&mut self);

    /// Parameter-style operations. Unsupported parameters return Err; the
    /// worker logs and keeps the previous state.
    fn set_focus(&mut self, region: FocusRegion) -> Result<(), CameraError>;
    fn set_zoom(&mut self, level: u32) -> Result<(), CameraError>;
    fn max_zoom(&self) -> u32;
    fn set_flash(&mut self, enabled: bool) -> Result<(), CameraError>;

    /// Grab the most recent preview frame for still capture.
    fn capture_still(&mut self) -> Result<CameraFrame, CameraError>;

    /// Stop the preview and release the device. Idempotent.
    fn release(&mut self);
}

/// Opens camera devices by facing. Shared by reference so a new worker can
/// be spawned after a surface teardown.
pub trait CameraBackend: Send + Sync {
    fn open(&self, facing: Facing) -> Result<Box<dyn CameraDevice>, CameraError>;
}

/// Pick the capture size for a requested aspect ratio (height / width).
///
/// Sizes whose ratio matches exactly are preferred, largest width first.
/// When nothing matches exactly, the nearest-ratio size wins (ties broken
/// toward the larger width) rather than failing on an empty candidate set.
pub fn select_capture_size(sizes: &[Resolution], target_ratio: f32) -> Option<Resolution> {
    let exact = sizes
        .iter()
        .filter(|size| size.ratio() == target_ratio)
        .max_by_key(|size| size.width);
    if let Some(best) = exact {
        return Some(*best);
    }

    sizes.iter().copied().min_by(|a, b| {
        let da = (a.ratio() - target_ratio).abs();
        let db = (b.ratio() - target_ratio).abs();
        da.partial_cmp(&db)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.width.cmp(&a.width))
    })
}

/// Per-model display-orientation overrides.
///
/// Some camera modules report orientations that disagree with the generic
/// rotation table; entries here take precedence over the lookup.
#[derive(Debug, Clone, Default)]
pub struct OrientationQuirks {
    entries: Vec<QuirkEntry>,
}

#[derive(Debug, Clone)]
struct QuirkEntry {
    model: String,
    facing: Facing,
    display_orientation: u32,
}

impl OrientationQuirks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an override for a device model and facing.
    pub fn with_override(mut self, model: &str, facing: Facing, display_orientation: u32) -> Self {
        self.entries.push(QuirkEntry {
            model: model.to_string(),
            facing,
            display_orientation,
        });
        self
    }

    /// Fixed orientation for this model/facing, if one is registered.
    pub fn lookup(&self, model: &str, facing: Facing) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.model == model && entry.facing == facing)
            .map(|entry| entry.display_orientation)
    }
}

/// Capture sizes advertised by the GStreamer backend. The pipeline scales,
/// so the ladder covers the common 4:3 and 16:9 resolutions.
const GST_SIZE_LADDER: &[Resolution] = &[
    Resolution { width: 640, height: 480 },
    Resolution { width: 800, height: 600 },
    Resolution { width: 1024, height: 768 },
    Resolution { width: 1280, height: 720 },
    Resolution { width: 1600, height: 1200 },
    Resolution { width: 1920, height: 1080 },
    Resolution { width: 2560, height: 1440 },
    Resolution { width: 3840, height: 2160 },
];

/// GStreamer-backed camera device capturing RGBA frames over PipeWire.
pub struct GstCameraDevice {
    facing: Facing,
    model: String,
    target: Option<String>,
    settings: Option<SessionSettings>,
    pipeline: Option<(gst::Pipeline, AppSink)>,
    sink: Option<Arc<FrameSink>>,
    last_frame: Arc<Mutex<Option<CameraFrame>>>,
}

impl GstCameraDevice {
    /// Create a device bound to a PipeWire target object (node serial or
    /// name); `None` uses the session default camera.
    pub fn new(facing: Facing, model: String, target: Option<String>) -> Result<Self, CameraError> {
        gst::init().map_err(|e| CameraError::InitializationFailed(e.to_string()))?;
        Ok(Self {
            facing,
            model,
            target,
            settings: None,
            pipeline: None,
            sink: None,
            last_frame: Arc::new(Mutex::new(None)),
        })
    }

    fn build_pipeline(&self, settings: &SessionSettings) -> Result<(gst::Pipeline, AppSink), CameraError> {
        let pipeline = gst::Pipeline::new();

        let mut source_builder = gst::ElementFactory::make("pipewiresrc").property("do-timestamp", true);
        if let Some(target) = &self.target {
            source_builder = source_builder.property("target-object", target.as_str());
        }
        let source = source_builder
            .build()
            .map_err(|e| CameraError::BackendError(format!("pipewiresrc: {}", e)))?;

        let convert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| CameraError::BackendError(format!("videoconvert: {}", e)))?;
        let scale = gst::ElementFactory::make("videoscale")
            .build()
            .map_err(|e| CameraError::BackendError(format!("videoscale: {}", e)))?;

        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGBA")
            .field("width", settings.preview_size.width as i32)
            .field("height", settings.preview_size.height as i32)
            .build();
        let capsfilter = gst::ElementFactory::make("capsfilter")
            .property("caps", &caps)
            .build()
            .map_err(|e| CameraError::BackendError(format!("capsfilter: {}", e)))?;

        let appsink = gst::ElementFactory::make("appsink")
            .build()
            .map_err(|e| CameraError::BackendError(format!("appsink: {}", e)))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| CameraError::BackendError("appsink cast failed".into()))?;
        appsink.set_property("sync", false);
        appsink.set_property("max-buffers", 2u32);
        appsink.set_property("drop", true);

        pipeline
            .add_many([&source, &convert, &scale, &capsfilter, appsink.upcast_ref()])
            .map_err(|e| CameraError::BackendError(e.to_string()))?;
        gst::Element::link_many([&source, &convert, &scale, &capsfilter, appsink.upcast_ref()])
            .map_err(|e| CameraError::BackendError(e.to_string()))?;

        Ok((pipeline, appsink))
    }

    fn install_callbacks(&self, appsink: &AppSink) {
        let sink = self.sink.clone();
        let last_frame = Arc::clone(&self.last_frame);
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let caps = sample.caps().ok_or(gst::FlowError::Error)?;
                    let video_info =
                        VideoInfo::from_caps(caps).map_err(|_| gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;

                    let frame = CameraFrame {
                        data: Arc::from(map.as_slice()),
                        width: video_info.width(),
                        height: video_info.height(),
                        stride: video_info.stride()[0] as u32,
                        captured_at: Instant::now(),
                    };

                    *last_frame.lock().unwrap() = Some(frame.clone());
                    if let Some(sink) = &sink {
                        sink(frame);
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );
    }

    fn teardown_pipeline(&mut self) {
        if let Some((pipeline, appsink)) = self.pipeline.take() {
            appsink.set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
            if let Err(err) = pipeline.set_state(gst::State::Null) {
                warn!(error = %err, "failed to stop camera pipeline");
            }
        }
    }
}

impl CameraDevice for GstCameraDevice {
    fn facing(&self) -> Facing {
        self.facing
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supported_sizes(&self) -> Vec<Resolution> {
        GST_SIZE_LADDER.to_vec()
    }

    fn configure(&mut self, settings: &SessionSettings) -> Result<(), CameraError> {
        debug!(
            preview = %settings.preview_size,
            picture = %settings.picture_size,
            orientation = settings.display_orientation,
            "Configuring camera session"
        );
        let was_running = self.pipeline.is_some();
        if was_running {
            self.teardown_pipeline();
        }
        self.settings = Some(*settings);
        if was_running {
            self.restart_preview()?;
        }
        Ok(())
    }

    fn start_preview(&mut self, sink: FrameSink) -> Result<(), CameraError> {
        self.sink = Some(Arc::new(sink));
        self.restart_preview()
    }

    fn stop_preview(&mut self) {
        self.teardown_pipeline();
    }

    fn set_focus(&mut self, _region: FocusRegion) -> Result<(), CameraError> {
        Err(CameraError::BackendError(
            "focus regions not supported by this device".into(),
        ))
    }

    fn set_zoom(&mut self, _level: u32) -> Result<(), CameraError> {
        Err(CameraError::BackendError(
            "zoom not supported by this device".into(),
        ))
    }

    fn max_zoom(&self) -> u32 {
        0
    }

    fn set_flash(&mut self, _enabled: bool) -> Result<(), CameraError> {
        Err(CameraError::BackendError(
            "flash not supported by this device".into(),
        ))
    }

    fn capture_still(&mut self) -> Result<CameraFrame, CameraError> {
        self.last_frame
            .lock()
            .unwrap()
            .clone()
            .ok_or(CameraError::Disconnected)
    }

    fn release(&mut self) {
        self.teardown_pipeline();
        self.sink = None;
        *self.last_frame.lock().unwrap() = None;
    }
}

impl GstCameraDevice {
    fn restart_preview(&mut self) -> Result<(), CameraError> {
        let settings = self.settings.ok_or_else(|| {
            CameraError::InitializationFailed("preview started before configure".into())
        })?;
        self.teardown_pipeline();

        let (pipeline, appsink) = self.build_pipeline(&settings)?;
        self.install_callbacks(&appsink);
        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CameraError::BackendError(format!("failed to start pipeline: {}", e)))?;

        info!(facing = %self.facing, size = %settings.preview_size, "Camera preview started");
        self.pipeline = Some((pipeline, appsink));
        Ok(())
    }
}

impl Drop for GstCameraDevice {
    fn drop(&mut self) {
        self.teardown_pipeline();
    }
}

/// Backend opening PipeWire cameras. Front/back facing maps to an optional
/// per-facing target object configured at construction.
pub struct GstCameraBackend {
    back_target: Option<String>,
    front_target: Option<String>,
}

impl GstCameraBackend {
    pub fn new(back_target: Option<String>, front_target: Option<String>) -> Self {
        Self {
            back_target,
            front_target,
        }
    }
}

impl Default for GstCameraBackend {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl CameraBackend for GstCameraBackend {
    fn open(&self, facing: Facing) -> Result<Box<dyn CameraDevice>, CameraError> {
        let target = match facing {
            Facing::Back => self.back_target.clone(),
            Facing::Front => self.front_target.clone(),
        };
        let device = GstCameraDevice::new(facing, format!("pipewire-{}", facing), target)?;
        Ok(Box::new(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_ratio_beats_larger_width() {
        // 640x480 is wider than 800x450's height budget but has the wrong
        // ratio; only exact matches are eligible when any exist.
        let sizes = [
            Resolution::new(320, 240),
            Resolution::new(640, 480),
            Resolution::new(800, 450),
        ];
        assert_eq!(
            select_capture_size(&sizes, 0.5625),
            Some(Resolution::new(800, 450))
        );
    }

    #[test]
    fn test_largest_exact_match_wins() {
        let sizes = [
            Resolution::new(320, 240),
            Resolution::new(640, 480),
            Resolution::new(1600, 1200),
        ];
        assert_eq!(
            select_capture_size(&sizes, 0.75),
            Some(Resolution::new(1600, 1200))
        );
    }

    #[test]
    fn test_nearest_ratio_fallback() {
        // No exact 0.5625 candidate: 640x400 (0.625) is closer than
        // 640x480 (0.75).
        let sizes = [Resolution::new(640, 480), Resolution::new(640, 400)];
        assert_eq!(
            select_capture_size(&sizes, 0.5625),
            Some(Resolution::new(640, 400))
        );
    }

    #[test]
    fn test_empty_size_list() {
        assert_eq!(select_capture_size(&[], 0.5625), None);
    }

    #[test]
    fn test_quirk_overrides_win() {
        let quirks = OrientationQuirks::new().with_override("module-a", Facing::Front, 270);
        assert_eq!(quirks.lookup("module-a", Facing::Front), Some(270));
        assert_eq!(quirks.lookup("module-a", Facing::Back), None);
        assert_eq!(quirks.lookup("module-b", Facing::Front), None);
    }
}
