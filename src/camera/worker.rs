// SPDX-License-Identifier: MPL-2.0

//! Camera worker thread and its control handle.
//!
//! All camera operations are serialized through one actor thread that owns
//! the device. Callers enqueue typed commands and never block, except for
//! the startup rendezvous in [`CameraController::wait_until_ready`].

use super::device::{CameraBackend, FrameSink, OrientationQuirks, select_capture_size};
use super::types::{
    CameraFrame, DisplayRotation, Facing, FocusRegion, SessionSettings, ZoomDirection,
};
use crate::errors::PhotoError;
use crate::sync::ReadyLatch;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Callback receiving the encoded photo bytes
pub type PhotoCallback = Box<dyn FnOnce(Result<Vec<u8>, PhotoError>) + Send + 'static>;

/// Commands processed in send order by the camera worker
pub enum CameraCommand {
    Open(Facing),
    Configure {
        rotation: DisplayRotation,
        aspect_ratio: f32,
    },
    SetFrameSink(Arc<dyn Fn(CameraFrame) + Send + Sync + 'static>),
    StartPreview,
    StopPreview,
    Switch {
        facing: Facing,
        rotation: DisplayRotation,
        aspect_ratio: f32,
    },
    SetFocus(FocusRegion),
    Zoom(ZoomDirection),
    EnableFlash(bool),
    TakePicture {
        rotation: u32,
        callback: PhotoCallback,
    },
    Quit,
}

impl std::fmt::Debug for CameraCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CameraCommand::Open(_) => "Open",
            CameraCommand::Configure { .. } => "Configure",
            CameraCommand::SetFrameSink(_) => "SetFrameSink",
            CameraCommand::StartPreview => "StartPreview",
            CameraCommand::StopPreview => "StopPreview",
            CameraCommand::Switch { .. } => "Switch",
            CameraCommand::SetFocus(_) => "SetFocus",
            CameraCommand::Zoom(_) => "Zoom",
            CameraCommand::EnableFlash(_) => "EnableFlash",
            CameraCommand::TakePicture { .. } => "TakePicture",
            CameraCommand::Quit => "Quit",
        };
        f.write_str(name)
    }
}

/// Handle to the camera worker thread.
///
/// Cloneable; every operation is fire-and-forget. The worker shuts down on
/// [`CameraController::release`] or when every handle is dropped.
#[derive(Clone)]
pub struct CameraController {
    sender: Sender<CameraCommand>,
    ready: Arc<ReadyLatch>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CameraController {
    /// Spawn the worker thread owning the given backend.
    pub fn spawn(backend: Arc<dyn CameraBackend>, quirks: OrientationQuirks) -> Self {
        let (sender, receiver) = unbounded();
        let ready = Arc::new(ReadyLatch::new());
        let ready_clone = Arc::clone(&ready);

        let join = std::thread::Builder::new()
            .name("camera-worker".into())
            .spawn(move || {
                let mut worker = CameraWorker::new(backend, quirks);
                ready_clone.set_ready();
                worker.run(receiver);
            })
            .expect("failed to spawn camera worker thread");

        Self {
            sender,
            ready,
            join: Arc::new(Mutex::new(Some(join))),
        }
    }

    /// Block until the worker's message loop is live.
    pub fn wait_until_ready(&self) {
        self.ready.wait();
    }

    pub fn open(&self, facing: Facing) {
        self.send(CameraCommand::Open(facing));
    }

    pub fn configure(&self, rotation: DisplayRotation, aspect_ratio: f32) {
        self.send(CameraCommand::Configure {
            rotation,
            aspect_ratio,
        });
    }

    /// Route preview frames to `sink`. The sink runs on the capture thread
    /// and must hand off quickly.
    pub fn set_frame_sink(&self, sink: Arc<dyn Fn(CameraFrame) + Send + Sync + 'static>) {
        self.send(CameraCommand::SetFrameSink(sink));
    }

    pub fn start_preview(&self) {
        self.send(CameraCommand::StartPreview);
    }

    pub fn stop_preview(&self) {
        self.send(CameraCommand::StopPreview);
    }

    pub fn switch_to(&self, facing: Facing, rotation: DisplayRotation, aspect_ratio: f32) {
        self.send(CameraCommand::Switch {
            facing,
            rotation,
            aspect_ratio,
        });
    }

    pub fn set_focus(&self, region: FocusRegion) {
        self.send(CameraCommand::SetFocus(region));
    }

    pub fn zoom(&self, direction: ZoomDirection) {
        self.send(CameraCommand::Zoom(direction));
    }

    pub fn enable_flash(&self, enabled: bool) {
        self.send(CameraCommand::EnableFlash(enabled));
    }

    pub fn take_picture(&self, rotation: u32, callback: PhotoCallback) {
        self.send(CameraCommand::TakePicture { rotation, callback });
    }

    /// Shut the worker down and wait for it to finish. Idempotent across
    /// every clone of this handle.
    pub fn release(&self) {
        let join = self.join.lock().unwrap().take();
        if let Some(join) = join {
            let _ = self.sender.send(CameraCommand::Quit);
            if join.join().is_err() {
                warn!("camera worker panicked during shutdown");
            }
        }
    }

    fn send(&self, command: CameraCommand) {
        if self.sender.send(command).is_err() {
            warn!("camera worker is gone, dropping command");
        }
    }
}

/// The actor owning the camera device. Lives entirely on the worker thread.
struct CameraWorker {
    backend: Arc<dyn CameraBackend>,
    quirks: OrientationQuirks,
    device: Option<Box<dyn super::device::CameraDevice>>,
    sink: Option<Arc<dyn Fn(CameraFrame) + Send + Sync + 'static>>,
    previewing: bool,
    zoom_level: u32,
}

impl CameraWorker {
    fn new(backend: Arc<dyn CameraBackend>, quirks: OrientationQuirks) -> Self {
        Self {
            backend,
            quirks,
            device: None,
            sink: None,
            previewing: false,
            zoom_level: 0,
        }
    }

    fn run(&mut self, receiver: Receiver<CameraCommand>) {
        debug!("camera worker loop started");
        while let Ok(command) = receiver.recv() {
            debug!(?command, "camera command");
            match command {
                CameraCommand::Open(facing) => self.open(facing),
                CameraCommand::Configure {
                    rotation,
                    aspect_ratio,
                } => self.configure(rotation, aspect_ratio),
                CameraCommand::SetFrameSink(sink) => self.sink = Some(sink),
                CameraCommand::StartPreview => self.start_preview(),
                CameraCommand::StopPreview => self.stop_preview(),
                CameraCommand::Switch {
                    facing,
                    rotation,
                    aspect_ratio,
                } => self.switch(facing, rotation, aspect_ratio),
                CameraCommand::SetFocus(region) => self.set_focus(region),
                CameraCommand::Zoom(direction) => self.zoom(direction),
                CameraCommand::EnableFlash(enabled) => self.enable_flash(enabled),
                CameraCommand::TakePicture { rotation, callback } => {
                    self.take_picture(rotation, callback)
                }
                CameraCommand::Quit => break,
            }
        }
        self.release_device();
        debug!("camera worker loop exiting");
    }

    fn open(&mut self, facing: Facing) {
        if self.device.is_some() {
            warn!("camera already open, ignoring open request");
            return;
        }
        match self.backend.open(facing) {
            Ok(device) => {
                info!(%facing, model = device.model(), "camera opened");
                self.device = Some(device);
                self.zoom_level = 0;
            }
            Err(err) => {
                // No retry; the session stays unopened.
                error!(%facing, error = %err, "failed to open camera");
            }
        }
    }

    fn configure(&mut self, rotation: DisplayRotation, aspect_ratio: f32) {
        let Some(device) = self.device.as_mut() else {
            error!("configure with no open camera");
            return;
        };
        let sizes = device.supported_sizes();
        let Some(preview_size) = select_capture_size(&sizes, aspect_ratio) else {
            error!(aspect_ratio, "no capture size available");
            return;
        };
        // stills come from the preview stream, so both sizes track the
        // same selection
        let picture_size = preview_size;

        let display_orientation = self
            .quirks
            .lookup(device.model(), device.facing())
            .unwrap_or_else(|| rotation.preview_correction());

        let settings = SessionSettings {
            preview_size,
            picture_size,
            display_orientation,
        };
        if let Err(err) = device.configure(&settings) {
            error!(error = %err, "camera configure failed");
        }
    }

    fn start_preview(&mut self) {
        let Some(device) = self.device.as_mut() else {
            warn!("start preview with no open camera");
            return;
        };
        let Some(sink) = self.sink.clone() else {
            warn!("start preview with no frame sink");
            return;
        };
        let forward: FrameSink = Box::new(move |frame| sink(frame));
        match device.start_preview(forward) {
            Ok(()) => self.previewing = true,
            Err(err) => warn!(error = %err, "start preview failed"),
        }
    }

    fn stop_preview(&mut self) {
        if let Some(device) = self.device.as_mut() {
            device.stop_preview();
        }
        self.previewing = false;
    }

    /// Equivalent to release, open(facing), configure, all under this
    /// thread's strict command ordering. No frame from the old session can
    /// be delivered once the switch begins.
    fn switch(&mut self, facing: Facing, rotation: DisplayRotation, aspect_ratio: f32) {
        let was_previewing = self.previewing;
        self.release_device();
        self.open(facing);
        self.configure(rotation, aspect_ratio);
        if was_previewing {
            self.start_preview();
        }
    }

    fn set_focus(&mut self, region: FocusRegion) {
        if let Some(device) = self.device.as_mut() {
            if let Err(err) = device.set_focus(region) {
                warn!(error = %err, "focus request rejected");
            }
        }
    }

    fn zoom(&mut self, direction: ZoomDirection) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        let max = device.max_zoom();
        let level = match direction {
            ZoomDirection::In if self.zoom_level < max => self.zoom_level + 1,
            ZoomDirection::Out if self.zoom_level > 0 => self.zoom_level - 1,
            _ => return,
        };
        match device.set_zoom(level) {
            Ok(()) => self.zoom_level = level,
            Err(err) => warn!(error = %err, "zoom request rejected"),
        }
    }

    fn enable_flash(&mut self, enabled: bool) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        if device.facing() == Facing::Front {
            return;
        }
        if let Err(err) = device.set_flash(enabled) {
            warn!(error = %err, "flash request rejected");
        }
    }

    fn take_picture(&mut self, rotation: u32, callback: PhotoCallback) {
        let Some(device) = self.device.as_mut() else {
            callback(Err(PhotoError::NoFrameAvailable));
            return;
        };
        // Front cameras mirror; the stored picture counter-rotates.
        let rotation = if device.facing() == Facing::Front {
            (360 - rotation % 360) % 360
        } else {
            rotation % 360
        };
        let result = device
            .capture_still()
            .map_err(|e| PhotoError::CaptureFailed(e.to_string()))
            .and_then(|frame| encode_photo(&frame, rotation));
        if let Err(err) = &result {
            warn!(error = %err, "photo capture failed");
        }
        callback(result);
        // Preview keeps running; nothing to resume for streaming backends.
    }

    fn release_device(&mut self) {
        if let Some(mut device) = self.device.take() {
            info!("releasing camera");
            device.release();
        }
        self.previewing = false;
        self.zoom_level = 0;
    }
}

/// Rotate and JPEG-encode a captured frame.
fn encode_photo(frame: &CameraFrame, rotation: u32) -> Result<Vec<u8>, PhotoError> {
    let row_bytes = frame.width as usize * 4;
    let stride = frame.stride as usize;
    let mut packed = Vec::with_capacity(row_bytes * frame.height as usize);
    for y in 0..frame.height as usize {
        let start = y * stride;
        packed.extend_from_slice(&frame.data[start..start + row_bytes]);
    }

    let image = image::RgbaImage::from_raw(frame.width, frame.height, packed)
        .ok_or(PhotoError::NoFrameAvailable)?;
    let image = match rotation {
        90 => image::imageops::rotate90(&image),
        180 => image::imageops::rotate180(&image),
        270 => image::imageops::rotate270(&image),
        _ => image,
    };

    let rgb = image::DynamicImage::ImageRgba8(image).to_rgb8();
    let mut bytes = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 90);
    encoder
        .encode_image(&rgb)
        .map_err(|e| PhotoError::EncodingFailed(e.to_string()))?;
    Ok(bytes)
}
