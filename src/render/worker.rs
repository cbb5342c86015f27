// SPDX-License-Identifier: MPL-2.0

//! Render worker: owns the GPU context, the filter chain, and both draw
//! paths (preview surface and encoder surface).
//!
//! The worker reacts to frame-available signals from the camera; each
//! signal triggers one draw pass. When recording is enabled the same
//! composited texture is drawn a second time onto the encoder's offscreen
//! surface, from this thread, so all GPU submissions stay serialized on
//! one context.

use crate::camera::{
    CameraBackend, CameraController, CameraFrame, DisplayRotation, Facing, FocusRegion,
    OrientationQuirks, PhotoCallback, ZoomDirection,
};
use crate::config::Config;
use crate::filters::{
    CameraInputStage, ChainOutput, FilterChain, FilterStage, FrameRotation, ShaderStage,
    SharedTextureView, StageContext, passthrough,
};
use crate::gpu::{GraphicsContext, OffscreenSurface, WindowSurface};
use crate::record::Recorder;
use crate::sync::ReadyLatch;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Intermediate compositing format shared by the camera stage, the chain,
/// and the encoder surface.
const COMPOSITE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Render session parameters derived from configuration
#[derive(Debug, Clone, Copy)]
pub struct RenderConfig {
    pub facing: Facing,
    pub aspect_ratio: f32,
    pub mirror_preview: bool,
    pub rotation: DisplayRotation,
}

impl From<&Config> for RenderConfig {
    fn from(config: &Config) -> Self {
        Self {
            facing: config.default_facing,
            aspect_ratio: config.aspect_ratio,
            mirror_preview: config.mirror_preview,
            rotation: DisplayRotation::default(),
        }
    }
}

/// Camera operations forwarded through the render worker so they stay
/// ordered with surface and switch transitions.
pub enum CameraOp {
    SetFocus(FocusRegion),
    Zoom(ZoomDirection),
    EnableFlash(bool),
    TakePicture { rotation: u32, callback: PhotoCallback },
}

enum RenderCommand {
    SurfaceCreated {
        target: wgpu::SurfaceTarget<'static>,
        width: u32,
        height: u32,
    },
    SurfaceChanged {
        width: u32,
        height: u32,
    },
    SurfaceDestroyed,
    FrameAvailable(CameraFrame),
    AddFilter(Box<dyn FilterStage>),
    ReplaceFilter(Box<dyn FilterStage>),
    SwitchCamera,
    AttachRecorder {
        recorder: Arc<Recorder>,
        width: u32,
        height: u32,
    },
    EnableRecording(bool),
    Camera(CameraOp),
    Quit,
}

/// Handle to the render worker thread; the surface lifecycle callbacks
/// from the presentation layer land here.
pub struct RenderController {
    sender: Sender<RenderCommand>,
    ready: Arc<ReadyLatch>,
    join: Option<JoinHandle<()>>,
}

impl RenderController {
    /// Spawn the worker. The camera worker is spawned lazily on the first
    /// `surface_created`.
    pub fn spawn(
        config: RenderConfig,
        backend: Arc<dyn CameraBackend>,
        quirks: OrientationQuirks,
    ) -> Self {
        let (sender, receiver) = unbounded();
        let ready = Arc::new(ReadyLatch::new());
        let ready_clone = Arc::clone(&ready);
        let self_sender = sender.clone();

        let join = std::thread::Builder::new()
            .name("render-worker".into())
            .spawn(move || {
                let mut worker = RenderWorker::new(config, backend, quirks, self_sender);
                ready_clone.set_ready();
                worker.run(receiver);
            })
            .expect("failed to spawn render worker thread");

        Self {
            sender,
            ready,
            join: Some(join),
        }
    }

    pub fn wait_until_ready(&self) {
        self.ready.wait();
    }

    /// Presentation layer callback: the native target exists.
    pub fn surface_created(
        &self,
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
    ) {
        self.send(RenderCommand::SurfaceCreated {
            target: target.into(),
            width,
            height,
        });
    }

    /// Presentation layer callback: the target changed size.
    pub fn surface_changed(&self, width: u32, height: u32) {
        self.send(RenderCommand::SurfaceChanged { width, height });
    }

    /// Presentation layer callback: the target is going away.
    pub fn surface_destroyed(&self) {
        self.send(RenderCommand::SurfaceDestroyed);
    }

    /// Append a filter to the active chain.
    pub fn add_filter(&self, stage: Box<dyn FilterStage>) {
        self.send(RenderCommand::AddFilter(stage));
    }

    /// Replace the whole chain with one filter.
    pub fn replace_filter(&self, stage: Box<dyn FilterStage>) {
        self.send(RenderCommand::ReplaceFilter(stage));
    }

    /// Toggle between the front and back camera.
    pub fn switch_camera(&self) {
        self.send(RenderCommand::SwitchCamera);
    }

    /// Wire a recorder as the second sink; its input surface is created at
    /// the given encode resolution.
    pub fn attach_recorder(&self, recorder: Arc<Recorder>, width: u32, height: u32) {
        self.send(RenderCommand::AttachRecorder {
            recorder,
            width,
            height,
        });
    }

    /// Toggle forwarding of composited frames to the recorder. A no-op
    /// unless a recorder surface is attached.
    pub fn enable_recording(&self, enabled: bool) {
        self.send(RenderCommand::EnableRecording(enabled));
    }

    pub fn set_focus(&self, region: FocusRegion) {
        self.send(RenderCommand::Camera(CameraOp::SetFocus(region)));
    }

    pub fn zoom(&self, direction: ZoomDirection) {
        self.send(RenderCommand::Camera(CameraOp::Zoom(direction)));
    }

    pub fn enable_flash(&self, enabled: bool) {
        self.send(RenderCommand::Camera(CameraOp::EnableFlash(enabled)));
    }

    /// Capture a still; the callback receives encoded JPEG bytes. Preview
    /// continues afterwards.
    pub fn take_picture(&self, rotation: u32, callback: PhotoCallback) {
        self.send(RenderCommand::Camera(CameraOp::TakePicture {
            rotation,
            callback,
        }));
    }

    /// Shut the worker down, releasing the camera, every stage, and the
    /// GPU context in that order.
    pub fn release(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.sender.send(RenderCommand::Quit);
            if join.join().is_err() {
                warn!("render worker panicked during shutdown");
            }
        }
    }

    fn send(&self, command: RenderCommand) {
        if self.sender.send(command).is_err() {
            warn!("render worker is gone, dropping command");
        }
    }
}

impl Drop for RenderController {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenderState {
    Uninitialized,
    ContextReady,
    Previewing,
    Destroyed,
}

struct RenderWorker {
    config: RenderConfig,
    backend: Arc<dyn CameraBackend>,
    quirks: OrientationQuirks,
    self_sender: Sender<RenderCommand>,

    state: RenderState,
    facing: Facing,

    gpu: Option<GraphicsContext>,
    window: Option<WindowSurface>,
    camera_stage: Option<CameraInputStage>,
    chain: Option<FilterChain>,
    screen_stage: Option<ShaderStage>,

    camera: Option<CameraController>,

    recorder: Option<Arc<Recorder>>,
    encoder_surface: Option<OffscreenSurface>,
    encoder_stage: Option<ShaderStage>,
    recording: bool,
}

impl RenderWorker {
    fn new(
        config: RenderConfig,
        backend: Arc<dyn CameraBackend>,
        quirks: OrientationQuirks,
        self_sender: Sender<RenderCommand>,
    ) -> Self {
        Self {
            facing: config.facing,
            config,
            backend,
            quirks,
            self_sender,
            state: RenderState::Uninitialized,
            gpu: None,
            window: None,
            camera_stage: None,
            chain: None,
            screen_stage: None,
            camera: None,
            recorder: None,
            encoder_surface: None,
            encoder_stage: None,
            recording: false,
        }
    }

    fn run(&mut self, receiver: Receiver<RenderCommand>) {
        debug!("render worker loop started");
        while let Ok(command) = receiver.recv() {
            match command {
                RenderCommand::SurfaceCreated {
                    target,
                    width,
                    height,
                } => self.surface_created(target, width, height),
                RenderCommand::SurfaceChanged { width, height } => {
                    self.surface_changed(width, height)
                }
                RenderCommand::SurfaceDestroyed => self.surface_destroyed(),
                RenderCommand::FrameAvailable(frame) => self.draw_frame(frame),
                RenderCommand::AddFilter(stage) => {
                    if let Some(chain) = &self.chain {
                        chain.handle().add_filter(stage);
                    }
                }
                RenderCommand::ReplaceFilter(stage) => {
                    if let Some(chain) = &self.chain {
                        chain.handle().replace_filter(stage);
                    }
                }
                RenderCommand::SwitchCamera => self.switch_camera(),
                RenderCommand::AttachRecorder {
                    recorder,
                    width,
                    height,
                } => self.attach_recorder(recorder, width, height),
                RenderCommand::EnableRecording(enabled) => self.enable_recording(enabled),
                RenderCommand::Camera(op) => self.camera_op(op),
                RenderCommand::Quit => break,
            }
        }
        if self.state != RenderState::Destroyed {
            self.surface_destroyed();
        }
        debug!("render worker loop exiting");
    }

    fn stage_context<'a>(gpu: &'a GraphicsContext, format: wgpu::TextureFormat) -> StageContext<'a> {
        StageContext {
            device: gpu.device(),
            queue: gpu.queue(),
            output_format: format,
        }
    }

    /// Uninitialized -> ContextReady: allocate the context and surface,
    /// build the stage pipeline, then open the camera.
    fn surface_created(
        &mut self,
        target: wgpu::SurfaceTarget<'static>,
        width: u32,
        height: u32,
    ) {
        if self.gpu.is_some() {
            warn!("surface created twice, ignoring");
            return;
        }
        info!(width, height, "render surface created");

        let gpu = match GraphicsContext::new() {
            Ok(gpu) => gpu,
            Err(err) => {
                error!(error = %err, "GPU context creation failed");
                return;
            }
        };
        let window = match gpu.create_window_surface(target, width, height) {
            Ok(window) => window,
            Err(err) => {
                error!(error = %err, "window surface creation failed");
                return;
            }
        };

        let composite_ctx = Self::stage_context(&gpu, COMPOSITE_FORMAT);
        let mut camera_stage = CameraInputStage::new();
        camera_stage.create(&composite_ctx);
        camera_stage.set_orientation(FrameRotation::None, self.mirror_active());
        let mut chain = FilterChain::new();

        let screen_ctx = Self::stage_context(&gpu, window.format());
        let mut screen_stage = passthrough();
        FilterStage::create(&mut screen_stage, &screen_ctx);

        camera_stage.resize(&composite_ctx, width, height);
        chain.resize(&composite_ctx, width, height);
        FilterStage::resize(&mut screen_stage, &screen_ctx, width, height);

        self.gpu = Some(gpu);
        self.window = Some(window);
        self.camera_stage = Some(camera_stage);
        self.chain = Some(chain);
        self.screen_stage = Some(screen_stage);
        self.state = RenderState::ContextReady;

        self.open_camera();
    }

    /// Spawn (if needed) and configure the camera, routing its frames back
    /// to this worker's mailbox.
    fn open_camera(&mut self) {
        if self.camera.is_none() {
            let camera =
                CameraController::spawn(Arc::clone(&self.backend), self.quirks.clone());
            camera.wait_until_ready();
            self.camera = Some(camera);
        }
        let Some(camera) = &self.camera else { return };

        let sender = self.self_sender.clone();
        camera.open(self.facing);
        camera.configure(self.config.rotation, self.config.aspect_ratio);
        camera.set_frame_sink(Arc::new(move |frame| {
            // the frame-available signal: one queued draw per frame
            let _ = sender.send(RenderCommand::FrameAvailable(frame));
        }));
        camera.start_preview();
    }

    /// Propagate a size change to every stage and rebuild the chain's
    /// intermediate textures.
    fn surface_changed(&mut self, width: u32, height: u32) {
        let Some(gpu) = &self.gpu else {
            warn!("surface changed before creation");
            return;
        };
        debug!(width, height, "render surface changed");

        if let Some(window) = self.window.as_mut() {
            window.resize(gpu.device(), width, height);
        }
        let composite_ctx = Self::stage_context(gpu, COMPOSITE_FORMAT);
        if let Some(stage) = self.camera_stage.as_mut() {
            stage.resize(&composite_ctx, width, height);
        }
        if let Some(chain) = self.chain.as_mut() {
            chain.resize(&composite_ctx, width, height);
        }
        if let Some(stage) = self.screen_stage.as_mut() {
            let format = self.window.as_ref().map(|w| w.format()).unwrap_or(COMPOSITE_FORMAT);
            let screen_ctx = Self::stage_context(gpu, format);
            FilterStage::resize(stage, &screen_ctx, width, height);
        }
    }

    /// One draw pass: camera stage, filter chain, screen, and optionally
    /// the encoder surface.
    fn draw_frame(&mut self, frame: CameraFrame) {
        let Some(gpu) = &self.gpu else { return };
        let (Some(camera_stage), Some(chain), Some(screen_stage), Some(window)) = (
            self.camera_stage.as_mut(),
            self.chain.as_mut(),
            self.screen_stage.as_mut(),
            self.window.as_ref(),
        ) else {
            return;
        };

        let composite_ctx = StageContext {
            device: gpu.device(),
            queue: gpu.queue(),
            output_format: COMPOSITE_FORMAT,
        };

        camera_stage.upload_frame(&composite_ctx, &frame);

        let mut encoder = gpu
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("preview_draw"),
            });
        camera_stage.draw(&composite_ctx, &mut encoder);

        let Some(camera_out) = camera_stage.output_view() else {
            warn!("camera stage has no output yet");
            return;
        };

        // Empty chain passes the camera texture through untouched.
        let composited: SharedTextureView =
            match chain.draw(&composite_ctx, &mut encoder, &camera_out) {
                ChainOutput::Passthrough => camera_out,
                ChainOutput::Composited(view) => view,
            };

        let screen_ctx = StageContext {
            device: gpu.device(),
            queue: gpu.queue(),
            output_format: window.format(),
        };
        match window.acquire() {
            Ok(surface_texture) => {
                let target = surface_texture
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                FilterStage::set_input(screen_stage, Arc::clone(&composited));
                FilterStage::draw(screen_stage, &screen_ctx, &mut encoder, &target);
                gpu.queue().submit(std::iter::once(encoder.finish()));
                surface_texture.present();
            }
            Err(err) => {
                // transient: the next frame may reattach
                warn!(error = %err, "failed to acquire preview frame");
                gpu.queue().submit(std::iter::once(encoder.finish()));
            }
        }

        if self.state == RenderState::ContextReady {
            self.state = RenderState::Previewing;
        }

        if self.recording {
            self.draw_recording_frame(&composited);
        }
    }

    /// Second sink: draw the composited texture onto the encoder surface
    /// and submit the swapped-out frame to the video track.
    fn draw_recording_frame(&mut self, composited: &SharedTextureView) {
        let Some(gpu) = &self.gpu else { return };
        let (Some(recorder), Some(surface), Some(stage)) = (
            self.recorder.as_ref(),
            self.encoder_surface.as_ref(),
            self.encoder_stage.as_mut(),
        ) else {
            return;
        };

        recorder.frame_available();

        let ctx = StageContext {
            device: gpu.device(),
            queue: gpu.queue(),
            output_format: COMPOSITE_FORMAT,
        };
        let mut encoder = gpu
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("encoder_draw"),
            });
        FilterStage::set_input(stage, Arc::clone(composited));
        FilterStage::draw(stage, &ctx, &mut encoder, surface.view());
        gpu.queue().submit(std::iter::once(encoder.finish()));

        // the swap is the frame submission
        match surface.swap(gpu.device(), gpu.queue()) {
            Ok(bytes) => recorder.submit_frame(bytes),
            Err(err) => warn!(error = %err, "encoder surface swap failed"),
        }
    }

    /// Release the old session and reopen with the toggled facing; no draw
    /// interleaves because everything runs on this thread in order.
    fn switch_camera(&mut self) {
        let Some(camera) = &self.camera else {
            warn!("switch requested with no camera");
            return;
        };
        self.facing = self.facing.toggled();
        info!(facing = %self.facing, "switching camera");
        camera.switch_to(self.facing, self.config.rotation, self.config.aspect_ratio);
        if let Some(stage) = self.camera_stage.as_mut() {
            stage.set_orientation(FrameRotation::None, self.mirror_active());
        }
    }

    fn mirror_active(&self) -> bool {
        self.config.mirror_preview && self.facing == Facing::Front
    }

    fn attach_recorder(&mut self, recorder: Arc<Recorder>, width: u32, height: u32) {
        let Some(gpu) = &self.gpu else {
            warn!("recorder attached before the GPU context exists");
            return;
        };
        info!(width, height, "attaching recorder surface");

        let ctx = Self::stage_context(gpu, COMPOSITE_FORMAT);
        let mut stage = passthrough();
        FilterStage::create(&mut stage, &ctx);
        FilterStage::resize(&mut stage, &ctx, width, height);

        self.encoder_surface = Some(gpu.create_offscreen_surface(width, height));
        self.encoder_stage = Some(stage);
        self.recorder = Some(recorder);
    }

    fn enable_recording(&mut self, enabled: bool) {
        if enabled && (self.recorder.is_none() || self.encoder_surface.is_none()) {
            warn!("recording enabled with no attached recorder surface");
            return;
        }
        debug!(enabled, "recording forwarding");
        self.recording = enabled;
    }

    fn camera_op(&mut self, op: CameraOp) {
        let Some(camera) = &self.camera else {
            warn!("camera operation with no camera");
            if let CameraOp::TakePicture { callback, .. } = op {
                callback(Err(crate::errors::PhotoError::NoFrameAvailable));
            }
            return;
        };
        match op {
            CameraOp::SetFocus(region) => camera.set_focus(region),
            CameraOp::Zoom(direction) => camera.zoom(direction),
            CameraOp::EnableFlash(enabled) => camera.enable_flash(enabled),
            CameraOp::TakePicture { rotation, callback } => {
                camera.take_picture(rotation, callback)
            }
        }
    }

    /// ContextReady/Previewing -> Destroyed. Camera first, then stages,
    /// then surfaces, then the context they were built from.
    fn surface_destroyed(&mut self) {
        info!("render surface destroyed");
        self.recording = false;

        if let Some(camera) = self.camera.take() {
            camera.stop_preview();
            camera.release();
        }

        if let Some(mut stage) = self.camera_stage.take() {
            stage.release();
        }
        if let Some(mut chain) = self.chain.take() {
            chain.release();
        }
        if let Some(mut stage) = self.screen_stage.take() {
            FilterStage::release(&mut stage);
        }
        if let Some(mut stage) = self.encoder_stage.take() {
            FilterStage::release(&mut stage);
        }
        self.encoder_surface = None;
        self.recorder = None;

        self.window = None;
        self.gpu = None;
        self.state = RenderState::Destroyed;
    }
}
