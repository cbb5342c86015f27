// SPDX-License-Identifier: MPL-2.0

//! GPU context and render surface management.
//!
//! One [`GraphicsContext`] owns the wgpu device and queue for the whole
//! pipeline. The device and queue are reference counted so that a second
//! surface (the recorder's offscreen input) can submit work against textures
//! and pipelines created for the preview surface. All submissions are issued
//! from the render thread, which serializes the two draw paths.

mod surface;

pub use surface::{OffscreenSurface, WindowSurface, padded_bytes_per_row};

use crate::errors::RenderError;
use std::sync::Arc;
use tracing::info;

/// Information about the selected GPU adapter
#[derive(Debug, Clone)]
pub struct GpuInfo {
    /// Name of the GPU adapter
    pub adapter_name: String,
    /// Backend being used (Vulkan, Metal, ...)
    pub backend: wgpu::Backend,
}

/// Owns the GPU device and queue shared by every render surface.
pub struct GraphicsContext {
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    info: GpuInfo,
}

impl GraphicsContext {
    /// Create a context on the calling thread, blocking on adapter and
    /// device acquisition.
    pub fn new() -> Result<Self, RenderError> {
        pollster::block_on(Self::new_async())
    }

    /// Async variant of [`GraphicsContext::new`]
    pub async fn new_async() -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        let adapter_info = adapter.get_info();
        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "GPU adapter selected"
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("prism_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| RenderError::DeviceCreationFailed(e.to_string()))?;

        let info = GpuInfo {
            adapter_name: adapter_info.name,
            backend: adapter_info.backend,
        };

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            info,
        })
    }

    /// The shared device handle
    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// The shared submission queue
    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Adapter information for diagnostics
    pub fn info(&self) -> &GpuInfo {
        &self.info
    }

    /// Create a window-backed surface bound to a native presentation target.
    ///
    /// The surface must be dropped before this context.
    pub fn create_window_surface(
        &self,
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
    ) -> Result<WindowSurface, RenderError> {
        let surface = self
            .instance
            .create_surface(target)
            .map_err(|e| RenderError::SurfaceFailed(e.to_string()))?;
        WindowSurface::new(surface, &self.adapter, &self.device, width, height)
    }

    /// Create an offscreen surface whose swap hands the rendered frame back
    /// to the CPU. Used as the encoder's input surface.
    pub fn create_offscreen_surface(&self, width: u32, height: u32) -> OffscreenSurface {
        OffscreenSurface::new(&self.device, width, height)
    }
}
