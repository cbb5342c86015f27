// SPDX-License-Identifier: MPL-2.0

//! Window-backed and offscreen render surfaces

use crate::errors::RenderError;
use tracing::debug;

/// Round a row of RGBA pixels up to wgpu's copy alignment.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// A surface bound to a native window or view, presented via swapchain.
pub struct WindowSurface {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

impl WindowSurface {
    pub(crate) fn new(
        surface: wgpu::Surface<'static>,
        adapter: &wgpu::Adapter,
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        let caps = surface.get_capabilities(adapter);
        if caps.formats.is_empty() {
            return Err(RenderError::SurfaceFailed(
                "surface is incompatible with the selected adapter".into(),
            ));
        }

        let format = caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .copied()
            .unwrap_or(caps.formats[0]);

        let present_mode = if caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
            wgpu::PresentMode::Mailbox
        } else {
            wgpu::PresentMode::Fifo
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode,
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(device, &config);

        debug!(?format, ?present_mode, width, height, "Window surface configured");

        Ok(Self { surface, config })
    }

    /// Texture format frames must be rendered in
    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    /// Current surface dimensions
    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    /// Reconfigure after the native target changed size
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        self.surface.configure(device, &self.config);
    }

    /// Acquire the next swapchain frame to draw into
    pub fn acquire(&self) -> Result<wgpu::SurfaceTexture, RenderError> {
        self.surface
            .get_current_texture()
            .map_err(|e| RenderError::SurfaceFailed(e.to_string()))
    }
}

/// An offscreen render target whose swap reads the frame back to the CPU.
///
/// This is the encoder's input surface: the render thread draws the
/// composited texture into it, and `swap` produces the tightly packed RGBA
/// frame that is submitted to the video codec.
pub struct OffscreenSurface {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    width: u32,
    height: u32,
}

impl OffscreenSurface {
    pub(crate) fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("encoder_input_texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("encoder_readback_buffer"),
            size: padded_bytes_per_row(width) as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            texture,
            view,
            readback,
            width,
            height,
        }
    }

    /// Render target view for the encoder draw pass
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Surface dimensions
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Read the last rendered frame back as tightly packed RGBA bytes.
    ///
    /// The copy and map round-trip is what "presents" this surface; the
    /// returned frame is handed to the codec as submitted input.
    pub fn swap(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<Vec<u8>, RenderError> {
        let padded = padded_bytes_per_row(self.width);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("encoder_readback"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let slice = self.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| RenderError::SurfaceFailed(format!("map channel closed: {}", e)))?
            .map_err(|e| RenderError::SurfaceFailed(format!("buffer map failed: {:?}", e)))?;

        let data = slice.get_mapped_range();
        let row_bytes = (self.width * 4) as usize;
        let mut frame = vec![0u8; row_bytes * self.height as usize];
        for y in 0..self.height as usize {
            let src = y * padded as usize;
            let dst = y * row_bytes;
            frame[dst..dst + row_bytes].copy_from_slice(&data[src..src + row_bytes]);
        }
        drop(data);
        self.readback.unmap();

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_bytes_per_row() {
        // 256-byte alignment
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(320), 1280);
        assert_eq!(padded_bytes_per_row(321), 1536);
        assert_eq!(padded_bytes_per_row(1920), 7680);
    }
}
