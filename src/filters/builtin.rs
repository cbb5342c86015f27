// SPDX-License-Identifier: MPL-2.0

//! Built-in filter stages

use super::stage::{FrameRotation, ShaderStage, StageContext, texcoord_transform};
use super::{FilterStage, SharedTextureView};
use crate::camera::CameraFrame;
use std::sync::Arc;

const PASSTHROUGH_WGSL: &str = include_str!("shaders/passthrough.wgsl");
const GRAYSCALE_WGSL: &str = include_str!("shaders/grayscale.wgsl");
const SEPIA_WGSL: &str = include_str!("shaders/sepia.wgsl");

/// Identity filter; also used as the final on-screen and encoder drawer.
pub fn passthrough() -> ShaderStage {
    ShaderStage::new("passthrough", PASSTHROUGH_WGSL)
}

/// Luma-weighted grayscale filter.
pub fn grayscale() -> ShaderStage {
    ShaderStage::new("grayscale", GRAYSCALE_WGSL)
}

/// Warm sepia-tone filter.
pub fn sepia() -> ShaderStage {
    ShaderStage::new("sepia", SEPIA_WGSL)
}

/// First stage of every draw pass: uploads the camera's RGBA frame into a
/// texture and renders it through the orientation/mirror transform into an
/// owned output texture that the rest of the chain reads.
pub struct CameraInputStage {
    inner: ShaderStage,
    upload: Option<CameraTexture>,
}

struct CameraTexture {
    texture: wgpu::Texture,
    view: SharedTextureView,
    width: u32,
    height: u32,
}

impl CameraInputStage {
    pub fn new() -> Self {
        Self {
            inner: ShaderStage::with_owned_output("camera_input", PASSTHROUGH_WGSL),
            upload: None,
        }
    }

    /// Apply the sensor orientation and preview mirroring.
    pub fn set_orientation(&mut self, rotation: FrameRotation, mirror: bool) {
        self.inner.set_transform(texcoord_transform(rotation, mirror));
    }

    pub fn create(&mut self, ctx: &StageContext) {
        FilterStage::create(&mut self.inner, ctx);
    }

    pub fn resize(&mut self, ctx: &StageContext, width: u32, height: u32) {
        FilterStage::resize(&mut self.inner, ctx, width, height);
    }

    /// Upload one camera frame and make it the stage input.
    pub fn upload_frame(&mut self, ctx: &StageContext, frame: &CameraFrame) {
        let needs_realloc = self
            .upload
            .as_ref()
            .map(|t| (t.width, t.height) != (frame.width, frame.height))
            .unwrap_or(true);
        if needs_realloc {
            let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("camera_frame"),
                size: wgpu::Extent3d {
                    width: frame.width,
                    height: frame.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = Arc::new(texture.create_view(&wgpu::TextureViewDescriptor::default()));
            self.upload = Some(CameraTexture {
                texture,
                view,
                width: frame.width,
                height: frame.height,
            });
        }

        let upload = self.upload.as_ref().expect("upload texture allocated above");
        ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &upload.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.stride),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
        self.inner.set_input(Arc::clone(&upload.view));
    }

    /// Render the uploaded frame through the transform into the owned
    /// output texture.
    pub fn draw(&mut self, ctx: &StageContext, encoder: &mut wgpu::CommandEncoder) {
        self.inner.draw_to_output(ctx, encoder);
    }

    /// The corrected camera texture the filter chain reads.
    pub fn output_view(&self) -> Option<SharedTextureView> {
        self.inner.output_view()
    }

    pub fn release(&mut self) {
        self.upload = None;
        FilterStage::release(&mut self.inner);
    }
}

impl Default for CameraInputStage {
    fn default() -> Self {
        Self::new()
    }
}
