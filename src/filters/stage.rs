// SPDX-License-Identifier: MPL-2.0

//! Shader-backed filter stage implementation

use super::{FilterStage, SharedTextureView};
use std::sync::Arc;
use tracing::{debug, warn};

/// Context handed to stages for GPU object creation.
///
/// `output_format` is the format of the render target the stage will draw
/// into; pipelines are compiled against it.
pub struct StageContext<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub output_format: wgpu::TextureFormat,
}

/// Frame rotation applied through the texture-coordinate transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameRotation {
    #[default]
    None,
    Clockwise90,
    Rotate180,
    Clockwise270,
}

/// Build the texture-coordinate transform for a rotation plus optional
/// horizontal mirror. Column-major, applied as `transform * vec4(uv, 0, 1)`.
pub fn texcoord_transform(rotation: FrameRotation, mirror: bool) -> [[f32; 4]; 4] {
    let (r00, r01, r10, r11) = match rotation {
        FrameRotation::None => (1.0, 0.0, 0.0, 1.0),
        FrameRotation::Clockwise90 => (0.0, -1.0, 1.0, 0.0),
        FrameRotation::Rotate180 => (-1.0, 0.0, 0.0, -1.0),
        FrameRotation::Clockwise270 => (0.0, 1.0, -1.0, 0.0),
    };
    // Horizontal mirror is applied before the rotation.
    let (a00, a10) = if mirror { (-r00, -r10) } else { (r00, r10) };
    let (a01, a11) = (r01, r11);
    // Keep the unit square fixed: rotate and mirror about (0.5, 0.5).
    let tx = 0.5 - (a00 * 0.5 + a01 * 0.5);
    let ty = 0.5 - (a10 * 0.5 + a11 * 0.5);
    [
        [a00, a10, 0.0, 0.0],
        [a01, a11, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [tx, ty, 0.0, 1.0],
    ]
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct StageUniforms {
    transform: [[f32; 4]; 4],
}

struct StagePipeline {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
}

/// A filter stage driven by a WGSL fragment shader over a fullscreen
/// triangle. Concrete filters are this struct plus a shader source; see
/// `builtin.rs` for the stock set.
pub struct ShaderStage {
    label: &'static str,
    source: &'static str,
    transform: [[f32; 4]; 4],
    transform_dirty: bool,
    gpu: Option<StagePipeline>,
    input: Option<SharedTextureView>,
    // Owned output target, for stages drawn outside the chain's ping-pong
    // textures (e.g. the camera input stage).
    output: Option<(wgpu::Texture, SharedTextureView)>,
    owns_output: bool,
    size: (u32, u32),
}

impl ShaderStage {
    /// A stage that draws into externally provided targets.
    pub fn new(label: &'static str, source: &'static str) -> Self {
        Self {
            label,
            source,
            transform: texcoord_transform(FrameRotation::None, false),
            transform_dirty: true,
            gpu: None,
            input: None,
            output: None,
            owns_output: false,
            size: (0, 0),
        }
    }

    /// A stage that owns its output texture, recreated on every resize.
    pub fn with_owned_output(label: &'static str, source: &'static str) -> Self {
        let mut stage = Self::new(label, source);
        stage.owns_output = true;
        stage
    }

    /// Replace the texture-coordinate transform.
    pub fn set_transform(&mut self, transform: [[f32; 4]; 4]) {
        self.transform = transform;
        self.transform_dirty = true;
    }

    /// View of the owned output texture, if this stage owns one and has
    /// been resized.
    pub fn output_view(&self) -> Option<SharedTextureView> {
        self.output.as_ref().map(|(_, view)| Arc::clone(view))
    }

    /// Draw into the owned output texture.
    pub fn draw_to_output(&mut self, ctx: &StageContext, encoder: &mut wgpu::CommandEncoder) {
        let view = match self.output.as_ref() {
            Some((_, view)) => Arc::clone(view),
            None => {
                warn!(stage = self.label, "draw before resize, skipping");
                return;
            }
        };
        self.draw(ctx, encoder, &view);
    }

    fn build_pipeline(&self, ctx: &StageContext) -> StagePipeline {
        let shader = ctx.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(self.label),
            source: wgpu::ShaderSource::Wgsl(self.source.into()),
        });

        let bind_group_layout =
            ctx.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(self.label),
                    entries: &[
                        wgpu::BindGroupLayoutEntry {
                            binding: 0,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                view_dimension: wgpu::TextureViewDimension::D2,
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 1,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 2,
                            visibility: wgpu::ShaderStages::VERTEX,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                    ],
                });

        let layout = ctx
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(self.label),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let pipeline = ctx
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(self.label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: ctx.output_format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        let sampler = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(self.label),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let uniform_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(self.label),
            size: std::mem::size_of::<StageUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        StagePipeline {
            pipeline,
            bind_group_layout,
            sampler,
            uniform_buffer,
        }
    }
}

impl FilterStage for ShaderStage {
    fn create(&mut self, ctx: &StageContext) {
        if self.gpu.is_some() {
            return;
        }
        debug!(stage = self.label, format = ?ctx.output_format, "Creating filter stage");
        self.gpu = Some(self.build_pipeline(ctx));
        self.transform_dirty = true;
    }

    fn resize(&mut self, ctx: &StageContext, width: u32, height: u32) {
        if self.size == (width, height) {
            return;
        }
        self.size = (width, height);
        if self.owns_output {
            let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(self.label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: ctx.output_format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            });
            let view = Arc::new(texture.create_view(&wgpu::TextureViewDescriptor::default()));
            self.output = Some((texture, view));
        }
    }

    fn set_input(&mut self, input: SharedTextureView) {
        self.input = Some(input);
    }

    fn draw(&mut self, ctx: &StageContext, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        let Some(gpu) = self.gpu.as_ref() else {
            warn!(stage = self.label, "draw before create, skipping");
            return;
        };
        let Some(input) = self.input.as_ref() else {
            warn!(stage = self.label, "draw without input texture, skipping");
            return;
        };

        if self.transform_dirty {
            let uniforms = StageUniforms {
                transform: self.transform,
            };
            ctx.queue
                .write_buffer(&gpu.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
            self.transform_dirty = false;
        }

        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.label),
            layout: &gpu.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(input),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&gpu.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: gpu.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(self.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&gpu.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    fn release(&mut self) {
        self.gpu = None;
        self.input = None;
        self.output = None;
        self.size = (0, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(m: &[[f32; 4]; 4], uv: (f32, f32)) -> (f32, f32) {
        let x = m[0][0] * uv.0 + m[1][0] * uv.1 + m[3][0];
        let y = m[0][1] * uv.0 + m[1][1] * uv.1 + m[3][1];
        (x, y)
    }

    #[test]
    fn test_identity_transform() {
        let m = texcoord_transform(FrameRotation::None, false);
        assert_eq!(apply(&m, (0.25, 0.75)), (0.25, 0.75));
    }

    #[test]
    fn test_mirror_transform() {
        let m = texcoord_transform(FrameRotation::None, true);
        assert_eq!(apply(&m, (0.0, 0.5)), (1.0, 0.5));
        assert_eq!(apply(&m, (1.0, 0.5)), (0.0, 0.5));
    }

    #[test]
    fn test_rotate_180_transform() {
        let m = texcoord_transform(FrameRotation::Rotate180, false);
        assert_eq!(apply(&m, (0.0, 0.0)), (1.0, 1.0));
        assert_eq!(apply(&m, (1.0, 0.0)), (0.0, 1.0));
    }
}
