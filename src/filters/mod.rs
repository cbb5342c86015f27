// SPDX-License-Identifier: MPL-2.0

//! GPU filter stages and the composited filter chain.
//!
//! A [`FilterStage`] is a single compositing step: one shader program, one
//! texture-coordinate transform, one output. The [`FilterChain`] applies an
//! ordered list of stages to an input texture using exactly two intermediate
//! textures regardless of chain length, so GPU memory stays bounded no
//! matter how many filters are active.
//!
//! External code may supply its own `FilterStage` implementations; `create`
//! and `resize` are guaranteed to run on the render thread before the first
//! `draw`.

mod builtin;
mod chain;
mod stage;

pub use builtin::{CameraInputStage, grayscale, passthrough, sepia};
pub use chain::{ChainHandle, ChainOutput, FilterChain};
pub use stage::{FrameRotation, ShaderStage, StageContext, texcoord_transform};

use std::sync::Arc;

/// Reference-counted texture view handle passed between stages.
pub type SharedTextureView = Arc<wgpu::TextureView>;

/// A single GPU compositing step.
///
/// Stages are created and driven exclusively on the render thread; GPU
/// objects are thread-affine to the context that thread owns.
pub trait FilterStage: Send {
    /// Compile the stage's pipeline against the given context.
    fn create(&mut self, ctx: &StageContext);

    /// Propagate an output size change. A stage's output always matches the
    /// most recent `resize`; drawing before the first `resize` is undefined.
    fn resize(&mut self, ctx: &StageContext, width: u32, height: u32);

    /// Set the texture the next draw reads from.
    fn set_input(&mut self, input: SharedTextureView);

    /// Record one draw of this stage into `target`.
    fn draw(&mut self, ctx: &StageContext, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView);

    /// Drop GPU resources. Further draws are ignored.
    fn release(&mut self);
}
