// SPDX-License-Identifier: MPL-2.0

//! Ordered filter chain composited via ping-pong double buffering

use super::{FilterStage, SharedTextureView, StageContext};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Chain mutation queued from any thread, observed on the render thread
/// immediately before the next draw pass.
enum ChainOp {
    Add(Box<dyn FilterStage>),
    Replace(Box<dyn FilterStage>),
    Clear,
}

/// Cross-thread handle for mutating the chain.
///
/// Cloneable and sendable; every operation is a queued message that the
/// render thread applies in order, which keeps GPU object creation on the
/// owning thread.
#[derive(Clone)]
pub struct ChainHandle {
    pending: Arc<Mutex<VecDeque<ChainOp>>>,
}

impl ChainHandle {
    /// Append a filter to the end of the chain.
    pub fn add_filter(&self, stage: Box<dyn FilterStage>) {
        self.pending.lock().unwrap().push_back(ChainOp::Add(stage));
    }

    /// Replace the whole chain with a single filter. Clears any queued
    /// additions in the same step.
    pub fn replace_filter(&self, stage: Box<dyn FilterStage>) {
        let mut pending = self.pending.lock().unwrap();
        pending.clear();
        pending.push_back(ChainOp::Replace(stage));
    }

    /// Remove every filter, queued or active.
    pub fn clear(&self) {
        let mut pending = self.pending.lock().unwrap();
        pending.clear();
        pending.push_back(ChainOp::Clear);
    }
}

/// Where a compositing pass reads its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassInput {
    /// The chain's source texture (first stage only)
    Source,
    /// One of the two intermediate textures
    Intermediate(usize),
}

/// One planned compositing pass: read `input`, render into intermediate
/// `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PassPlan {
    pub input: PassInput,
    pub target: usize,
}

/// Plan the ping-pong passes for a chain of `n` stages.
pub(crate) fn plan_passes(n: usize) -> Vec<PassPlan> {
    (0..n)
        .map(|i| PassPlan {
            input: if i == 0 {
                PassInput::Source
            } else {
                PassInput::Intermediate((i - 1) % 2)
            },
            target: i % 2,
        })
        .collect()
}

/// The intermediate slot holding the final output of an `n`-stage chain,
/// or `None` for the empty chain (identity passthrough).
pub(crate) fn output_slot(n: usize) -> Option<usize> {
    n.checked_sub(1).map(|last| last % 2)
}

/// Result of a chain draw pass.
pub enum ChainOutput {
    /// No active filters; the source texture is the output, unmodified.
    /// Consumers must read the source directly rather than an intermediate.
    Passthrough,
    /// The chain composited into the returned texture view.
    Composited(SharedTextureView),
}

/// Ordered, mutable list of filter stages composited with two intermediate
/// textures. Owned by the render thread; mutations arrive through
/// [`ChainHandle`].
pub struct FilterChain {
    handle: ChainHandle,
    stages: Vec<Box<dyn FilterStage>>,
    intermediates: Option<[(wgpu::Texture, SharedTextureView); 2]>,
    size: (u32, u32),
}

impl FilterChain {
    pub fn new() -> Self {
        Self {
            handle: ChainHandle {
                pending: Arc::new(Mutex::new(VecDeque::new())),
            },
            stages: Vec::new(),
            intermediates: None,
            size: (0, 0),
        }
    }

    /// Handle for cross-thread chain mutation.
    pub fn handle(&self) -> ChainHandle {
        self.handle.clone()
    }

    /// Number of active stages (after the last drain).
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Recreate the two intermediate textures and resize every stage.
    pub fn resize(&mut self, ctx: &StageContext, width: u32, height: u32) {
        if width == 0 || height == 0 {
            warn!(width, height, "ignoring degenerate chain resize");
            return;
        }
        self.size = (width, height);
        self.intermediates = Some([
            Self::create_intermediate(ctx, width, height, 0),
            Self::create_intermediate(ctx, width, height, 1),
        ]);
        for stage in &mut self.stages {
            stage.resize(ctx, width, height);
        }
    }

    fn create_intermediate(
        ctx: &StageContext,
        width: u32,
        height: u32,
        index: usize,
    ) -> (wgpu::Texture, SharedTextureView) {
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(if index == 0 { "chain_ping" } else { "chain_pong" }),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: ctx.output_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = Arc::new(texture.create_view(&wgpu::TextureViewDescriptor::default()));
        (texture, view)
    }

    /// Move queued mutations into the active list. Runs on the render
    /// thread so newly added stages create their GPU objects there.
    fn drain_pending(&mut self, ctx: &StageContext) {
        let ops: Vec<ChainOp> = {
            let mut pending = self.handle.pending.lock().unwrap();
            pending.drain(..).collect()
        };
        for op in ops {
            match op {
                ChainOp::Add(mut stage) => {
                    stage.create(ctx);
                    if self.size != (0, 0) {
                        stage.resize(ctx, self.size.0, self.size.1);
                    }
                    self.stages.push(stage);
                }
                ChainOp::Replace(mut stage) => {
                    self.release_stages();
                    stage.create(ctx);
                    if self.size != (0, 0) {
                        stage.resize(ctx, self.size.0, self.size.1);
                    }
                    self.stages.push(stage);
                }
                ChainOp::Clear => self.release_stages(),
            }
        }
    }

    fn release_stages(&mut self) {
        for stage in &mut self.stages {
            stage.release();
        }
        self.stages.clear();
    }

    /// Run the chain over `source`.
    ///
    /// Drains the pending queue, then composites stage by stage, writing
    /// into intermediate `i % 2` and reading the previous pass's output.
    /// With no active stages the source passes through untouched.
    pub fn draw(
        &mut self,
        ctx: &StageContext,
        encoder: &mut wgpu::CommandEncoder,
        source: &SharedTextureView,
    ) -> ChainOutput {
        self.drain_pending(ctx);

        if self.stages.is_empty() {
            return ChainOutput::Passthrough;
        }
        let Some(intermediates) = self.intermediates.as_ref() else {
            warn!("chain drawn before resize, passing through");
            return ChainOutput::Passthrough;
        };

        let plans = plan_passes(self.stages.len());
        debug!(stages = self.stages.len(), "compositing filter chain");
        for (stage, plan) in self.stages.iter_mut().zip(&plans) {
            let input = match plan.input {
                PassInput::Source => Arc::clone(source),
                PassInput::Intermediate(slot) => Arc::clone(&intermediates[slot].1),
            };
            stage.set_input(input);
            stage.draw(ctx, encoder, &intermediates[plan.target].1);
        }

        let slot = output_slot(self.stages.len()).expect("non-empty chain has an output slot");
        ChainOutput::Composited(Arc::clone(&intermediates[slot].1))
    }

    /// Release every stage and the intermediate textures.
    pub fn release(&mut self) {
        self.handle.pending.lock().unwrap().clear();
        self.release_stages();
        self.intermediates = None;
        self.size = (0, 0);
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_chain_has_no_output_slot() {
        assert_eq!(output_slot(0), None);
    }

    #[test]
    fn test_output_slot_alternates_with_parity() {
        assert_eq!(output_slot(1), Some(0));
        assert_eq!(output_slot(2), Some(1));
        assert_eq!(output_slot(3), Some(0));
        assert_eq!(output_slot(4), Some(1));
        for n in 1..32 {
            assert_eq!(output_slot(n), Some((n - 1) % 2));
        }
    }

    #[test]
    fn test_single_stage_reads_source() {
        let plans = plan_passes(1);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].input, PassInput::Source);
        assert_eq!(plans[0].target, 0);
    }

    #[test]
    fn test_passes_ping_pong() {
        let plans = plan_passes(4);
        assert_eq!(
            plans,
            vec![
                PassPlan { input: PassInput::Source, target: 0 },
                PassPlan { input: PassInput::Intermediate(0), target: 1 },
                PassPlan { input: PassInput::Intermediate(1), target: 0 },
                PassPlan { input: PassInput::Intermediate(0), target: 1 },
            ]
        );
    }

    #[test]
    fn test_no_pass_reads_its_own_target() {
        for n in 0..16 {
            for plan in plan_passes(n) {
                if let PassInput::Intermediate(slot) = plan.input {
                    assert_ne!(slot, plan.target, "pass reads and writes the same texture");
                }
            }
        }
    }

    #[test]
    fn test_only_two_intermediates_ever_used() {
        for plan in plan_passes(64) {
            assert!(plan.target < 2);
            if let PassInput::Intermediate(slot) = plan.input {
                assert!(slot < 2);
            }
        }
    }
}
