// SPDX-License-Identifier: MPL-2.0

//! Preview rendering and draw-pass orchestration

mod worker;

pub use worker::{CameraOp, RenderConfig, RenderController};
