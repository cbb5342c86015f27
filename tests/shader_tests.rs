// SPDX-License-Identifier: MPL-2.0

//! Validate the built-in WGSL filter shaders

use naga::valid::{Capabilities, ValidationFlags, Validator};

fn validate(name: &str, source: &str) {
    let module = naga::front::wgsl::parse_str(source)
        .unwrap_or_else(|e| panic!("{} failed to parse: {:?}", name, e));
    Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .unwrap_or_else(|e| panic!("{} failed validation: {:?}", name, e));
}

#[test]
fn test_passthrough_shader_is_valid() {
    validate(
        "passthrough.wgsl",
        include_str!("../src/filters/shaders/passthrough.wgsl"),
    );
}

#[test]
fn test_grayscale_shader_is_valid() {
    validate(
        "grayscale.wgsl",
        include_str!("../src/filters/shaders/grayscale.wgsl"),
    );
}

#[test]
fn test_sepia_shader_is_valid() {
    validate(
        "sepia.wgsl",
        include_str!("../src/filters/shaders/sepia.wgsl"),
    );
}
