//! Composite edge detector.
//!
//! The kernel itself never runs. Its initialize hook expands into a
//! child graph of gaussian blur, sobel gradients and gradient
//! magnitude, wired through graph-scoped virtual images, and the node
//! executes by processing that child graph.

use crate::core::error::Result;
use crate::core::kernel::{InitCall, KernelCall, KernelDescription, ParamSlot, ValidateCall};
use crate::core::meta::MetaFormat;
use crate::core::objects::image::Image;
use crate::core::types::{Direction, ImageFormat, ParamState, RefKind};

use super::{expect_u8, gaussian3x3_node, magnitude_node, meta_like, sobel3x3_node, KERNEL_EDGE};

fn edge_kernel(_call: &mut KernelCall<'_>) -> Result<()> {
    // Replaced by the child graph attached at initialization.
    Ok(())
}

fn edge_initialize(call: &mut InitCall<'_>) -> Result<()> {
    let ctx = call.context().clone();
    let input_id = call.param(0)?;
    let output_id = call.param(1)?;
    let (width, height) = ctx.with_image(input_id, |img| Ok((img.width, img.height)))?;

    let child = ctx.create_graph()?;
    let input = Image::from_parts(ctx.clone(), input_id);
    let output = Image::from_parts(ctx.clone(), output_id);
    let blurred = ctx.create_virtual_image(&child, width, height, ImageFormat::U8)?;
    let grad_x = ctx.create_virtual_image(&child, width, height, ImageFormat::S16)?;
    let grad_y = ctx.create_virtual_image(&child, width, height, ImageFormat::S16)?;

    gaussian3x3_node(&child, &input, &blurred)?;
    sobel3x3_node(&child, &blurred, Some(&grad_x), Some(&grad_y))?;
    magnitude_node(&child, &grad_x, &grad_y, &output)?;

    // The node bindings hold the intermediates from here on.
    blurred.release()?;
    grad_x.release()?;
    grad_y.release()?;

    child.verify()?;
    call.set_child_graph(child)
}

fn validate_input(call: &ValidateCall<'_>, index: usize) -> Result<()> {
    match index {
        0 => expect_u8(call, index),
        _ => call.param(index).map(|_| ()),
    }
}

fn validate_output(call: &ValidateCall<'_>, _index: usize, meta: &mut MetaFormat) -> Result<()> {
    *meta = meta_like(call, 0, ImageFormat::S16)?;
    Ok(())
}

inventory::submit! {
    KernelDescription {
        enumeration: KERNEL_EDGE,
        name: "org.visionflow.edge",
        params: &[
            ParamSlot::new(Direction::Input, RefKind::Image, ParamState::Required),
            ParamSlot::new(Direction::Output, RefKind::Image, ParamState::Required),
        ],
        func: edge_kernel,
        validate_input,
        validate_output,
        initialize: Some(edge_initialize),
        deinitialize: None,
    }
}
