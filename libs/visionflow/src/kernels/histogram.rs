//! Intensity histogram of a U8 image.

use crate::core::error::Result;
use crate::core::kernel::{KernelCall, KernelDescription, ParamSlot, ValidateCall};
use crate::core::meta::MetaFormat;
use crate::core::types::{Direction, ParamState, RefKind};

use super::{expect_u8, KERNEL_HISTOGRAM};

fn histogram_kernel(call: &mut KernelCall<'_>) -> Result<()> {
    let input = call.read_image(0)?;
    let (bins, offset, range) = call.distribution_info(1)?;
    let mut freqs = vec![0u32; bins];
    let plane = &input.planes[0];
    for y in 0..plane.dim_y {
        for x in 0..plane.dim_x {
            let p = plane.get_u8(x, y) as i64;
            let rel = p - offset as i64;
            if (0..range as i64).contains(&rel) {
                let bin = (rel as usize * bins) / range as usize;
                freqs[bin] += 1;
            }
        }
    }
    call.write_distribution(1, &freqs)
}

fn validate_input(call: &ValidateCall<'_>, index: usize) -> Result<()> {
    match index {
        0 => expect_u8(call, index),
        _ => call.param(index).map(|_| ()),
    }
}

fn validate_output(call: &ValidateCall<'_>, index: usize, meta: &mut MetaFormat) -> Result<()> {
    // The distribution defines its own geometry; the meta echoes it so
    // verification rejects a rebind to a differently shaped one.
    let (bins, offset, range) = call.distribution_info(index)?;
    *meta = MetaFormat::Distribution { bins, offset, range };
    Ok(())
}

inventory::submit! {
    KernelDescription {
        enumeration: KERNEL_HISTOGRAM,
        name: "org.visionflow.histogram",
        params: &[
            ParamSlot::new(Direction::Input, RefKind::Image, ParamState::Required),
            ParamSlot::new(Direction::Output, RefKind::Distribution, ParamState::Required),
        ],
        func: histogram_kernel,
        validate_input,
        validate_output,
        initialize: None,
        deinitialize: None,
    }
}
