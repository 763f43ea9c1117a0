//! Running accumulation into a bidirectional S16 image.

use crate::core::error::{Result, VxError};
use crate::core::kernel::{KernelCall, KernelDescription, ParamSlot, ValidateCall};
use crate::core::meta::MetaFormat;
use crate::core::types::{Direction, ParamState, RefKind};

use super::{expect_s16, expect_u8, KERNEL_ACCUMULATE};

fn accumulate_kernel(call: &mut KernelCall<'_>) -> Result<()> {
    let input = call.read_image(0)?;
    let mut accum = call.read_image(1)?;
    for y in 0..input.planes[0].dim_y {
        for x in 0..input.planes[0].dim_x {
            let sum = accum.planes[0].get_i16(x, y) as i32 + input.planes[0].get_u8(x, y) as i32;
            accum.planes[0].set_i16(x, y, sum.min(i16::MAX as i32) as i16);
        }
    }
    call.write_image(1, &accum)
}

fn validate_input(call: &ValidateCall<'_>, index: usize) -> Result<()> {
    match index {
        0 => expect_u8(call, 0),
        _ => {
            expect_s16(call, 1)?;
            let a = call.image_info(0)?;
            let b = call.image_info(1)?;
            if (a.width, a.height) != (b.width, b.height) {
                return Err(VxError::InvalidDimension(format!(
                    "accumulator is {}x{}, input is {}x{}",
                    b.width, b.height, a.width, a.height
                )));
            }
            Ok(())
        }
    }
}

fn validate_output(_call: &ValidateCall<'_>, _index: usize, _meta: &mut MetaFormat) -> Result<()> {
    // the accumulator is bidirectional; its shape is checked as an input
    Ok(())
}

inventory::submit! {
    KernelDescription {
        enumeration: KERNEL_ACCUMULATE,
        name: "org.visionflow.accumulate",
        params: &[
            ParamSlot::new(Direction::Input, RefKind::Image, ParamState::Required),
            ParamSlot::new(Direction::Bidirectional, RefKind::Image, ParamState::Required),
        ],
        func: accumulate_kernel,
        validate_input,
        validate_output,
        initialize: None,
        deinitialize: None,
    }
}
