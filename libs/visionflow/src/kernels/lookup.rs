//! Pointwise table lookup and thresholding over U8 images.

use crate::core::error::Result;
use crate::core::kernel::{KernelCall, KernelDescription, ParamSlot, ValidateCall};
use crate::core::meta::MetaFormat;
use crate::core::objects::image::ImageData;
use crate::core::objects::threshold::ThresholdKind;
use crate::core::types::{Direction, ImageFormat, ParamState, RefKind};

use super::{expect_u8, meta_like, KERNEL_TABLE_LOOKUP, KERNEL_THRESHOLD};

fn table_lookup_kernel(call: &mut KernelCall<'_>) -> Result<()> {
    let input = call.read_image(0)?;
    let table = call.read_lut(1)?;
    let mut output = ImageData::new(input.width, input.height, ImageFormat::U8);
    for y in 0..input.planes[0].dim_y {
        for x in 0..input.planes[0].dim_x {
            output.planes[0].set_u8(x, y, table[input.planes[0].get_u8(x, y) as usize]);
        }
    }
    call.write_image(2, &output)
}

fn threshold_kernel(call: &mut KernelCall<'_>) -> Result<()> {
    let input = call.read_image(0)?;
    let (kind, value, lower, upper, true_value, false_value) = call.read_threshold(1)?;
    let mut output = ImageData::new(input.width, input.height, ImageFormat::U8);
    for y in 0..input.planes[0].dim_y {
        for x in 0..input.planes[0].dim_x {
            let p = input.planes[0].get_u8(x, y) as i32;
            let pass = match kind {
                ThresholdKind::Binary => p > value,
                ThresholdKind::Range => p >= lower && p <= upper,
            };
            output.planes[0].set_u8(x, y, if pass { true_value } else { false_value });
        }
    }
    call.write_image(2, &output)
}

fn lookup_validate_input(call: &ValidateCall<'_>, index: usize) -> Result<()> {
    if index == 0 {
        expect_u8(call, 0)?;
    } else {
        // the lookup table and threshold slots only need kind checks,
        // which the signature already provides
        call.param(index)?;
    }
    Ok(())
}

fn validate_output(call: &ValidateCall<'_>, _index: usize, meta: &mut MetaFormat) -> Result<()> {
    *meta = meta_like(call, 0, ImageFormat::U8)?;
    Ok(())
}

inventory::submit! {
    KernelDescription {
        enumeration: KERNEL_TABLE_LOOKUP,
        name: "org.visionflow.table_lookup",
        params: &[
            ParamSlot::new(Direction::Input, RefKind::Image, ParamState::Required),
            ParamSlot::new(Direction::Input, RefKind::Lut, ParamState::Required),
            ParamSlot::new(Direction::Output, RefKind::Image, ParamState::Required),
        ],
        func: table_lookup_kernel,
        validate_input: lookup_validate_input,
        validate_output,
        initialize: None,
        deinitialize: None,
    }
}

inventory::submit! {
    KernelDescription {
        enumeration: KERNEL_THRESHOLD,
        name: "org.visionflow.threshold",
        params: &[
            ParamSlot::new(Direction::Input, RefKind::Image, ParamState::Required),
            ParamSlot::new(Direction::Input, RefKind::Threshold, ParamState::Required),
            ParamSlot::new(Direction::Output, RefKind::Image, ParamState::Required),
        ],
        func: threshold_kernel,
        validate_input: lookup_validate_input,
        validate_output,
        initialize: None,
        deinitialize: None,
    }
}
