//! 3x3 smoothing filters over U8 images.

use crate::core::error::Result;
use crate::core::kernel::{KernelCall, KernelDescription, ParamSlot, ValidateCall};
use crate::core::meta::MetaFormat;
use crate::core::objects::image::ImageData;
use crate::core::types::{Direction, ImageFormat, ParamState, RefKind};

use super::{expect_u8, filter3x3_u8, meta_like, KERNEL_BOX3X3, KERNEL_GAUSSIAN3X3};

const BOX_TAPS: [i32; 9] = [1, 1, 1, 1, 1, 1, 1, 1, 1];
const GAUSSIAN_TAPS: [i32; 9] = [1, 2, 1, 2, 4, 2, 1, 2, 1];

fn run_filter(call: &mut KernelCall<'_>, taps: [i32; 9], div: i32) -> Result<()> {
    let input = call.read_image(0)?;
    let mut output = ImageData::new(input.width, input.height, ImageFormat::U8);
    filter3x3_u8(&input.planes[0], &mut output.planes[0], call.border(), taps, div);
    call.write_image(1, &output)
}

fn box_kernel(call: &mut KernelCall<'_>) -> Result<()> {
    run_filter(call, BOX_TAPS, 9)
}

fn gaussian_kernel(call: &mut KernelCall<'_>) -> Result<()> {
    run_filter(call, GAUSSIAN_TAPS, 16)
}

fn validate_output(call: &ValidateCall<'_>, _index: usize, meta: &mut MetaFormat) -> Result<()> {
    *meta = meta_like(call, 0, ImageFormat::U8)?;
    Ok(())
}

const FILTER_PARAMS: &[ParamSlot] = &[
    ParamSlot::new(Direction::Input, RefKind::Image, ParamState::Required),
    ParamSlot::new(Direction::Output, RefKind::Image, ParamState::Required),
];

inventory::submit! {
    KernelDescription {
        enumeration: KERNEL_BOX3X3,
        name: "org.visionflow.box3x3",
        params: FILTER_PARAMS,
        func: box_kernel,
        validate_input: expect_u8,
        validate_output,
        initialize: None,
        deinitialize: None,
    }
}

inventory::submit! {
    KernelDescription {
        enumeration: KERNEL_GAUSSIAN3X3,
        name: "org.visionflow.gaussian3x3",
        params: FILTER_PARAMS,
        func: gaussian_kernel,
        validate_input: expect_u8,
        validate_output,
        initialize: None,
        deinitialize: None,
    }
}
