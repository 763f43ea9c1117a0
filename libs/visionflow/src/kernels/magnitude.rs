//! Gradient magnitude: sqrt(gx^2 + gy^2) over S16 planes, saturated.

use crate::core::error::{Result, VxError};
use crate::core::kernel::{KernelCall, KernelDescription, ParamSlot, ValidateCall};
use crate::core::meta::MetaFormat;
use crate::core::objects::image::ImageData;
use crate::core::types::{Direction, ImageFormat, ParamState, RefKind};

use super::{expect_s16, meta_like, KERNEL_MAGNITUDE};

fn magnitude_kernel(call: &mut KernelCall<'_>) -> Result<()> {
    let gx = call.read_image(0)?;
    let gy = call.read_image(1)?;
    let mut output = ImageData::new(gx.width, gx.height, ImageFormat::S16);
    for y in 0..gx.planes[0].dim_y {
        for x in 0..gx.planes[0].dim_x {
            let dx = gx.planes[0].get_i16(x, y) as f64;
            let dy = gy.planes[0].get_i16(x, y) as f64;
            let mag = (dx * dx + dy * dy).sqrt().round();
            output.planes[0].set_i16(x, y, mag.min(i16::MAX as f64) as i16);
        }
    }
    call.write_image(2, &output)
}

fn validate_input(call: &ValidateCall<'_>, index: usize) -> Result<()> {
    expect_s16(call, index)?;
    if index == 1 {
        let a = call.image_info(0)?;
        let b = call.image_info(1)?;
        if (a.width, a.height) != (b.width, b.height) {
            return Err(VxError::InvalidDimension(format!(
                "gradient planes disagree: {}x{} vs {}x{}",
                a.width, a.height, b.width, b.height
            )));
        }
    }
    Ok(())
}

fn validate_output(call: &ValidateCall<'_>, _index: usize, meta: &mut MetaFormat) -> Result<()> {
    *meta = meta_like(call, 0, ImageFormat::S16)?;
    Ok(())
}

inventory::submit! {
    KernelDescription {
        enumeration: KERNEL_MAGNITUDE,
        name: "org.visionflow.magnitude",
        params: &[
            ParamSlot::new(Direction::Input, RefKind::Image, ParamState::Required),
            ParamSlot::new(Direction::Input, RefKind::Image, ParamState::Required),
            ParamSlot::new(Direction::Output, RefKind::Image, ParamState::Required),
        ],
        func: magnitude_kernel,
        validate_input,
        validate_output,
        initialize: None,
        deinitialize: None,
    }
}
