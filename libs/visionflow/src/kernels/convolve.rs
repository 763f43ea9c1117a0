//! Custom convolution of a U8 image with a user coefficient matrix.

use crate::core::error::Result;
use crate::core::kernel::{KernelCall, KernelDescription, ParamSlot, ValidateCall};
use crate::core::meta::MetaFormat;
use crate::core::objects::image::ImageData;
use crate::core::types::{Direction, ImageFormat, ParamState, RefKind};

use super::{expect_u8, meta_like, sample_u8, KERNEL_CONVOLVE};

fn convolve_kernel(call: &mut KernelCall<'_>) -> Result<()> {
    let input = call.read_image(0)?;
    let (cols, rows, scale, coeffs) = call.read_convolution(1)?;
    let mut output = ImageData::new(input.width, input.height, ImageFormat::S16);
    let border = call.border();
    let (half_x, half_y) = (cols as i64 / 2, rows as i64 / 2);
    let src = &input.planes[0];
    let dst = &mut output.planes[0];
    for y in 0..src.dim_y as i64 {
        'pixel: for x in 0..src.dim_x as i64 {
            let mut sum = 0i64;
            for ky in 0..rows as i64 {
                for kx in 0..cols as i64 {
                    // Convolution reads the neighbourhood mirrored
                    // against the coefficient matrix.
                    let Some(v) = sample_u8(src, x + half_x - kx, y + half_y - ky, border) else {
                        continue 'pixel;
                    };
                    let c = coeffs[(ky * cols as i64 + kx) as usize] as i64;
                    sum += v as i64 * c;
                }
            }
            let v = (sum / scale as i64).clamp(i16::MIN as i64, i16::MAX as i64) as i16;
            dst.set_i16(x as usize, y as usize, v);
        }
    }
    call.write_image(2, &output)
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
        enumeration: KERNEL_CONVOLVE,
        name: "org.visionflow.convolve",
        params: &[
            ParamSlot::new(Direction::Input, RefKind::Image, ParamState::Required),
            ParamSlot::new(Direction::Input, RefKind::Convolution, ParamState::Required),
            ParamSlot::new(Direction::Output, RefKind::Image, ParamState::Required),
        ],
        func: convolve_kernel,
        validate_input,
        validate_output,
        initialize: None,
        deinitialize: None,
    }
}
