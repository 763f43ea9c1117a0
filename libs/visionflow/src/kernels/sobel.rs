//! 3x3 Sobel gradients: U8 input, S16 gradient planes. Either output
//! may be left unbound.

use crate::core::error::Result;
use crate::core::kernel::{KernelCall, KernelDescription, ParamSlot, ValidateCall};
use crate::core::meta::MetaFormat;
use crate::core::objects::image::{ImageData, PlaneData};
use crate::core::types::{BorderMode, Direction, ImageFormat, ParamState, RefKind};

use super::{expect_u8, meta_like, sample_u8, KERNEL_SOBEL3X3};

const SOBEL_X: [i32; 9] = [-1, 0, 1, -2, 0, 2, -1, 0, 1];
const SOBEL_Y: [i32; 9] = [-1, -2, -1, 0, 0, 0, 1, 2, 1];

fn gradient(input: &PlaneData, output: &mut PlaneData, border: BorderMode, taps: [i32; 9]) {
    for y in 0..input.dim_y as i64 {
        'pixel: for x in 0..input.dim_x as i64 {
            let mut sum = 0i32;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let Some(v) = sample_u8(input, x + dx, y + dy, border) else {
                        continue 'pixel;
                    };
                    sum += v * taps[((dy + 1) * 3 + dx + 1) as usize];
                }
            }
            let v = sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            output.set_i16(x as usize, y as usize, v);
        }
    }
}

fn sobel_kernel(call: &mut KernelCall<'_>) -> Result<()> {
    let input = call.read_image(0)?;
    for (index, taps) in [(1usize, SOBEL_X), (2, SOBEL_Y)] {
        if !call.is_bound(index) {
            continue;
        }
        let mut grad = ImageData::new(input.width, input.height, ImageFormat::S16);
        gradient(&input.planes[0], &mut grad.planes[0], call.border(), taps);
        call.write_image(index, &grad)?;
    }
    Ok(())
}

fn validate_output(call: &ValidateCall<'_>, _index: usize, meta: &mut MetaFormat) -> Result<()> {
    *meta = meta_like(call, 0, ImageFormat::S16)?;
    Ok(())
}

inventory::submit! {
    KernelDescription {
        enumeration: KERNEL_SOBEL3X3,
        name: "org.visionflow.sobel3x3",
        params: &[
            ParamSlot::new(Direction::Input, RefKind::Image, ParamState::Required),
            ParamSlot::new(Direction::Output, RefKind::Image, ParamState::Optional),
            ParamSlot::new(Direction::Output, RefKind::Image, ParamState::Optional),
        ],
        func: sobel_kernel,
        validate_input: expect_u8,
        validate_output,
        initialize: None,
        deinitialize: None,
    }
}
