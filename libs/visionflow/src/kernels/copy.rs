//! Byte-exact image copy.

use crate::core::error::{Result, VxError};
use crate::core::kernel::{KernelCall, KernelDescription, ParamSlot, ValidateCall};
use crate::core::meta::MetaFormat;
use crate::core::types::{Direction, ImageFormat, ParamState, RefKind};

use super::{meta_like, KERNEL_COPY};

fn copy_kernel(call: &mut KernelCall<'_>) -> Result<()> {
    let input = call.read_image(0)?;
    call.write_image(1, &input)
}

fn validate_input(call: &ValidateCall<'_>, index: usize) -> Result<()> {
    let info = call.image_info(index)?;
    if info.format == ImageFormat::Virt {
        return Err(VxError::InvalidFormat("copy input never resolved".into()));
    }
    Ok(())
}

fn validate_output(call: &ValidateCall<'_>, _index: usize, meta: &mut MetaFormat) -> Result<()> {
    let info = call.image_info(0)?;
    *meta = meta_like(call, 0, info.format)?;
    Ok(())
}

inventory::submit! {
    KernelDescription {
        enumeration: KERNEL_COPY,
        name: "org.visionflow.copy",
        params: &[
            ParamSlot::new(Direction::Input, RefKind::Image, ParamState::Required),
            ParamSlot::new(Direction::Output, RefKind::Image, ParamState::Required),
        ],
        func: copy_kernel,
        validate_input,
        validate_output,
        initialize: None,
        deinitialize: None,
    }
}
