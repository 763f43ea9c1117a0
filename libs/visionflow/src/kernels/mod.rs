//! Built-in kernel library.
//!
//! Each kernel registers a static [`KernelDescription`] through
//! `inventory`; the host target collects them at context creation. The
//! `*_node` helpers instantiate a kernel and bind its parameters in
//! one call.

pub mod accumulate;
pub mod convolve;
pub mod copy;
pub mod edge;
pub mod filter;
pub mod histogram;
pub mod lookup;
pub mod magnitude;
pub mod sobel;

use crate::core::error::{Result, VxError};
use crate::core::graph::Graph;
use crate::core::handles::AsReference;
use crate::core::kernel::ValidateCall;
use crate::core::meta::MetaFormat;
use crate::core::node::Node;
use crate::core::objects::convolution::Convolution;
use crate::core::objects::distribution::Distribution;
use crate::core::objects::image::{Image, PlaneData};
use crate::core::objects::lut::Lut;
use crate::core::objects::threshold::Threshold;
use crate::core::types::{BorderMode, ImageFormat};

pub const KERNEL_BASE: u32 = 0x1000;
pub const KERNEL_COPY: u32 = KERNEL_BASE + 0x1;
pub const KERNEL_BOX3X3: u32 = KERNEL_BASE + 0x2;
pub const KERNEL_GAUSSIAN3X3: u32 = KERNEL_BASE + 0x3;
pub const KERNEL_SOBEL3X3: u32 = KERNEL_BASE + 0x4;
pub const KERNEL_MAGNITUDE: u32 = KERNEL_BASE + 0x5;
pub const KERNEL_ACCUMULATE: u32 = KERNEL_BASE + 0x6;
pub const KERNEL_TABLE_LOOKUP: u32 = KERNEL_BASE + 0x7;
pub const KERNEL_THRESHOLD: u32 = KERNEL_BASE + 0x8;
pub const KERNEL_HISTOGRAM: u32 = KERNEL_BASE + 0x9;
pub const KERNEL_CONVOLVE: u32 = KERNEL_BASE + 0xa;
pub const KERNEL_EDGE: u32 = KERNEL_BASE + 0xb;

/// Input validator: the image must have resolved to U8 by the time the
/// node is checked.
pub(crate) fn expect_u8(call: &ValidateCall<'_>, index: usize) -> Result<()> {
    let info = call.image_info(index)?;
    if info.format != ImageFormat::U8 {
        return Err(VxError::InvalidFormat(format!(
            "parameter {index} is {:?}, expected U8",
            info.format
        )));
    }
    Ok(())
}

pub(crate) fn expect_s16(call: &ValidateCall<'_>, index: usize) -> Result<()> {
    let info = call.image_info(index)?;
    if info.format != ImageFormat::S16 {
        return Err(VxError::InvalidFormat(format!(
            "parameter {index} is {:?}, expected S16",
            info.format
        )));
    }
    Ok(())
}

/// Output meta shaped like the image at `input_index`, with the given
/// pixel format.
pub(crate) fn meta_like(
    call: &ValidateCall<'_>,
    input_index: usize,
    format: ImageFormat,
) -> Result<MetaFormat> {
    let info = call.image_info(input_index)?;
    Ok(MetaFormat::Image { width: info.width, height: info.height, format })
}

/// Border-aware single-plane read. `None` means the coordinate is
/// outside and the caller must skip the output pixel (undefined
/// border).
pub(crate) fn sample_u8(plane: &PlaneData, x: i64, y: i64, border: BorderMode) -> Option<i32> {
    let (w, h) = (plane.dim_x as i64, plane.dim_y as i64);
    if (0..w).contains(&x) && (0..h).contains(&y) {
        return Some(plane.get_u8(x as usize, y as usize) as i32);
    }
    match border {
        BorderMode::Undefined => None,
        BorderMode::Constant(c) => Some(c as i32),
        BorderMode::Replicate => {
            let cx = x.clamp(0, w - 1) as usize;
            let cy = y.clamp(0, h - 1) as usize;
            Some(plane.get_u8(cx, cy) as i32)
        }
    }
}

/// 3x3 weighted filter over a U8 plane with rounding division.
pub(crate) fn filter3x3_u8(
    input: &PlaneData,
    output: &mut PlaneData,
    border: BorderMode,
    taps: [i32; 9],
    div: i32,
) {
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
            let v = ((sum + div / 2) / div).clamp(0, 255) as u8;
            output.set_u8(x as usize, y as usize, v);
        }
    }
}

fn bind_all(node: &Node, params: &[(usize, &dyn AsReference)]) -> Result<Node> {
    for (index, object) in params {
        node.ctx.bind_node_parameter(node.graph, node.index, *index, Some(object.ref_id()), true)?;
    }
    Ok(node.clone())
}

pub fn copy_node(graph: &Graph, input: &Image, output: &Image) -> Result<Node> {
    let node = graph.create_node_by_name("org.visionflow.copy")?;
    bind_all(&node, &[(0, input), (1, output)])
}

pub fn box3x3_node(graph: &Graph, input: &Image, output: &Image) -> Result<Node> {
    let node = graph.create_node_by_name("org.visionflow.box3x3")?;
    bind_all(&node, &[(0, input), (1, output)])
}

pub fn gaussian3x3_node(graph: &Graph, input: &Image, output: &Image) -> Result<Node> {
    let node = graph.create_node_by_name("org.visionflow.gaussian3x3")?;
    bind_all(&node, &[(0, input), (1, output)])
}

/// Either gradient output may be omitted.
pub fn sobel3x3_node(
    graph: &Graph,
    input: &Image,
    grad_x: Option<&Image>,
    grad_y: Option<&Image>,
) -> Result<Node> {
    let node = graph.create_node_by_name("org.visionflow.sobel3x3")?;
    node.set_parameter(0, input)?;
    if let Some(gx) = grad_x {
        node.set_parameter(1, gx)?;
    }
    if let Some(gy) = grad_y {
        node.set_parameter(2, gy)?;
    }
    Ok(node)
}

pub fn magnitude_node(graph: &Graph, grad_x: &Image, grad_y: &Image, output: &Image) -> Result<Node> {
    let node = graph.create_node_by_name("org.visionflow.magnitude")?;
    bind_all(&node, &[(0, grad_x), (1, grad_y), (2, output)])
}

pub fn accumulate_node(graph: &Graph, input: &Image, accum: &Image) -> Result<Node> {
    let node = graph.create_node_by_name("org.visionflow.accumulate")?;
    bind_all(&node, &[(0, input), (1, accum)])
}

pub fn table_lookup_node(graph: &Graph, input: &Image, lut: &Lut, output: &Image) -> Result<Node> {
    let node = graph.create_node_by_name("org.visionflow.table_lookup")?;
    bind_all(&node, &[(0, input), (1, lut), (2, output)])
}

pub fn threshold_node(
    graph: &Graph,
    input: &Image,
    threshold: &Threshold,
    output: &Image,
) -> Result<Node> {
    let node = graph.create_node_by_name("org.visionflow.threshold")?;
    bind_all(&node, &[(0, input), (1, threshold), (2, output)])
}

pub fn histogram_node(graph: &Graph, input: &Image, dist: &Distribution) -> Result<Node> {
    let node = graph.create_node_by_name("org.visionflow.histogram")?;
    bind_all(&node, &[(0, input), (1, dist)])
}

pub fn convolve_node(
    graph: &Graph,
    input: &Image,
    conv: &Convolution,
    output: &Image,
) -> Result<Node> {
    let node = graph.create_node_by_name("org.visionflow.convolve")?;
    bind_all(&node, &[(0, input), (1, conv), (2, output)])
}

/// Composite edge detector: gaussian blur, sobel gradients, gradient
/// magnitude, expanded into a child graph at verification.
pub fn edge_node(graph: &Graph, input: &Image, output: &Image) -> Result<Node> {
    let node = graph.create_node_by_name("org.visionflow.edge")?;
    bind_all(&node, &[(0, input), (1, output)])
}
