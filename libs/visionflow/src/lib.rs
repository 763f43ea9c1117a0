//! visionflow: a dataflow graph engine for image processing pipelines.
//!
//! Applications build graphs of kernel nodes over shared data objects,
//! verify them once, and process them repeatedly. Verification derives
//! the execution order from data dependencies, resolves virtual
//! intermediates, and rejects malformed graphs; processing runs nodes
//! in dependency waves on their assigned targets.
//!
//! ```no_run
//! use visionflow::prelude::*;
//!
//! # fn main() -> visionflow::Result<()> {
//! let ctx = Context::new()?;
//! let src = ctx.create_image(640, 480, ImageFormat::U8)?;
//! let dst = ctx.create_image(640, 480, ImageFormat::U8)?;
//!
//! let graph = ctx.create_graph()?;
//! let blur = graph.create_node_by_name("org.visionflow.gaussian3x3")?;
//! blur.set_parameter(0, &src)?;
//! blur.set_parameter(1, &dst)?;
//!
//! graph.verify()?;
//! graph.process()?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod kernels;

pub mod prelude {
    pub use crate::core::context::{Context, LogEntry};
    pub use crate::core::error::{Result, VxError};
    pub use crate::core::graph::{Graph, GraphSnapshot};
    pub use crate::core::handles::{AsReference, Reference};
    pub use crate::core::kernel::{Kernel, KernelCall, ParamSlot, Signature, ValidateCall};
    pub use crate::core::meta::MetaFormat;
    pub use crate::core::node::{Node, NodeUpdate};
    pub use crate::core::objects::array::Array;
    pub use crate::core::objects::convolution::Convolution;
    pub use crate::core::objects::delay::Delay;
    pub use crate::core::objects::distribution::Distribution;
    pub use crate::core::objects::image::{AccessMode, Image, ImageData, ImagePatch};
    pub use crate::core::objects::lut::Lut;
    pub use crate::core::objects::matrix::Matrix;
    pub use crate::core::objects::pyramid::Pyramid;
    pub use crate::core::objects::remap::Remap;
    pub use crate::core::objects::scalar::Scalar;
    pub use crate::core::objects::threshold::{Threshold, ThresholdKind};
    pub use crate::core::types::{
        Action, BorderMode, Direction, ImageFormat, ItemType, ParamState, Rectangle, RefKind,
        ScalarType, ScalarValue,
    };
}

pub use crate::core::context::Context;
pub use crate::core::error::{Result, VxError};
