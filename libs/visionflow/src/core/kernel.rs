//! Kernel abstraction: a named operation with a typed parameter
//! signature, shape validators run during graph verification, and an
//! optional initialize hook that can attach a child graph to make the
//! kernel composite.
//!
//! Built-in kernels register themselves through `inventory`; user
//! kernels go through [`KernelBuilder`].

use std::sync::Arc;

use crate::core::context::Context;
use crate::core::error::{Result, VxError};
use crate::core::graph::Graph;
use crate::core::meta::MetaFormat;
use crate::core::objects::image::ImageData;
use crate::core::objects::threshold::ThresholdKind;
use crate::core::reference::{CountKind, RefId};
use crate::core::types::{
    BorderMode, Direction, ImageFormat, ItemType, ParamState, RefKind, ScalarType, ScalarValue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSlot {
    pub direction: Direction,
    pub kind: RefKind,
    pub state: ParamState,
}

impl ParamSlot {
    pub const fn new(direction: Direction, kind: RefKind, state: ParamState) -> Self {
        Self { direction, kind, state }
    }
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub slots: Vec<ParamSlot>,
}

impl Signature {
    pub fn slot(&self, index: usize) -> Result<&ParamSlot> {
        self.slots
            .get(index)
            .ok_or_else(|| VxError::InvalidParameters(format!("parameter index {index}")))
    }
}

pub(crate) type KernelFunc = Arc<dyn Fn(&mut KernelCall<'_>) -> Result<()> + Send + Sync>;
pub(crate) type InputValidator = Arc<dyn Fn(&ValidateCall<'_>, usize) -> Result<()> + Send + Sync>;
pub(crate) type OutputValidator =
    Arc<dyn Fn(&ValidateCall<'_>, usize, &mut MetaFormat) -> Result<()> + Send + Sync>;
pub(crate) type InitFunc = Arc<dyn Fn(&mut InitCall<'_>) -> Result<()> + Send + Sync>;

pub struct Kernel {
    pub enumeration: u32,
    pub name: String,
    pub signature: Signature,
    pub(crate) func: KernelFunc,
    pub(crate) validate_input: InputValidator,
    pub(crate) validate_output: OutputValidator,
    pub(crate) initialize: Option<InitFunc>,
    pub(crate) deinitialize: Option<InitFunc>,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("enumeration", &self.enumeration)
            .field("name", &self.name)
            .field("params", &self.signature.slots.len())
            .finish()
    }
}

/// Statically registered kernel, collected at startup into the host
/// target.
pub struct KernelDescription {
    pub enumeration: u32,
    pub name: &'static str,
    pub params: &'static [ParamSlot],
    pub func: fn(&mut KernelCall<'_>) -> Result<()>,
    pub validate_input: fn(&ValidateCall<'_>, usize) -> Result<()>,
    pub validate_output: fn(&ValidateCall<'_>, usize, &mut MetaFormat) -> Result<()>,
    pub initialize: Option<fn(&mut InitCall<'_>) -> Result<()>>,
    pub deinitialize: Option<fn(&mut InitCall<'_>) -> Result<()>>,
}

inventory::collect!(KernelDescription);

impl Kernel {
    pub(crate) fn from_description(d: &KernelDescription) -> Kernel {
        Kernel {
            enumeration: d.enumeration,
            name: d.name.to_string(),
            signature: Signature { slots: d.params.to_vec() },
            func: Arc::new(d.func),
            validate_input: Arc::new(d.validate_input),
            validate_output: Arc::new(d.validate_output),
            initialize: d.initialize.map(|f| Arc::new(f) as InitFunc),
            deinitialize: d.deinitialize.map(|f| Arc::new(f) as InitFunc),
        }
    }
}

/// Shape snapshot of an image parameter, as seen by validators.
#[derive(Debug, Clone, Copy)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub is_virtual: bool,
}

/// Read-only view of a node's bindings for validators.
pub struct ValidateCall<'a> {
    pub(crate) ctx: &'a Context,
    pub(crate) params: &'a [Option<RefId>],
}

impl ValidateCall<'_> {
    pub fn is_bound(&self, index: usize) -> bool {
        self.params.get(index).is_some_and(Option::is_some)
    }

    pub fn param(&self, index: usize) -> Result<RefId> {
        self.params
            .get(index)
            .copied()
            .flatten()
            .ok_or_else(|| VxError::InvalidParameters(format!("parameter {index} is unbound")))
    }

    pub fn image_info(&self, index: usize) -> Result<ImageInfo> {
        let id = self.param(index)?;
        let is_virtual = self.ctx.ref_is_virtual(id)?;
        self.ctx.with_image(id, |img| {
            Ok(ImageInfo { width: img.width, height: img.height, format: img.format, is_virtual })
        })
    }

    pub fn scalar_type(&self, index: usize) -> Result<ScalarType> {
        let id = self.param(index)?;
        self.ctx.with_scalar(id, |s| Ok(s.value.data_type()))
    }

    pub fn scalar_value(&self, index: usize) -> Result<ScalarValue> {
        let id = self.param(index)?;
        self.ctx.with_scalar(id, |s| Ok(s.value))
    }

    pub fn array_info(&self, index: usize) -> Result<(Option<ItemType>, usize)> {
        let id = self.param(index)?;
        self.ctx.with_array(id, |a| Ok((a.item_type, a.capacity)))
    }

    pub fn convolution_dims(&self, index: usize) -> Result<(usize, usize)> {
        let id = self.param(index)?;
        self.ctx.with_convolution(id, |c| Ok((c.columns, c.rows)))
    }

    pub fn threshold_kind(&self, index: usize) -> Result<ThresholdKind> {
        let id = self.param(index)?;
        self.ctx.with_threshold(id, |t| Ok(t.kind))
    }

    pub fn distribution_info(&self, index: usize) -> Result<(usize, i32, u32)> {
        let id = self.param(index)?;
        self.ctx.with_distribution(id, |d| Ok((d.bins, d.offset, d.range)))
    }
}

/// Execution-time view of a node: bound parameters plus the node's
/// border policy. All data moves by copy through the context.
pub struct KernelCall<'a> {
    pub(crate) ctx: &'a Context,
    pub(crate) border: BorderMode,
    pub(crate) params: Vec<Option<RefId>>,
}

impl KernelCall<'_> {
    pub fn context(&self) -> &Context {
        self.ctx
    }

    pub fn border(&self) -> BorderMode {
        self.border
    }

    pub fn is_bound(&self, index: usize) -> bool {
        self.params.get(index).is_some_and(Option::is_some)
    }

    pub fn param(&self, index: usize) -> Result<RefId> {
        self.params
            .get(index)
            .copied()
            .flatten()
            .ok_or_else(|| VxError::InvalidParameters(format!("parameter {index} is unbound")))
    }

    pub fn read_image(&self, index: usize) -> Result<ImageData> {
        self.ctx.read_image_data(self.param(index)?)
    }

    pub fn write_image(&self, index: usize, data: &ImageData) -> Result<()> {
        self.ctx.write_image_data(self.param(index)?, data)
    }

    pub fn read_scalar(&self, index: usize) -> Result<ScalarValue> {
        self.ctx.read_scalar_value(self.param(index)?)
    }

    pub fn write_scalar(&self, index: usize, value: ScalarValue) -> Result<()> {
        self.ctx.write_scalar_value(self.param(index)?, value)
    }

    pub fn read_convolution(&self, index: usize) -> Result<(usize, usize, u32, Vec<i16>)> {
        let id = self.param(index)?;
        self.ctx.with_convolution_mut(id, |c, header| {
            header.read_count += 1;
            let coeffs = c.coefficients()?;
            Ok((c.columns, c.rows, c.scale, coeffs))
        })
    }

    pub fn read_lut(&self, index: usize) -> Result<Vec<u8>> {
        let id = self.param(index)?;
        self.ctx.with_lut_mut(id, |l, header| {
            l.memory.allocate()?;
            header.read_count += 1;
            Ok(l.memory.data(0)?.to_vec())
        })
    }

    pub fn read_threshold(&self, index: usize) -> Result<(ThresholdKind, i32, i32, i32, u8, u8)> {
        let id = self.param(index)?;
        self.ctx.with_threshold(id, |t| {
            Ok((t.kind, t.value, t.lower, t.upper, t.true_value, t.false_value))
        })
    }

    pub fn write_distribution(&self, index: usize, freqs: &[u32]) -> Result<()> {
        let id = self.param(index)?;
        self.ctx.with_distribution_mut(id, |d, header| {
            if freqs.len() != d.bins {
                return Err(VxError::InvalidParameters(format!(
                    "{} frequencies for {} bins",
                    freqs.len(),
                    d.bins
                )));
            }
            d.memory.allocate()?;
            let dst = d.memory.data_mut(0)?;
            for (i, v) in freqs.iter().enumerate() {
                dst[i * 4..i * 4 + 4].copy_from_slice(&v.to_ne_bytes());
            }
            header.write_count += 1;
            Ok(())
        })
    }

    pub fn distribution_info(&self, index: usize) -> Result<(usize, i32, u32)> {
        let id = self.param(index)?;
        self.ctx.with_distribution(id, |d| Ok((d.bins, d.offset, d.range)))
    }
}

/// Passed to initialize and deinitialize hooks. An initialize hook may
/// attach a verified child graph, turning the node composite.
pub struct InitCall<'a> {
    pub(crate) ctx: &'a Context,
    pub(crate) params: &'a [Option<RefId>],
    pub(crate) child: Option<RefId>,
}

impl InitCall<'_> {
    pub fn context(&self) -> &Context {
        self.ctx
    }

    pub fn param(&self, index: usize) -> Result<RefId> {
        self.params
            .get(index)
            .copied()
            .flatten()
            .ok_or_else(|| VxError::InvalidParameters(format!("parameter {index} is unbound")))
    }

    /// Hand the node ownership of a child graph. The handle's external
    /// count converts into an internal hold by the node.
    pub fn set_child_graph(&mut self, graph: Graph) -> Result<()> {
        let id = graph.id;
        self.ctx.retain_id(id, CountKind::Internal)?;
        self.ctx.release_id(id, CountKind::External)?;
        self.child = Some(id);
        Ok(())
    }
}

/// No-op validator for kernels whose slots need no extra checking
/// beyond the signature's kind check.
pub fn accept_any_input(_call: &ValidateCall<'_>, _index: usize) -> Result<()> {
    Ok(())
}

/// Staged registration of a user kernel: declare each parameter, then
/// finalize. Finalize fails unless every declared slot was filled.
pub struct KernelBuilder {
    ctx: Context,
    enumeration: u32,
    name: String,
    param_count: usize,
    slots: Vec<ParamSlot>,
    func: KernelFunc,
    validate_input: InputValidator,
    validate_output: OutputValidator,
    initialize: Option<InitFunc>,
    deinitialize: Option<InitFunc>,
}

impl KernelBuilder {
    pub(crate) fn new(
        ctx: Context,
        name: &str,
        enumeration: u32,
        param_count: usize,
        func: impl Fn(&mut KernelCall<'_>) -> Result<()> + Send + Sync + 'static,
        validate_input: impl Fn(&ValidateCall<'_>, usize) -> Result<()> + Send + Sync + 'static,
        validate_output: impl Fn(&ValidateCall<'_>, usize, &mut MetaFormat) -> Result<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            ctx,
            enumeration,
            name: name.to_string(),
            param_count,
            slots: Vec::new(),
            func: Arc::new(func),
            validate_input: Arc::new(validate_input),
            validate_output: Arc::new(validate_output),
            initialize: None,
            deinitialize: None,
        }
    }

    pub fn parameter(mut self, direction: Direction, kind: RefKind, state: ParamState) -> Self {
        self.slots.push(ParamSlot::new(direction, kind, state));
        self
    }

    pub fn on_initialize(
        mut self,
        f: impl Fn(&mut InitCall<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.initialize = Some(Arc::new(f));
        self
    }

    pub fn on_deinitialize(
        mut self,
        f: impl Fn(&mut InitCall<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.deinitialize = Some(Arc::new(f));
        self
    }

    pub fn finalize(self) -> Result<Arc<Kernel>> {
        if self.slots.len() != self.param_count {
            return Err(VxError::InvalidParameters(format!(
                "kernel {} declared {} of {} parameters",
                self.name,
                self.slots.len(),
                self.param_count
            )));
        }
        let kernel = Arc::new(Kernel {
            enumeration: self.enumeration,
            name: self.name,
            signature: Signature { slots: self.slots },
            func: self.func,
            validate_input: self.validate_input,
            validate_output: self.validate_output,
            initialize: self.initialize,
            deinitialize: self.deinitialize,
        });
        self.ctx.register_kernel(kernel.clone())?;
        Ok(kernel)
    }
}
