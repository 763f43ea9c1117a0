//! The context: owner of the reference table, the target registry and
//! the diagnostic log sink.
//!
//! Object lifetime follows two counts per reference. External counts
//! belong to application handles, internal counts to framework
//! ownership (node bindings, delay slots, pyramid levels, attached
//! child graphs). An object is destroyed exactly when both reach zero,
//! and destruction cascades through the internal holds it was keeping.

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::core::error::{Result, VxError};
use crate::core::kernel::{Kernel, KernelBuilder, KernelCall, ValidateCall};
use crate::core::meta::MetaFormat;
use crate::core::node::NodeState;
use crate::core::objects::delay;
use crate::core::reference::{
    CountKind, Entry, RefHeader, RefId, RefTable, Scope, VxObject,
};
use crate::core::target::{HostTarget, TargetRegistry};
use crate::core::types::{Action, RefKind};
use crate::core::zones::{self, zlog, Zone};

/// One diagnostic record delivered to the registered log callback.
pub struct LogEntry {
    pub reference: Option<RefId>,
    pub status: &'static str,
    pub message: String,
}

pub type LogCallback = Box<dyn Fn(&LogEntry) + Send>;

pub(crate) struct ContextInner {
    refs: Mutex<RefTable>,
    targets: Mutex<TargetRegistry>,
    log: Mutex<Option<LogCallback>>,
}

/// Cheaply cloneable handle to the shared context state.
#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Arc<ContextInner>,
}

impl Context {
    pub fn new() -> Result<Self> {
        zones::init_from_env();
        let mut targets = TargetRegistry::new();
        targets.add(Box::new(HostTarget::new()));
        let ctx = Self {
            inner: Arc::new(ContextInner {
                refs: Mutex::new(RefTable::new()),
                targets: Mutex::new(targets),
                log: Mutex::new(None),
            }),
        };
        zlog!(Zone::Context, kernels = ctx.unique_kernel_count(), "context created");
        Ok(ctx)
    }

    pub(crate) fn refs(&self) -> MutexGuard<'_, RefTable> {
        self.inner.refs.lock()
    }

    fn targets(&self) -> MutexGuard<'_, TargetRegistry> {
        self.inner.targets.lock()
    }

    /// Insert a freshly created object owned by one application handle.
    pub(crate) fn insert_object(&self, mut header: RefHeader, object: VxObject) -> RefId {
        header.external_count = 1;
        self.refs().insert(header, object)
    }

    pub(crate) fn retain_id(&self, id: RefId, kind: CountKind) -> Result<()> {
        let mut refs = self.refs();
        *refs.get_mut(id)?.header.count_mut(kind) += 1;
        Ok(())
    }

    pub(crate) fn release_id(&self, id: RefId, kind: CountKind) -> Result<()> {
        let mut refs = self.refs();
        release_locked(&mut refs, id, kind)
    }

    pub(crate) fn check_kind(&self, id: RefId, kind: RefKind) -> Result<()> {
        let refs = self.refs();
        let actual = refs.get(id)?.object.kind();
        if actual != kind {
            return Err(VxError::InvalidType(format!("{id} is a {actual}, expected {kind}")));
        }
        Ok(())
    }

    pub(crate) fn ref_kind(&self, id: RefId) -> Result<RefKind> {
        Ok(self.refs().get(id)?.object.kind())
    }

    pub(crate) fn ref_is_virtual(&self, id: RefId) -> Result<bool> {
        Ok(self.refs().get(id)?.header.is_virtual)
    }

    pub(crate) fn virtual_scope_matches(&self, id: RefId, graph: RefId) -> Result<bool> {
        Ok(matches!(self.refs().get(id)?.header.scope, Scope::Graph(g) if g == graph))
    }

    pub(crate) fn ref_counts(&self, id: RefId) -> Result<(u32, u32)> {
        let refs = self.refs();
        let header = &refs.get(id)?.header;
        Ok((header.external_count, header.internal_count))
    }

    pub(crate) fn set_ref_name(&self, id: RefId, name: &str) -> Result<()> {
        self.refs().get_mut(id)?.header.name = Some(name.to_string());
        Ok(())
    }

    pub(crate) fn ref_name(&self, id: RefId) -> Result<Option<String>> {
        Ok(self.refs().get(id)?.header.name.clone())
    }

    pub(crate) fn note_read(&self, id: RefId) -> Result<()> {
        self.refs().get_mut(id)?.header.read_count += 1;
        Ok(())
    }

    /// External write bookkeeping: bump the write count and mark every
    /// reading graph for re-verification.
    pub(crate) fn note_write(&self, id: RefId) -> Result<()> {
        self.refs().get_mut(id)?.header.write_count += 1;
        self.contaminate(id);
        Ok(())
    }

    /// Total live objects, graphs included. Mostly useful for leak
    /// checks in tests and shutdown diagnostics.
    pub fn live_references(&self) -> usize {
        self.refs().live_count()
    }

    pub fn register_log_callback(&self, callback: impl Fn(&LogEntry) + Send + 'static) {
        *self.inner.log.lock() = Some(Box::new(callback));
    }

    pub fn clear_log_callback(&self) {
        *self.inner.log.lock() = None;
    }

    pub(crate) fn report(&self, reference: Option<RefId>, error: &VxError, message: &str) {
        tracing::error!(reference = ?reference, status = error.kind_name(), "{message}: {error}");
        if let Some(callback) = self.inner.log.lock().as_ref() {
            callback(&LogEntry {
                reference,
                status: error.kind_name(),
                message: format!("{message}: {error}"),
            });
        }
    }

    pub fn kernel_by_name(&self, name: &str) -> Result<Arc<Kernel>> {
        self.targets()
            .kernel_by_name(name)
            .ok_or_else(|| VxError::NotSupported(format!("kernel {name}")))
    }

    pub fn kernel_by_enum(&self, enumeration: u32) -> Result<Arc<Kernel>> {
        self.targets()
            .kernel_by_enum(enumeration)
            .ok_or_else(|| VxError::NotSupported(format!("kernel 0x{enumeration:x}")))
    }

    pub fn unique_kernel_count(&self) -> usize {
        self.targets().unique_kernel_count()
    }

    /// Begin registering a user kernel. Finalizing the returned builder
    /// adds it to the host target.
    pub fn add_kernel(
        &self,
        name: &str,
        enumeration: u32,
        param_count: usize,
        func: impl Fn(&mut KernelCall<'_>) -> Result<()> + Send + Sync + 'static,
        validate_input: impl Fn(&ValidateCall<'_>, usize) -> Result<()> + Send + Sync + 'static,
        validate_output: impl Fn(&ValidateCall<'_>, usize, &mut MetaFormat) -> Result<()>
            + Send
            + Sync
            + 'static,
    ) -> KernelBuilder {
        KernelBuilder::new(
            self.clone(),
            name,
            enumeration,
            param_count,
            func,
            validate_input,
            validate_output,
        )
    }

    pub(crate) fn register_kernel(&self, kernel: Arc<Kernel>) -> Result<()> {
        self.targets().host_mut()?.add_kernel(kernel)
    }

    /// Load a target plugin library, returning the target's name.
    pub fn load_target(&self, path: impl AsRef<Path>) -> Result<String> {
        self.targets().load(path.as_ref())
    }

    pub(crate) fn target_index_for(&self, kernel_name: &str) -> Result<usize> {
        self.targets()
            .index_supporting(kernel_name)
            .ok_or_else(|| VxError::NotSupported(format!("no target carries {kernel_name}")))
    }

    pub(crate) fn target_name(&self, index: usize) -> Result<String> {
        self.targets().name_of(index)
    }

    pub(crate) fn target_verify_node(&self, node: &NodeState) -> Result<()> {
        self.targets().get(node.affinity)?.verify_node(self, node)
    }

    pub(crate) fn target_process_node(&self, index: usize, node: &mut NodeState) -> Result<Action> {
        self.targets().get(node.affinity)?.process_node(self, index, node)
    }

    /// Apply an output validator's meta to the bound object: virtual
    /// objects adopt the shape, concrete objects must already match.
    pub(crate) fn apply_meta(&self, graph: RefId, id: RefId, meta: &MetaFormat) -> Result<()> {
        let mut refs = self.refs();
        let Entry { header, object } = refs.get_mut(id)?;
        if header.is_virtual && !matches!(header.scope, Scope::Graph(g) if g == graph) {
            return Err(VxError::InvalidScope(format!("{id} is virtual in another graph")));
        }
        match (object, meta) {
            (VxObject::Image(img), MetaFormat::Image { width, height, format }) => {
                if header.is_virtual && img.is_unresolved() {
                    if img.width != 0 && img.width != *width
                        || img.height != 0 && img.height != *height
                    {
                        return Err(VxError::InvalidDimension(format!(
                            "virtual image fixed at {}x{}, kernel wants {width}x{height}",
                            img.width, img.height
                        )));
                    }
                    if img.format != crate::core::types::ImageFormat::Virt && img.format != *format
                    {
                        return Err(VxError::InvalidFormat(format!(
                            "virtual image fixed as {:?}, kernel wants {format:?}",
                            img.format
                        )));
                    }
                    img.reshape(*width, *height, *format);
                } else {
                    if img.width != *width || img.height != *height {
                        return Err(VxError::InvalidDimension(format!(
                            "{}x{} image where the kernel writes {width}x{height}",
                            img.width, img.height
                        )));
                    }
                    if img.format != *format {
                        return Err(VxError::InvalidFormat(format!(
                            "{:?} image where the kernel writes {format:?}",
                            img.format
                        )));
                    }
                }
            }
            (VxObject::Array(arr), MetaFormat::Array { item_type, capacity }) => {
                if header.is_virtual && arr.item_type.is_none() {
                    arr.item_type = Some(*item_type);
                    if arr.capacity == 0 {
                        arr.capacity = *capacity;
                    }
                } else {
                    if arr.item_type != Some(*item_type) {
                        return Err(VxError::InvalidType(format!(
                            "{:?} array where the kernel writes {item_type:?}",
                            arr.item_type
                        )));
                    }
                    if arr.capacity < *capacity {
                        return Err(VxError::InvalidDimension(format!(
                            "array capacity {} below the required {capacity}",
                            arr.capacity
                        )));
                    }
                }
            }
            (VxObject::Scalar(s), MetaFormat::Scalar { data_type }) => {
                if s.value.data_type() != *data_type {
                    return Err(VxError::InvalidType(format!(
                        "{:?} scalar where the kernel writes {data_type:?}",
                        s.value.data_type()
                    )));
                }
            }
            (VxObject::Distribution(d), MetaFormat::Distribution { bins, offset, range }) => {
                if d.bins != *bins || d.offset != *offset || d.range != *range {
                    return Err(VxError::InvalidDimension(format!(
                        "{} bins over [{}, +{}) where the kernel writes {bins} over [{offset}, +{range})",
                        d.bins, d.offset, d.range
                    )));
                }
            }
            (VxObject::Pyramid(p), MetaFormat::Pyramid { levels, scale, width, height, format }) => {
                if p.levels.len() != *levels || p.scale != *scale {
                    return Err(VxError::InvalidDimension(format!(
                        "{}-level pyramid where the kernel writes {levels} levels",
                        p.levels.len()
                    )));
                }
                if p.width != *width || p.height != *height || p.format != *format {
                    return Err(VxError::InvalidFormat(format!(
                        "{}x{} {:?} pyramid where the kernel writes {width}x{height} {format:?}",
                        p.width, p.height, p.format
                    )));
                }
            }
            (object, _) => {
                return Err(VxError::InvalidType(format!(
                    "meta kind mismatch on a {} parameter",
                    object.kind()
                )));
            }
        }
        Ok(())
    }

    /// Graph allocation phase: commit backing memory for one object.
    pub(crate) fn allocate_object(&self, id: RefId) -> Result<()> {
        let mut refs = self.refs();
        let level_ids = {
            let entry = refs.get_mut(id)?;
            match &mut entry.object {
                VxObject::Image(img) => {
                    if img.is_unresolved() {
                        return Err(VxError::InvalidFormat(format!(
                            "{id} never resolved to a concrete image"
                        )));
                    }
                    img.memory.allocate()?;
                    return Ok(());
                }
                VxObject::Matrix(m) => {
                    m.memory.allocate()?;
                    return Ok(());
                }
                VxObject::Convolution(c) => {
                    c.memory.allocate()?;
                    return Ok(());
                }
                VxObject::Distribution(d) => {
                    d.memory.allocate()?;
                    return Ok(());
                }
                VxObject::Lut(l) => {
                    l.memory.allocate()?;
                    return Ok(());
                }
                VxObject::Remap(r) => {
                    r.memory.allocate()?;
                    return Ok(());
                }
                VxObject::Array(a) => {
                    let Some(item_type) = a.item_type else {
                        return Err(VxError::InvalidType(format!(
                            "{id} never resolved to a concrete array"
                        )));
                    };
                    let wanted = a.capacity * item_type.size();
                    let missing = wanted.saturating_sub(a.data.capacity());
                    a.data
                        .try_reserve_exact(missing)
                        .map_err(|_| VxError::NoMemory(format!("array of {wanted} bytes")))?;
                    return Ok(());
                }
                VxObject::Pyramid(p) => p.levels.clone(),
                VxObject::Scalar(_)
                | VxObject::Threshold(_)
                | VxObject::Delay(_)
                | VxObject::Graph(_) => return Ok(()),
            }
        };
        for level in level_ids {
            refs.get_mut(level)?.object.as_image_mut()?.memory.allocate()?;
        }
        Ok(())
    }
}

/// Decrement one count and run the cascading destructor at zero total.
/// Callers hold the table lock.
pub(crate) fn release_locked(table: &mut RefTable, id: RefId, kind: CountKind) -> Result<()> {
    let header = &mut table.get_mut(id)?.header;
    let count = header.count_mut(kind);
    if *count == 0 {
        return Err(VxError::Failure(format!("{id} released below zero")));
    }
    *count -= 1;
    if header.total() > 0 {
        return Ok(());
    }
    let entry = table.remove(id)?;
    destroy_entry(table, id, entry)
}

fn destroy_entry(table: &mut RefTable, id: RefId, entry: Entry) -> Result<()> {
    zlog!(Zone::Reference, reference = %id, kind = %entry.header.kind, "destroyed");
    match entry.object {
        VxObject::Graph(arc) => {
            let mut graph = arc.lock();
            let indices: Vec<usize> = (0..graph.nodes.len()).collect();
            for n in indices {
                if let Some(node) = graph.nodes[n].take() {
                    destroy_node_bindings(table, id, n, node)?;
                }
            }
        }
        VxObject::Delay(delay) => {
            for slot in delay.slots {
                release_locked(table, slot, CountKind::Internal)?;
            }
        }
        VxObject::Pyramid(pyramid) => {
            for level in pyramid.levels {
                release_locked(table, level, CountKind::Internal)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn destroy_node_bindings(
    table: &mut RefTable,
    graph: RefId,
    node_index: usize,
    node: NodeState,
) -> Result<()> {
    for (i, param) in node.parameters.iter().enumerate() {
        let Some(target) = *param else { continue };
        if let Some(delay_id) = delay::note_unbind(table, target, graph, node_index, i)? {
            release_locked(table, delay_id, CountKind::Internal)?;
        }
        release_locked(table, target, CountKind::Internal)?;
    }
    if let crate::core::node::NodeBody::Composite(child) = node.body {
        release_locked(table, child, CountKind::Internal)?;
    }
    Ok(())
}
