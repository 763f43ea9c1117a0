//! Execution targets.
//!
//! A target owns a set of kernel implementations and runs nodes placed
//! on it. The built-in host target executes kernels in-process; extra
//! targets load from shared libraries that export a
//! `VISIONFLOW_TARGET` declaration.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use libloading::Library;

use crate::core::context::Context;
use crate::core::error::{Result, VxError};
use crate::core::kernel::{Kernel, KernelCall, KernelDescription};
use crate::core::node::NodeState;
use crate::core::types::Action;
use crate::core::zones::{zlog, Zone};

/// Bumped whenever the `Target` trait or declaration layout changes.
pub const TARGET_ABI_VERSION: u32 = 1;

pub trait Target: Send {
    fn name(&self) -> &str;

    /// Lower values win kernel lookups when several targets carry the
    /// same kernel.
    fn priority(&self) -> u32 {
        100
    }

    fn kernels(&self) -> Vec<Arc<Kernel>>;

    fn kernel_by_name(&self, name: &str) -> Option<Arc<Kernel>>;

    fn kernel_by_enum(&self, enumeration: u32) -> Option<Arc<Kernel>>;

    fn add_kernel(&mut self, kernel: Arc<Kernel>) -> Result<()>;

    /// Per-node verification hook, run after the framework checks.
    fn verify_node(&self, ctx: &Context, node: &NodeState) -> Result<()> {
        let _ = (ctx, node);
        Ok(())
    }

    fn process_node(&self, ctx: &Context, index: usize, node: &mut NodeState) -> Result<Action>;
}

/// Declaration exported by target plugins under the
/// `VISIONFLOW_TARGET` symbol.
#[repr(C)]
pub struct TargetDeclaration {
    pub abi_version: u32,
    pub create: fn() -> Box<dyn Target>,
}

/// Standard primitive-node execution: capture timing, run the kernel,
/// record the outcome on the node. Plugin targets that execute
/// in-process reuse this.
pub fn execute_primitive(ctx: &Context, index: usize, node: &mut NodeState) -> Result<Action> {
    node.perf.start();
    let mut call =
        KernelCall { ctx, border: node.border, params: node.parameters.clone() };
    let result = (node.kernel.func)(&mut call);
    node.perf.stop();
    node.executed = true;
    match result {
        Ok(()) => {
            node.last_status = None;
            zlog!(Zone::Kernel, node = index, kernel = %node.kernel.name, "kernel done");
            Ok(Action::Continue)
        }
        Err(e) => {
            node.last_status = Some(e.to_string());
            tracing::error!(node = index, kernel = %node.kernel.name, error = %e, "kernel failed");
            Err(e)
        }
    }
}

/// In-process target seeded with every statically registered kernel.
pub struct HostTarget {
    kernels: Vec<Arc<Kernel>>,
}

impl HostTarget {
    pub fn new() -> Self {
        let kernels = inventory::iter::<KernelDescription>
            .into_iter()
            .map(|d| Arc::new(Kernel::from_description(d)))
            .collect();
        Self { kernels }
    }
}

impl Default for HostTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl Target for HostTarget {
    fn name(&self) -> &str {
        "visionflow.host"
    }

    fn priority(&self) -> u32 {
        0
    }

    fn kernels(&self) -> Vec<Arc<Kernel>> {
        self.kernels.clone()
    }

    fn kernel_by_name(&self, name: &str) -> Option<Arc<Kernel>> {
        self.kernels.iter().find(|k| k.name == name).cloned()
    }

    fn kernel_by_enum(&self, enumeration: u32) -> Option<Arc<Kernel>> {
        self.kernels.iter().find(|k| k.enumeration == enumeration).cloned()
    }

    fn add_kernel(&mut self, kernel: Arc<Kernel>) -> Result<()> {
        if self.kernels.iter().any(|k| k.name == kernel.name || k.enumeration == kernel.enumeration)
        {
            return Err(VxError::InvalidParameters(format!(
                "kernel {} (0x{:x}) is already registered",
                kernel.name, kernel.enumeration
            )));
        }
        self.kernels.push(kernel);
        Ok(())
    }

    fn process_node(&self, ctx: &Context, index: usize, node: &mut NodeState) -> Result<Action> {
        execute_primitive(ctx, index, node)
    }
}

/// Targets in priority order, plus the libraries backing loaded ones.
/// Libraries stay alive for the registry's lifetime so plugin code is
/// never unmapped under a live target.
pub(crate) struct TargetRegistry {
    targets: Vec<Box<dyn Target>>,
    libraries: Vec<Library>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self { targets: Vec::new(), libraries: Vec::new() }
    }

    pub fn add(&mut self, target: Box<dyn Target>) {
        self.targets.push(target);
        self.targets.sort_by_key(|t| t.priority());
    }

    pub fn get(&self, index: usize) -> Result<&dyn Target> {
        self.targets
            .get(index)
            .map(Box::as_ref)
            .ok_or_else(|| VxError::NoResources(format!("target {index}")))
    }

    pub fn host_mut(&mut self) -> Result<&mut Box<dyn Target>> {
        self.targets
            .iter_mut()
            .find(|t| t.name() == "visionflow.host")
            .ok_or_else(|| VxError::NoResources("host target missing".into()))
    }

    pub fn kernel_by_name(&self, name: &str) -> Option<Arc<Kernel>> {
        self.targets.iter().find_map(|t| t.kernel_by_name(name))
    }

    pub fn kernel_by_enum(&self, enumeration: u32) -> Option<Arc<Kernel>> {
        self.targets.iter().find_map(|t| t.kernel_by_enum(enumeration))
    }

    pub fn index_supporting(&self, kernel_name: &str) -> Option<usize> {
        self.targets.iter().position(|t| t.kernel_by_name(kernel_name).is_some())
    }

    pub fn name_of(&self, index: usize) -> Result<String> {
        Ok(self.get(index)?.name().to_string())
    }

    /// Count distinct kernel names across all targets.
    pub fn unique_kernel_count(&self) -> usize {
        self.targets
            .iter()
            .flat_map(|t| t.kernels())
            .map(|k| k.name.clone())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Load a target plugin. The library must export a
    /// `VISIONFLOW_TARGET` static of [`TargetDeclaration`] with a
    /// matching ABI version.
    pub fn load(&mut self, path: &Path) -> Result<String> {
        let library = unsafe { Library::new(path) }.map_err(|e| {
            VxError::NoResources(format!("loading target {}: {e}", path.display()))
        })?;
        let decl: &TargetDeclaration = unsafe {
            let symbol = library
                .get::<*const TargetDeclaration>(b"VISIONFLOW_TARGET\0")
                .map_err(|e| {
                    VxError::NoResources(format!(
                        "{} exports no target declaration: {e}",
                        path.display()
                    ))
                })?;
            &**symbol
        };
        let (abi_version, create) = (decl.abi_version, decl.create);
        if abi_version != TARGET_ABI_VERSION {
            return Err(VxError::NotSupported(format!(
                "target ABI {abi_version} (host speaks {TARGET_ABI_VERSION})"
            )));
        }
        let target = create();
        let name = target.name().to_string();
        zlog!(Zone::Target, target = %name, path = %path.display(), "target loaded");
        self.add(target);
        self.libraries.push(library);
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_target_carries_builtin_kernels() {
        let host = HostTarget::new();
        assert!(host.kernel_by_name("org.visionflow.copy").is_some());
        assert!(host.kernel_by_name("org.visionflow.missing").is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut host = HostTarget::new();
        let existing = host.kernel_by_name("org.visionflow.copy").unwrap();
        assert!(matches!(host.add_kernel(existing), Err(VxError::InvalidParameters(_))));
    }

    #[test]
    fn registry_resolves_by_priority_order() {
        let mut registry = TargetRegistry::new();
        registry.add(Box::new(HostTarget::new()));
        assert_eq!(registry.index_supporting("org.visionflow.copy"), Some(0));
        assert!(registry.kernel_by_enum(crate::kernels::KERNEL_COPY).is_some());
        assert_eq!(registry.name_of(0).unwrap(), "visionflow.host");
        assert!(registry.get(3).is_err());
    }

    fn make_host() -> Box<dyn Target> {
        Box::new(HostTarget::new())
    }

    // The loader sees the exported declaration as a raw pointer and
    // dereferences it in place; the static must survive that round
    // trip with its fields intact.
    #[test]
    fn declaration_reads_back_through_a_raw_pointer() {
        static DECL: TargetDeclaration =
            TargetDeclaration { abi_version: TARGET_ABI_VERSION, create: make_host };
        let ptr: *const TargetDeclaration = &DECL;
        let decl = unsafe { &*ptr };
        assert_eq!(decl.abi_version, TARGET_ABI_VERSION);
        assert_eq!((decl.create)().name(), "visionflow.host");
    }

    #[test]
    fn missing_library_reports_no_resources() {
        let mut registry = TargetRegistry::new();
        let err = registry.load(Path::new("/nonexistent/libvf_target.so")).unwrap_err();
        assert!(matches!(err, VxError::NoResources(_)));
    }
}
