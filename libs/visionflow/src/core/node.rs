//! Nodes: kernel instances inside a graph.
//!
//! A node handle addresses (graph, slot index) rather than owning the
//! state; the state itself lives inside the graph behind its mutex.
//! Binding a parameter moves an internal count from the old object to
//! the new one and keeps delay associations in step.

use std::sync::Arc;
use std::time::Duration;

use crate::core::context::Context;
use crate::core::error::{Result, VxError};
use crate::core::graph::GraphState;
use crate::core::handles::{AsReference, Reference};
use crate::core::kernel::{InitCall, Kernel};
use crate::core::objects::delay;
use crate::core::perf::PerfCounter;
use crate::core::reference::{CountKind, RefId};
use crate::core::types::{Action, BorderMode, ParamState};
use crate::core::zones::{zlog, Zone};

/// Snapshot handed to a completion callback.
pub struct NodeUpdate<'a> {
    pub index: usize,
    pub kernel: &'a str,
}

pub(crate) type NodeCallback = Box<dyn Fn(&NodeUpdate<'_>) -> Action + Send>;

pub(crate) enum NodeBody {
    Primitive,
    /// Kernel expanded into a child graph by its initialize hook.
    Composite(RefId),
}

pub struct NodeState {
    pub(crate) kernel: Arc<Kernel>,
    pub(crate) parameters: Vec<Option<RefId>>,
    pub(crate) body: NodeBody,
    pub(crate) border: BorderMode,
    pub(crate) affinity: usize,
    pub(crate) callback: Option<NodeCallback>,
    pub(crate) executed: bool,
    pub(crate) visited: bool,
    pub(crate) initialized: bool,
    pub(crate) last_status: Option<String>,
    pub(crate) perf: PerfCounter,
}

impl NodeState {
    pub(crate) fn new(kernel: Arc<Kernel>, affinity: usize) -> Self {
        let params = kernel.signature.slots.len();
        Self {
            kernel,
            parameters: vec![None; params],
            body: NodeBody::Primitive,
            border: BorderMode::default(),
            affinity,
            callback: None,
            executed: false,
            visited: false,
            initialized: false,
            last_status: None,
            perf: PerfCounter::new(),
        }
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn border(&self) -> BorderMode {
        self.border
    }

    pub fn parameters(&self) -> &[Option<RefId>] {
        &self.parameters
    }
}

/// Handle to one node of a graph.
#[derive(Clone)]
pub struct Node {
    pub(crate) ctx: Context,
    pub(crate) graph: RefId,
    pub(crate) index: usize,
}

impl Node {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Bind a data object to a kernel parameter. The object gains an
    /// internal count from the node; whatever was bound before loses
    /// one. Rebinding marks the graph for re-verification.
    pub fn set_parameter(&self, index: usize, object: &impl AsReference) -> Result<()> {
        self.ctx
            .bind_node_parameter(self.graph, self.index, index, Some(object.ref_id()), true)
    }

    /// Unbind an optional parameter.
    pub fn clear_parameter(&self, index: usize) -> Result<()> {
        self.ctx.bind_node_parameter(self.graph, self.index, index, None, true)
    }

    pub fn parameter(&self, index: usize) -> Result<Option<Reference>> {
        let id = self.ctx.with_node(self.graph, self.index, |node| {
            node.kernel.signature.slot(index)?;
            Ok(node.parameters[index])
        })?;
        Ok(id.map(|id| Reference { ctx: self.ctx.clone(), id }))
    }

    pub fn set_border_mode(&self, border: BorderMode) -> Result<()> {
        self.ctx.with_node_mut(self.graph, self.index, |node| {
            node.border = border;
            Ok(())
        })
    }

    pub fn border_mode(&self) -> Result<BorderMode> {
        self.ctx.with_node(self.graph, self.index, |node| Ok(node.border))
    }

    /// Install a completion callback. It runs after each successful
    /// kernel invocation; returning [`Action::Abandon`] aborts the rest
    /// of the graph run. Keep it light: the graph lock is held.
    pub fn set_callback(
        &self,
        callback: impl Fn(&NodeUpdate<'_>) -> Action + Send + 'static,
    ) -> Result<()> {
        self.ctx.with_node_mut(self.graph, self.index, |node| {
            node.callback = Some(Box::new(callback));
            Ok(())
        })
    }

    pub fn clear_callback(&self) -> Result<()> {
        self.ctx.with_node_mut(self.graph, self.index, |node| {
            node.callback = None;
            Ok(())
        })
    }

    /// Message of the node's last failure, `None` after success.
    pub fn status(&self) -> Result<Option<String>> {
        self.ctx.with_node(self.graph, self.index, |node| Ok(node.last_status.clone()))
    }

    pub fn perf_avg(&self) -> Result<Duration> {
        self.ctx.with_node(self.graph, self.index, |node| Ok(node.perf.avg()))
    }

    /// Detach the node from its graph, running the kernel's
    /// deinitialize hook and releasing all internal holds.
    pub fn remove(self) -> Result<()> {
        self.ctx.remove_node(self.graph, self.index)
    }
}

impl Context {
    pub(crate) fn with_node<T>(
        &self,
        graph: RefId,
        index: usize,
        f: impl FnOnce(&NodeState) -> Result<T>,
    ) -> Result<T> {
        let arc = self.graph_arc(graph)?;
        let state = arc.lock();
        f(state.node(index)?)
    }

    pub(crate) fn with_node_mut<T>(
        &self,
        graph: RefId,
        index: usize,
        f: impl FnOnce(&mut NodeState) -> Result<T>,
    ) -> Result<T> {
        let arc = self.graph_arc(graph)?;
        let mut state = arc.lock();
        f(state.node_mut(index)?)
    }

    /// Shared bind path for node and graph parameters. `invalidate`
    /// controls whether the graph drops its verified flag; graph
    /// parameter swaps keep it.
    pub(crate) fn bind_node_parameter(
        &self,
        graph: RefId,
        node_index: usize,
        param_index: usize,
        new: Option<RefId>,
        invalidate: bool,
    ) -> Result<()> {
        let arc = self.graph_arc(graph)?;
        let mut state = arc.lock();
        self.bind_locked(graph, &mut state, node_index, param_index, new, invalidate)
    }

    pub(crate) fn bind_locked(
        &self,
        graph: RefId,
        state: &mut GraphState,
        node_index: usize,
        param_index: usize,
        new: Option<RefId>,
        invalidate: bool,
    ) -> Result<()> {
        let old = {
            let node = state.node_mut(node_index)?;
            let slot = *node.kernel.signature.slot(param_index)?;
            let old = node.parameters[param_index];
            if old == new {
                return Ok(());
            }
            if new.is_none() && slot.state == ParamState::Required {
                return Err(VxError::InvalidParameters(format!(
                    "parameter {param_index} of {} is required",
                    node.kernel.name
                )));
            }

            let mut deferred_delay = None;
            {
                let mut refs = self.refs();
                if let Some(new_id) = new {
                    let kind = refs.get(new_id)?.object.kind();
                    if kind != slot.kind {
                        return Err(VxError::InvalidType(format!(
                            "bound {kind} to a {} parameter of {}",
                            slot.kind, node.kernel.name
                        )));
                    }
                    refs.get_mut(new_id)?.header.internal_count += 1;
                    delay::note_bind(&mut refs, new_id, graph, node_index, param_index)?;
                }
                if let Some(old_id) = old {
                    deferred_delay =
                        delay::note_unbind(&mut refs, old_id, graph, node_index, param_index)?;
                }
                node.parameters[param_index] = new;
            }
            if let Some(d) = deferred_delay {
                self.release_id(d, CountKind::Internal)?;
            }
            old
        };
        if let Some(old_id) = old {
            self.release_id(old_id, CountKind::Internal)?;
        }
        if invalidate {
            state.verified = false;
        }
        zlog!(Zone::Node, graph = %graph, node = node_index, param = param_index, "parameter bound");
        Ok(())
    }

    fn remove_node(&self, graph: RefId, index: usize) -> Result<()> {
        let arc = self.graph_arc(graph)?;

        // run the deinit hook before detaching, outside the table lock
        let hook = {
            let state = arc.lock();
            let node = state.node(index)?;
            node.initialized
                .then(|| node.kernel.deinitialize.clone().map(|h| (h, node.parameters.clone())))
                .flatten()
        };
        if let Some((hook, params)) = hook {
            let mut call = InitCall { ctx: self, params: &params, child: None };
            hook(&mut call)?;
        }

        let node = {
            let mut state = arc.lock();
            state.drop_graph_params_for_node(index);
            state.verified = false;
            state.take_node(index)?
        };

        for (i, param) in node.parameters.iter().enumerate() {
            if let Some(id) = *param {
                let deferred = {
                    let mut refs = self.refs();
                    delay::note_unbind(&mut refs, id, graph, index, i)?
                };
                if let Some(d) = deferred {
                    self.release_id(d, CountKind::Internal)?;
                }
                self.release_id(id, CountKind::Internal)?;
            }
        }
        if let NodeBody::Composite(child) = node.body {
            self.release_id(child, CountKind::Internal)?;
        }
        zlog!(Zone::Node, graph = %graph, node = index, "node removed");
        Ok(())
    }
}
