//! Graphs: verification and wave-based execution.
//!
//! Verification derives data edges from shared bindings, rejects
//! cycles and multiple writers, runs kernel validators in topological
//! order so shape inference flows downstream through virtual objects,
//! allocates memory, and finally runs initialize hooks. Execution
//! walks the derived edges in waves from the head nodes, retrying
//! not-yet-ready consumers in later waves.

use std::collections::HashMap;
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::core::context::Context;
use crate::core::error::{Result, VxError};
use crate::core::handles::{object_handle, AsReference};
use crate::core::kernel::{InitCall, Kernel, ValidateCall};
use crate::core::meta::MetaFormat;
use crate::core::node::{Node, NodeBody, NodeState, NodeUpdate};
use crate::core::perf::PerfCounter;
use crate::core::reference::{RefHeader, RefId, Scope, VxObject};
use crate::core::types::{Action, Direction, ImageFormat, ParamState, RefKind};
use crate::core::zones::{zlog, Zone};
use std::sync::Arc;
use parking_lot::Mutex;

/// A promoted kernel parameter: (node slot, parameter index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GraphParam {
    pub node: usize,
    pub index: usize,
}

pub struct GraphState {
    pub(crate) nodes: Vec<Option<NodeState>>,
    pub(crate) heads: Vec<usize>,
    pub(crate) pred: Vec<Vec<usize>>,
    pub(crate) succ: Vec<Vec<usize>>,
    pub(crate) params: Vec<GraphParam>,
    pub(crate) verified: bool,
    pub(crate) perf: PerfCounter,
}

impl GraphState {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            heads: Vec::new(),
            pred: Vec::new(),
            succ: Vec::new(),
            params: Vec::new(),
            verified: false,
            perf: PerfCounter::new(),
        }
    }

    pub(crate) fn node(&self, index: usize) -> Result<&NodeState> {
        self.nodes
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| VxError::InvalidNode(format!("node {index} is not in the graph")))
    }

    pub(crate) fn node_mut(&mut self, index: usize) -> Result<&mut NodeState> {
        self.nodes
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or_else(|| VxError::InvalidNode(format!("node {index} is not in the graph")))
    }

    pub(crate) fn take_node(&mut self, index: usize) -> Result<NodeState> {
        self.nodes
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| VxError::InvalidNode(format!("node {index} is not in the graph")))
    }

    pub(crate) fn live_nodes(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|_| i))
            .collect()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Swap a delay slot binding without touching counts; the aging
    /// path adjusts those itself.
    pub(crate) fn rebind_parameter(
        &mut self,
        node: usize,
        param: usize,
        old: RefId,
        new: RefId,
    ) -> Result<()> {
        let state = self.node_mut(node)?;
        match state.parameters.get_mut(param) {
            Some(slot) if *slot == Some(old) => {
                *slot = Some(new);
                Ok(())
            }
            _ => Err(VxError::Failure(format!(
                "delay association out of step at node {node} parameter {param}"
            ))),
        }
    }

    pub(crate) fn drop_graph_params_for_node(&mut self, node: usize) {
        self.params.retain(|p| p.node != node);
    }

    /// Does any live node read the given object?
    fn reads_object(&self, id: RefId) -> bool {
        self.nodes.iter().flatten().any(|node| {
            node.parameters.iter().enumerate().any(|(i, p)| {
                *p == Some(id) && node.kernel.signature.slots[i].direction.reads()
            })
        })
    }
}

/// Data edges plus the writer table. Fails on double-written objects.
fn derive_edges(g: &GraphState) -> Result<Vec<(usize, usize)>> {
    let mut writers: HashMap<RefId, (usize, usize)> = HashMap::new();
    for n in g.live_nodes() {
        let node = g.node(n)?;
        for (i, param) in node.parameters.iter().enumerate() {
            let Some(id) = *param else { continue };
            if !node.kernel.signature.slots[i].direction.writes() {
                continue;
            }
            if let Some((prev, _)) = writers.insert(id, (n, i)) {
                return Err(VxError::MultipleWriters(format!(
                    "{id} written by nodes {prev} and {n}"
                )));
            }
        }
    }

    let mut edges = Vec::new();
    for n in g.live_nodes() {
        let node = g.node(n)?;
        for (i, param) in node.parameters.iter().enumerate() {
            let Some(id) = *param else { continue };
            if node.kernel.signature.slots[i].direction != Direction::Input {
                continue;
            }
            if let Some(&(w, _)) = writers.get(&id) {
                if w != n && !edges.contains(&(w, n)) {
                    edges.push((w, n));
                }
            }
        }
    }
    Ok(edges)
}

fn verify_locked(ctx: &Context, graph_id: RefId, g: &mut GraphState) -> Result<()> {
    let live = g.live_nodes();

    // required bindings and virtual scopes
    for &n in &live {
        let node = g.node(n)?;
        for (i, slot) in node.kernel.signature.slots.iter().enumerate() {
            match node.parameters[i] {
                None if slot.state == ParamState::Required => {
                    return Err(VxError::NotSufficient(format!(
                        "node {n} ({}) parameter {i}",
                        node.kernel.name
                    )));
                }
                Some(id) => {
                    if ctx.ref_is_virtual(id)? && !ctx.virtual_scope_matches(id, graph_id)? {
                        return Err(VxError::InvalidScope(format!(
                            "{id} is virtual in another graph"
                        )));
                    }
                }
                None => {}
            }
        }
    }

    // edge derivation and cycle rejection
    let edges = derive_edges(g)?;
    let mut pg: DiGraph<usize, ()> = DiGraph::new();
    let mut idx: HashMap<usize, NodeIndex> = HashMap::new();
    for &n in &live {
        idx.insert(n, pg.add_node(n));
    }
    for &(a, b) in &edges {
        pg.add_edge(idx[&a], idx[&b], ());
    }
    let order: Vec<usize> = toposort(&pg, None)
        .map_err(|cycle| {
            VxError::InvalidGraph(format!(
                "data dependency cycle through node {}",
                pg[cycle.node_id()]
            ))
        })?
        .into_iter()
        .map(|ix| pg[ix])
        .collect();

    let slots = g.nodes.len();
    g.pred = vec![Vec::new(); slots];
    g.succ = vec![Vec::new(); slots];
    for &(a, b) in &edges {
        g.succ[a].push(b);
        g.pred[b].push(a);
    }
    g.heads = live.iter().copied().filter(|&n| g.pred[n].is_empty()).collect();
    if !live.is_empty() && g.heads.is_empty() {
        return Err(VxError::InvalidGraph("no head nodes".into()));
    }

    // validators in topological order so upstream output metas resolve
    // virtual objects before downstream input validators see them
    for &n in &order {
        let (params, kernel) = {
            let node = g.node(n)?;
            (node.parameters.clone(), node.kernel.clone())
        };
        let call = ValidateCall { ctx, params: &params };
        for (i, slot) in kernel.signature.slots.iter().enumerate() {
            let Some(id) = params[i] else { continue };
            if slot.direction.reads() {
                (kernel.validate_input)(&call, i)?;
            }
            if slot.direction == Direction::Output {
                let mut meta = MetaFormat::Unset;
                (kernel.validate_output)(&call, i, &mut meta)?;
                meta.expect_kind(slot.kind)?;
                ctx.apply_meta(graph_id, id, &meta)?;
            }
        }
    }

    // commit backing memory for every bound object
    for &n in &live {
        let params = g.node(n)?.parameters.clone();
        for id in params.into_iter().flatten() {
            ctx.allocate_object(id)?;
        }
    }

    // per-target verification hook
    for &n in &live {
        ctx.target_verify_node(g.node(n)?)?;
    }

    // initialize hooks may attach child graphs
    for &n in &order {
        let hook = {
            let node = g.node(n)?;
            (!node.initialized).then(|| node.kernel.initialize.clone()).flatten()
        };
        let Some(hook) = hook else {
            g.node_mut(n)?.initialized = true;
            continue;
        };
        let params = g.node(n)?.parameters.clone();
        let mut call = InitCall { ctx, params: &params, child: None };
        hook(&mut call)?;
        let node = g.node_mut(n)?;
        node.initialized = true;
        if let Some(child) = call.child {
            node.body = NodeBody::Composite(child);
        }
    }

    zlog!(Zone::Graph, graph = %graph_id, nodes = live.len(), edges = edges.len(), "graph verified");
    Ok(())
}

fn process_locked(ctx: &Context, graph_id: RefId, g: &mut GraphState) -> Result<()> {
    if !g.verified {
        verify_locked(ctx, graph_id, g).inspect_err(|e| {
            ctx.report(Some(graph_id), e, "verification failed");
        })?;
        g.verified = true;
    }

    for n in g.live_nodes() {
        let node = g.node_mut(n)?;
        node.executed = false;
        node.visited = false;
    }

    g.perf.start();
    let total = g.live_count();
    let mut next = g.heads.clone();
    for &n in &next {
        g.node_mut(n)?.visited = true;
    }
    let mut left: Vec<usize> = Vec::new();
    let mut waves = 0usize;

    while !next.is_empty() {
        waves += 1;
        if waves > total {
            g.perf.stop();
            return Err(VxError::Failure(format!(
                "executed {waves} waves over {total} nodes without converging"
            )));
        }
        zlog!(Zone::Graph, graph = %graph_id, wave = waves, nodes = next.len(), "wave start");

        for &n in &next {
            match execute_node(ctx, g, n) {
                Ok(Action::Continue) => {}
                Ok(Action::Abandon) => {
                    g.perf.stop();
                    ctx.report(Some(graph_id), &VxError::GraphAbandoned, "callback abandoned");
                    return Err(VxError::GraphAbandoned);
                }
                Err(e) => {
                    g.perf.stop();
                    ctx.report(Some(graph_id), &e, "node execution failed");
                    return Err(e);
                }
            }
        }

        let mut candidates: Vec<usize> = std::mem::take(&mut left);
        for &n in &next {
            for &s in &g.succ[n] {
                if !candidates.contains(&s) {
                    candidates.push(s);
                }
            }
        }

        next.clear();
        for c in candidates {
            let node = g.node(c)?;
            if node.executed || node.visited {
                continue;
            }
            let ready = g.pred[c].iter().all(|&p| {
                g.nodes[p].as_ref().map(|n| n.executed).unwrap_or(true)
            });
            if ready {
                g.node_mut(c)?.visited = true;
                next.push(c);
            } else {
                left.push(c);
            }
        }
    }

    g.perf.stop();
    zlog!(Zone::Perf, graph = %graph_id, waves, avg_us = g.perf.avg().as_micros() as u64, "graph processed");
    Ok(())
}

fn execute_node(ctx: &Context, g: &mut GraphState, n: usize) -> Result<Action> {
    let composite_child = match g.node(n)?.body {
        NodeBody::Composite(child) => Some(child),
        NodeBody::Primitive => None,
    };

    if let Some(child) = composite_child {
        g.node_mut(n)?.perf.start();
        let result = ctx.process_graph_id(child);
        let node = g.node_mut(n)?;
        node.perf.stop();
        node.executed = true;
        match result {
            Ok(()) => node.last_status = None,
            Err(e) => {
                node.last_status = Some(e.to_string());
                return Err(e);
            }
        }
    } else {
        ctx.target_process_node(n, g.node_mut(n)?)?;
    }

    let node = g.node(n)?;
    if let Some(callback) = &node.callback {
        let update = NodeUpdate { index: n, kernel: &node.kernel.name };
        return Ok(callback(&update));
    }
    Ok(Action::Continue)
}

object_handle! {
    /// Handle to a dataflow graph.
    Graph, Graph
}

impl Graph {
    /// Instantiate a kernel as a node. The node is placed on the
    /// highest-priority target that carries the kernel.
    pub fn create_node(&self, kernel: &Arc<Kernel>) -> Result<Node> {
        let affinity = self.ctx.target_index_for(&kernel.name)?;
        let arc = self.ctx.graph_arc(self.id)?;
        let mut state = arc.lock();
        state.nodes.push(Some(NodeState::new(kernel.clone(), affinity)));
        state.verified = false;
        let index = state.nodes.len() - 1;
        zlog!(Zone::Graph, graph = %self.id, node = index, kernel = %kernel.name, "node created");
        Ok(Node { ctx: self.ctx.clone(), graph: self.id, index })
    }

    /// Convenience: look the kernel up by name and create a node.
    pub fn create_node_by_name(&self, name: &str) -> Result<Node> {
        let kernel = self.ctx.kernel_by_name(name)?;
        self.create_node(&kernel)
    }

    pub fn verify(&self) -> Result<()> {
        let arc = self.ctx.graph_arc(self.id)?;
        let mut state = arc.lock();
        match verify_locked(&self.ctx, self.id, &mut state) {
            Ok(()) => {
                state.verified = true;
                Ok(())
            }
            Err(e) => {
                state.verified = false;
                self.ctx.report(Some(self.id), &e, "verification failed");
                Err(e)
            }
        }
    }

    /// Run the graph to completion, verifying first when needed.
    pub fn process(&self) -> Result<()> {
        let arc = self.ctx.graph_arc(self.id)?;
        let mut state = arc.lock();
        process_locked(&self.ctx, self.id, &mut state)
    }

    pub fn is_verified(&self) -> Result<bool> {
        let arc = self.ctx.graph_arc(self.id)?;
        let state = arc.lock();
        Ok(state.verified)
    }

    pub fn node_count(&self) -> Result<usize> {
        let arc = self.ctx.graph_arc(self.id)?;
        let state = arc.lock();
        Ok(state.live_count())
    }

    /// Promote a node parameter to a graph parameter, returning its
    /// graph-level index.
    pub fn add_parameter(&self, node: &Node, param_index: usize) -> Result<usize> {
        if node.graph != self.id {
            return Err(VxError::InvalidNode("node belongs to another graph".into()));
        }
        let arc = self.ctx.graph_arc(self.id)?;
        let mut state = arc.lock();
        state.node(node.index)?.kernel.signature.slot(param_index)?;
        state.params.push(GraphParam { node: node.index, index: param_index });
        Ok(state.params.len() - 1)
    }

    pub fn parameter_count(&self) -> Result<usize> {
        let arc = self.ctx.graph_arc(self.id)?;
        let state = arc.lock();
        Ok(state.params.len())
    }

    /// Rebind a promoted parameter. Type-compatible swaps keep the
    /// verified state, so repeated runs over fresh data skip
    /// re-verification.
    pub fn set_parameter(&self, index: usize, object: &impl AsReference) -> Result<()> {
        let arc = self.ctx.graph_arc(self.id)?;
        let mut state = arc.lock();
        let param = *state
            .params
            .get(index)
            .ok_or_else(|| VxError::InvalidParameters(format!("graph parameter {index}")))?;
        self.ctx.bind_locked(
            self.id,
            &mut state,
            param.node,
            param.index,
            Some(object.ref_id()),
            false,
        )
    }

    pub fn perf_avg(&self) -> Result<Duration> {
        let arc = self.ctx.graph_arc(self.id)?;
        let state = arc.lock();
        Ok(state.perf.avg())
    }

    /// Structural snapshot: nodes, derived data edges, verified flag.
    pub fn snapshot(&self) -> Result<GraphSnapshot> {
        let arc = self.ctx.graph_arc(self.id)?;
        let state = arc.lock();
        let mut nodes = Vec::new();
        for n in state.live_nodes() {
            let node = state.node(n)?;
            nodes.push(SnapshotNode {
                index: n,
                kernel: node.kernel.name.clone(),
                target: self.ctx.target_name(node.affinity)?,
            });
        }
        let edges = derive_edges(&state)?
            .into_iter()
            .map(|(from, to)| SnapshotEdge { from, to })
            .collect();
        Ok(GraphSnapshot { nodes, edges, verified: state.verified })
    }

    pub fn to_dot(&self) -> Result<String> {
        Ok(self.snapshot()?.to_dot())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub index: usize,
    pub kernel: String,
    pub target: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotEdge {
    pub from: usize,
    pub to: usize,
}

/// Serializable structure dump for tooling and debugging.
#[derive(Debug, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<SnapshotNode>,
    pub edges: Vec<SnapshotEdge>,
    pub verified: bool,
}

impl GraphSnapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| VxError::Failure(format!("snapshot serialization: {e}")))
    }

    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph visionflow {\n");
        for node in &self.nodes {
            out.push_str(&format!(
                "  n{} [label=\"{}\\n{}\"];\n",
                node.index, node.kernel, node.target
            ));
        }
        for edge in &self.edges {
            out.push_str(&format!("  n{} -> n{};\n", edge.from, edge.to));
        }
        out.push_str("}\n");
        out
    }
}

impl Context {
    pub fn create_graph(&self) -> Result<Graph> {
        let mut header = RefHeader::new(RefKind::Graph, Scope::Context);
        header.external_count = 1;
        let id = self
            .refs()
            .insert(header, VxObject::Graph(Arc::new(Mutex::new(GraphState::new()))));
        zlog!(Zone::Graph, graph = %id, "graph created");
        Ok(Graph::from_parts(self.clone(), id))
    }

    /// Create a virtual image scoped to a graph. Zero dimensions and
    /// the `Virt` format are placeholders resolved at verification.
    pub fn create_virtual_image(
        &self,
        graph: &Graph,
        width: u32,
        height: u32,
        format: ImageFormat,
    ) -> Result<crate::core::objects::image::Image> {
        self.check_kind(graph.id, RefKind::Graph)?;
        let id = {
            let mut refs = self.refs();
            let mut header = RefHeader::new(RefKind::Image, Scope::Graph(graph.id));
            header.external_count = 1;
            header.is_virtual = true;
            refs.insert(
                header,
                VxObject::Image(crate::core::objects::image::ImageState::new(
                    width, height, format,
                )),
            )
        };
        zlog!(Zone::Api, image = %id, width, height, ?format, "virtual image created");
        Ok(crate::core::objects::image::Image::from_parts(self.clone(), id))
    }

    pub(crate) fn graph_arc(&self, id: RefId) -> Result<Arc<Mutex<GraphState>>> {
        let refs = self.refs();
        Ok(refs.get(id)?.object.as_graph()?.clone())
    }

    pub(crate) fn process_graph_id(&self, id: RefId) -> Result<()> {
        let arc = self.graph_arc(id)?;
        let mut state = arc.lock();
        process_locked(self, id, &mut state)
    }

    /// External write to `written`: every graph reading it loses its
    /// verified state and will re-verify on the next run.
    pub(crate) fn contaminate(&self, written: RefId) {
        let graphs: Vec<Arc<Mutex<GraphState>>> = {
            let refs = self.refs();
            refs.iter()
                .filter_map(|(_, entry)| match &entry.object {
                    VxObject::Graph(arc) => Some(arc.clone()),
                    _ => None,
                })
                .collect()
        };
        for arc in graphs {
            let mut state = arc.lock();
            if state.verified && state.reads_object(written) {
                state.verified = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::objects::image::{AccessMode, Image};
    use crate::core::types::ImageFormat;
    use crate::kernels;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    fn fill(img: &Image, f: impl Fn(u32, u32) -> u8) {
        let mut patch = img.access_patch(None, 0, AccessMode::WriteOnly).unwrap();
        for y in 0..patch.addr.dim_y {
            for x in 0..patch.addr.dim_x {
                patch.pixel_mut(x, y)[0] = f(x, y);
            }
        }
        img.commit_patch(patch).unwrap();
    }

    fn pixel(img: &Image, x: u32, y: u32) -> u8 {
        let patch = img.access_patch(None, 0, AccessMode::ReadOnly).unwrap();
        let v = patch.pixel(x, y)[0];
        img.commit_patch(patch).unwrap();
        v
    }

    #[test]
    fn copy_graph_runs_end_to_end() {
        let ctx = Context::new().unwrap();
        let graph = ctx.create_graph().unwrap();
        let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let dst = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        fill(&src, |x, y| (x * 8 + y) as u8);

        kernels::copy_node(&graph, &src, &dst).unwrap();
        graph.verify().unwrap();
        assert!(graph.is_verified().unwrap());
        graph.process().unwrap();
        assert_eq!(pixel(&dst, 3, 5), 3 * 8 + 5);
    }

    #[test]
    fn unbound_required_parameter_fails_verify() {
        let ctx = Context::new().unwrap();
        let graph = ctx.create_graph().unwrap();
        let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let node = graph.create_node_by_name("org.visionflow.copy").unwrap();
        node.set_parameter(0, &src).unwrap();
        assert!(matches!(graph.verify(), Err(VxError::NotSufficient(_))));
        assert!(!graph.is_verified().unwrap());
    }

    #[test]
    fn two_writers_are_rejected() {
        let ctx = Context::new().unwrap();
        let graph = ctx.create_graph().unwrap();
        let a = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let b = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let out = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        kernels::copy_node(&graph, &a, &out).unwrap();
        kernels::copy_node(&graph, &b, &out).unwrap();
        assert!(matches!(graph.verify(), Err(VxError::MultipleWriters(_))));
    }

    #[test]
    fn cyclic_graph_is_rejected() {
        let ctx = Context::new().unwrap();
        let graph = ctx.create_graph().unwrap();
        let a = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let b = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        kernels::copy_node(&graph, &a, &b).unwrap();
        kernels::copy_node(&graph, &b, &a).unwrap();
        assert!(matches!(graph.verify(), Err(VxError::InvalidGraph(_))));
        // process re-verifies and hits the same wall
        assert!(matches!(graph.process(), Err(VxError::InvalidGraph(_))));
    }

    #[test]
    fn verify_is_idempotent() {
        let ctx = Context::new().unwrap();
        let graph = ctx.create_graph().unwrap();
        let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let dst = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        fill(&src, |x, _| x as u8);

        kernels::copy_node(&graph, &src, &dst).unwrap();
        graph.verify().unwrap();
        graph.verify().unwrap();
        assert!(graph.is_verified().unwrap());
        assert_eq!(pixel(&src, 3, 0), 3);
    }

    #[test]
    fn virtual_image_outside_its_graph_is_rejected() {
        let ctx = Context::new().unwrap();
        let owner = ctx.create_graph().unwrap();
        let other = ctx.create_graph().unwrap();
        let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let virt = ctx.create_virtual_image(&owner, 8, 8, ImageFormat::U8).unwrap();
        kernels::copy_node(&other, &src, &virt).unwrap();
        assert!(matches!(other.verify(), Err(VxError::InvalidScope(_))));
    }

    #[test]
    fn virtual_intermediates_resolve_through_validators() {
        let ctx = Context::new().unwrap();
        let graph = ctx.create_graph().unwrap();
        let src = ctx.create_image(16, 16, ImageFormat::U8).unwrap();
        let dst = ctx.create_image(16, 16, ImageFormat::S16).unwrap();
        // Zero-dimension virtuals take their shape from the producer.
        let blur = ctx.create_virtual_image(&graph, 0, 0, ImageFormat::Virt).unwrap();
        let gx = ctx.create_virtual_image(&graph, 0, 0, ImageFormat::Virt).unwrap();
        let gy = ctx.create_virtual_image(&graph, 0, 0, ImageFormat::Virt).unwrap();
        fill(&src, |x, _| if x < 8 { 0 } else { 255 });

        kernels::gaussian3x3_node(&graph, &src, &blur).unwrap();
        kernels::sobel3x3_node(&graph, &blur, Some(&gx), Some(&gy)).unwrap();
        kernels::magnitude_node(&graph, &gx, &gy, &dst).unwrap();
        graph.verify().unwrap();

        // verification resolved every virtual to the head's geometry
        assert_eq!(blur.width().unwrap(), 16);
        assert_eq!(blur.format().unwrap(), ImageFormat::U8);
        assert_eq!(gx.height().unwrap(), 16);
        assert_eq!(gx.format().unwrap(), ImageFormat::S16);

        graph.process().unwrap();

        // Strong horizontal gradient at the step, flat far from it.
        let patch = dst.access_patch(None, 0, AccessMode::ReadOnly).unwrap();
        let edge = i16::from_ne_bytes([patch.pixel(8, 8)[0], patch.pixel(8, 8)[1]]);
        let flat = i16::from_ne_bytes([patch.pixel(2, 8)[0], patch.pixel(2, 8)[1]]);
        dst.commit_patch(patch).unwrap();
        assert!(edge > 0, "edge response was {edge}");
        assert_eq!(flat, 0);
    }

    #[test]
    fn external_write_contaminates_verified_graph() {
        let ctx = Context::new().unwrap();
        let graph = ctx.create_graph().unwrap();
        let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let dst = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        kernels::copy_node(&graph, &src, &dst).unwrap();
        graph.verify().unwrap();

        fill(&src, |_, _| 42);
        assert!(!graph.is_verified().unwrap());
        // process re-verifies on its own
        graph.process().unwrap();
        assert!(graph.is_verified().unwrap());
        assert_eq!(pixel(&dst, 0, 0), 42);
    }

    #[test]
    fn graph_parameter_swap_keeps_verified() {
        let ctx = Context::new().unwrap();
        let graph = ctx.create_graph().unwrap();
        let first = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let second = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let dst = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        fill(&first, |_, _| 1);
        fill(&second, |_, _| 2);

        let node = kernels::copy_node(&graph, &first, &dst).unwrap();
        let slot = graph.add_parameter(&node, 0).unwrap();
        assert_eq!(graph.parameter_count().unwrap(), 1);
        graph.verify().unwrap();
        graph.process().unwrap();
        assert_eq!(pixel(&dst, 0, 0), 1);

        graph.set_parameter(slot, &second).unwrap();
        assert!(graph.is_verified().unwrap());
        graph.process().unwrap();
        assert_eq!(pixel(&dst, 0, 0), 2);
    }

    #[test]
    fn callback_abandon_stops_the_run() {
        let ctx = Context::new().unwrap();
        let graph = ctx.create_graph().unwrap();
        let a = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let b = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let c = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        fill(&a, |_, _| 9);

        let first = kernels::copy_node(&graph, &a, &b).unwrap();
        kernels::copy_node(&graph, &b, &c).unwrap();
        let fired = StdArc::new(AtomicUsize::new(0));
        let seen = fired.clone();
        first
            .set_callback(move |update| {
                assert_eq!(update.kernel, "org.visionflow.copy");
                seen.fetch_add(1, Ordering::SeqCst);
                Action::Abandon
            })
            .unwrap();

        assert!(matches!(graph.process(), Err(VxError::GraphAbandoned)));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // the first node ran, the downstream one never did
        assert_eq!(pixel(&b, 0, 0), 9);
        assert_eq!(pixel(&c, 0, 0), 0);
    }

    #[test]
    fn composite_node_expands_and_runs() {
        let ctx = Context::new().unwrap();
        let graph = ctx.create_graph().unwrap();
        let src = ctx.create_image(16, 16, ImageFormat::U8).unwrap();
        let dst = ctx.create_image(16, 16, ImageFormat::S16).unwrap();
        fill(&src, |x, _| if x < 8 { 0 } else { 255 });

        kernels::edge_node(&graph, &src, &dst).unwrap();
        graph.verify().unwrap();
        graph.process().unwrap();

        let patch = dst.access_patch(None, 0, AccessMode::ReadOnly).unwrap();
        let edge = i16::from_ne_bytes([patch.pixel(8, 8)[0], patch.pixel(8, 8)[1]]);
        dst.commit_patch(patch).unwrap();
        assert!(edge > 0, "edge response was {edge}");
    }

    #[test]
    fn releasing_the_graph_frees_its_holds() {
        let ctx = Context::new().unwrap();
        let baseline = ctx.live_references();

        let graph = ctx.create_graph().unwrap();
        let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let dst = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let virt = ctx.create_virtual_image(&graph, 8, 8, ImageFormat::U8).unwrap();
        kernels::copy_node(&graph, &src, &virt).unwrap();
        kernels::copy_node(&graph, &virt, &dst).unwrap();
        virt.release().unwrap();

        assert_eq!(src.counts().unwrap(), (1, 1));
        graph.release().unwrap();
        // node bindings were the only holds left on the virtual image
        assert_eq!(src.counts().unwrap(), (1, 0));
        src.release().unwrap();
        dst.release().unwrap();
        assert_eq!(ctx.live_references(), baseline);
    }

    #[test]
    fn snapshot_names_nodes_and_edges() {
        let ctx = Context::new().unwrap();
        let graph = ctx.create_graph().unwrap();
        let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let mid = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        let dst = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
        kernels::copy_node(&graph, &src, &mid).unwrap();
        kernels::box3x3_node(&graph, &mid, &dst).unwrap();
        graph.verify().unwrap();

        let snap = graph.snapshot().unwrap();
        assert_eq!(snap.nodes.len(), 2);
        assert_eq!(snap.edges.len(), 1);
        let dot = graph.to_dot().unwrap();
        assert!(dot.contains("org.visionflow.box3x3"));
        assert!(snap.to_json().unwrap().contains("org.visionflow.copy"));
    }
}
