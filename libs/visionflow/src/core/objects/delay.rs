//! Delays: rings of identically shaped data objects with an aging
//! rotation.
//!
//! Node parameters bound to a slot are recorded against the slot's
//! logical age, not its physical index. Aging rotates the ring one step
//! and rebinds every recorded parameter so each node keeps seeing the
//! same age. Verification is not disturbed because the rebound objects
//! are shape-identical by construction.

use crate::core::context::Context;
use crate::core::error::{Result, VxError};
use crate::core::handles::{object_handle, Reference};
use crate::core::objects::array::ArrayState;
use crate::core::objects::convolution::ConvolutionState;
use crate::core::objects::distribution::DistributionState;
use crate::core::objects::image::ImageState;
use crate::core::objects::lut::LutState;
use crate::core::objects::matrix::MatrixState;
use crate::core::objects::remap::RemapState;
use crate::core::objects::scalar::ScalarState;
use crate::core::objects::threshold::ThresholdState;
use crate::core::handles::AsReference;
use crate::core::reference::{Entry, RefHeader, RefId, RefTable, Scope, VxObject};
use crate::core::types::RefKind;
use crate::core::zones::{zlog, Zone};

/// One node parameter bound through a delay, keyed by logical age.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DelayAssoc {
    pub graph: RefId,
    pub node: usize,
    pub param: usize,
}

pub(crate) struct DelayState {
    pub kind: RefKind,
    /// Physical ring order; never reordered after creation.
    pub slots: Vec<RefId>,
    /// Rotation offset: logical age `a` lives at physical
    /// `(index + a) % len`.
    pub index: usize,
    /// Bound node parameters per logical age.
    pub assoc: Vec<Vec<DelayAssoc>>,
}

impl DelayState {
    pub fn physical(&self, age: usize) -> usize {
        (self.index + age) % self.slots.len()
    }

    pub fn logical_age(&self, physical: usize) -> usize {
        let n = self.slots.len();
        (physical + n - self.index) % n
    }
}

/// Build a fresh, empty object with the exemplar's geometry.
fn clone_exemplar(entry: &Entry) -> Result<VxObject> {
    Ok(match &entry.object {
        VxObject::Image(img) => {
            VxObject::Image(ImageState::new(img.width, img.height, img.format))
        }
        VxObject::Array(a) => VxObject::Array(ArrayState::new(a.item_type, a.capacity)),
        VxObject::Scalar(s) => VxObject::Scalar(ScalarState::new(s.value)),
        VxObject::Matrix(m) => VxObject::Matrix(MatrixState::new(m.data_type, m.columns, m.rows)),
        VxObject::Convolution(c) => VxObject::Convolution(ConvolutionState::new(c.columns, c.rows)),
        VxObject::Distribution(d) => {
            VxObject::Distribution(DistributionState::new(d.bins, d.offset, d.range))
        }
        VxObject::Lut(_) => VxObject::Lut(LutState::new()),
        VxObject::Remap(r) => {
            VxObject::Remap(RemapState::new(r.src_width, r.src_height, r.dst_width, r.dst_height))
        }
        VxObject::Threshold(t) => {
            let mut state = ThresholdState::new(t.kind);
            state.value = t.value;
            state.lower = t.lower;
            state.upper = t.upper;
            VxObject::Threshold(state)
        }
        VxObject::Pyramid(_) => {
            return Err(VxError::NotSupported("delays of pyramids".into()));
        }
        VxObject::Delay(_) | VxObject::Graph(_) => {
            return Err(VxError::InvalidType(format!(
                "delays hold data objects, not {}",
                entry.object.kind()
            )));
        }
    })
}

object_handle! {
    /// Handle to a delay ring.
    Delay, Delay
}

impl Delay {
    pub fn slot_count(&self) -> Result<usize> {
        self.ctx.with_delay(self.id, |d| Ok(d.slots.len()))
    }

    pub fn object_kind(&self) -> Result<RefKind> {
        self.ctx.with_delay(self.id, |d| Ok(d.kind))
    }

    /// Fetch the slot at logical age `-index`. Only zero or negative
    /// indices are meaningful: `0` is the newest slot, `-1` the
    /// previous one, down to `-(count - 1)`.
    pub fn reference(&self, index: i32) -> Result<Reference> {
        let id = self.ctx.with_delay(self.id, |d| {
            let n = d.slots.len() as i32;
            if index > 0 || index <= -n {
                return Err(VxError::InvalidParameters(format!(
                    "delay index {index} outside {}..=0",
                    1 - n
                )));
            }
            Ok(d.slots[d.physical((-index) as usize)])
        })?;
        Ok(Reference { ctx: self.ctx.clone(), id })
    }

    /// Rotate the ring one step and rebind every associated node
    /// parameter to the slot now holding its age. Blocks while any
    /// affected graph is executing.
    pub fn age(&self) -> Result<()> {
        self.ctx.age_delay(self.id)
    }
}

impl Context {
    /// Create a delay of `count` objects shaped like `exemplar`. The
    /// exemplar itself is not captured, only its geometry.
    pub fn create_delay(&self, exemplar: &impl AsReference, count: usize) -> Result<Delay> {
        if count == 0 {
            return Err(VxError::InvalidParameters("zero-slot delay".into()));
        }
        let exemplar_id = exemplar.ref_id();

        let delay_id = {
            let mut refs = self.refs();
            let entry = refs.get(exemplar_id)?;
            let kind = entry.object.kind();
            if !kind.is_data() {
                return Err(VxError::InvalidType(format!("delay of {kind} objects")));
            }

            let mut objects = Vec::with_capacity(count);
            for _ in 0..count {
                objects.push(clone_exemplar(refs.get(exemplar_id)?)?);
            }

            let mut header = RefHeader::new(RefKind::Delay, Scope::Context);
            header.external_count = 1;
            let delay_id = refs.insert(
                header,
                VxObject::Delay(DelayState {
                    kind,
                    slots: Vec::new(),
                    index: 0,
                    assoc: vec![Vec::new(); count],
                }),
            );

            let mut slots = Vec::with_capacity(count);
            for (phys, object) in objects.into_iter().enumerate() {
                let mut header = RefHeader::new(kind, Scope::Delay(delay_id));
                header.internal_count = 1;
                header.delay_slot = Some((delay_id, phys));
                slots.push(refs.insert(header, object));
            }
            refs.get_mut(delay_id)?.object.as_delay_mut()?.slots = slots;
            delay_id
        };

        zlog!(Zone::Delay, delay = %delay_id, count, "delay created");
        Ok(Delay::from_parts(self.clone(), delay_id))
    }

    pub(crate) fn with_delay<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&DelayState) -> Result<T>,
    ) -> Result<T> {
        let refs = self.refs();
        f(refs.get(id)?.object.as_delay()?)
    }

    fn age_delay(&self, delay_id: RefId) -> Result<()> {
        // Snapshot the graphs touched by any association, then lock
        // them in id order before mutating anything. Holding the graph
        // locks makes the whole rotation atomic against process().
        let graph_arcs = {
            let refs = self.refs();
            let delay = refs.get(delay_id)?.object.as_delay()?;
            let mut graph_ids: Vec<RefId> =
                delay.assoc.iter().flatten().map(|a| a.graph).collect();
            graph_ids.sort();
            graph_ids.dedup();
            graph_ids
                .into_iter()
                .map(|gid| Ok((gid, refs.get(gid)?.object.as_graph()?.clone())))
                .collect::<Result<Vec<_>>>()?
        };
        let mut guards: Vec<_> =
            graph_arcs.iter().map(|(gid, arc)| (*gid, arc.lock())).collect();

        let mut refs = self.refs();
        let delay = refs.get_mut(delay_id)?.object.as_delay_mut()?;
        let n = delay.slots.len();
        let old_index = delay.index;
        // One step forward: a node bound at age 0 comes out holding
        // the object that sat at age 1 before the rotation.
        delay.index = (delay.index + 1) % n;

        // (age, assoc, old slot, new slot) rebind plan
        let mut rebinds = Vec::new();
        for (age, assocs) in delay.assoc.iter().enumerate() {
            let old_slot = delay.slots[(old_index + age) % n];
            let new_slot = delay.slots[(delay.index + age) % n];
            for assoc in assocs {
                rebinds.push((assoc.clone(), old_slot, new_slot));
            }
        }

        for (assoc, old_slot, new_slot) in rebinds {
            let state = guards
                .iter_mut()
                .find(|(gid, _)| *gid == assoc.graph)
                .map(|(_, guard)| guard)
                .ok_or_else(|| VxError::Failure("delay association lost its graph".into()))?;
            state.rebind_parameter(assoc.node, assoc.param, old_slot, new_slot)?;
            // slots stay alive through the delay's own internal holds
            refs.get_mut(old_slot)?.header.internal_count -= 1;
            refs.get_mut(new_slot)?.header.internal_count += 1;
        }
        zlog!(Zone::Delay, delay = %delay_id, "delay aged");
        Ok(())
    }
}

/// Record a node binding against the slot's logical age and pin the
/// owning delay with an internal count. No-op for plain objects.
pub(crate) fn note_bind(
    table: &mut RefTable,
    target: RefId,
    graph: RefId,
    node: usize,
    param: usize,
) -> Result<()> {
    let Some((delay_id, phys)) = table.get(target)?.header.delay_slot else {
        return Ok(());
    };
    let delay = table.get_mut(delay_id)?.object.as_delay_mut()?;
    let age = delay.logical_age(phys);
    delay.assoc[age].push(DelayAssoc { graph, node, param });
    table.get_mut(delay_id)?.header.internal_count += 1;
    Ok(())
}

/// Undo `note_bind`. Returns the delay to release when this was the
/// binding keeping it alive; the caller releases outside the table
/// lock.
pub(crate) fn note_unbind(
    table: &mut RefTable,
    target: RefId,
    graph: RefId,
    node: usize,
    param: usize,
) -> Result<Option<RefId>> {
    let Some((delay_id, phys)) = table.get(target)?.header.delay_slot else {
        return Ok(None);
    };
    let delay = table.get_mut(delay_id)?.object.as_delay_mut()?;
    let age = delay.logical_age(phys);
    let wanted = DelayAssoc { graph, node, param };
    if let Some(pos) = delay.assoc[age].iter().position(|a| *a == wanted) {
        delay.assoc[age].remove(pos);
    }
    let header = &mut table.get_mut(delay_id)?.header;
    if header.internal_count == 1 && header.external_count == 0 {
        // last hold, caller must run the real release path
        return Ok(Some(delay_id));
    }
    header.internal_count = header.internal_count.saturating_sub(1);
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ImageFormat;

    #[test]
    fn slots_are_fresh_copies_of_the_exemplar() {
        let ctx = Context::new().unwrap();
        let exemplar = ctx.create_image(16, 8, ImageFormat::U8).unwrap();
        let delay = ctx.create_delay(&exemplar, 3).unwrap();

        assert_eq!(delay.slot_count().unwrap(), 3);
        assert_eq!(delay.object_kind().unwrap(), RefKind::Image);

        let newest = delay.reference(0).unwrap().into_image().unwrap();
        assert_eq!(newest.width().unwrap(), 16);
        assert_ne!(newest.id, exemplar.id);
        exemplar.release().unwrap();
        // exemplar gone, slots unaffected
        assert_eq!(delay.reference(-2).unwrap().into_image().unwrap().height().unwrap(), 8);
    }

    #[test]
    fn index_range_is_zero_or_negative() {
        let ctx = Context::new().unwrap();
        let exemplar = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
        let delay = ctx.create_delay(&exemplar, 2).unwrap();
        assert!(delay.reference(0).is_ok());
        assert!(delay.reference(-1).is_ok());
        assert!(matches!(delay.reference(1), Err(VxError::InvalidParameters(_))));
        assert!(matches!(delay.reference(-2), Err(VxError::InvalidParameters(_))));
    }

    #[test]
    fn aging_rotates_the_ring() {
        let ctx = Context::new().unwrap();
        let exemplar = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
        let delay = ctx.create_delay(&exemplar, 3).unwrap();

        let newest_before = delay.reference(0).unwrap().id;
        let middle_before = delay.reference(-1).unwrap().id;
        let oldest_before = delay.reference(-2).unwrap().id;
        delay.age().unwrap();

        // every age slot advances one step along the ring; the
        // previous newest wraps around to the oldest position
        assert_eq!(delay.reference(0).unwrap().id, middle_before);
        assert_eq!(delay.reference(-1).unwrap().id, oldest_before);
        assert_eq!(delay.reference(-2).unwrap().id, newest_before);
    }

    #[test]
    fn framework_objects_cannot_seed_a_delay() {
        let ctx = Context::new().unwrap();
        let graph = ctx.create_graph().unwrap();
        assert!(matches!(ctx.create_delay(&graph, 2), Err(VxError::InvalidType(_))));
    }

    #[test]
    fn releasing_the_delay_destroys_its_slots() {
        let ctx = Context::new().unwrap();
        let exemplar = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
        let before = ctx.live_references();
        let delay = ctx.create_delay(&exemplar, 4).unwrap();
        assert_eq!(ctx.live_references(), before + 5);
        delay.release().unwrap();
        assert_eq!(ctx.live_references(), before);
    }
}
