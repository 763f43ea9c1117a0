//! Generational reference table.
//!
//! Every framework and data object lives in one slot of the per-context
//! table. Handles carry a `RefId`; a stale generation means the object
//! was destroyed and the handle dangles, which every lookup reports as
//! `InvalidReference` instead of touching recycled state.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::error::{Result, VxError};
use crate::core::graph::GraphState;
use crate::core::objects::array::ArrayState;
use crate::core::objects::convolution::ConvolutionState;
use crate::core::objects::delay::DelayState;
use crate::core::objects::distribution::DistributionState;
use crate::core::objects::image::ImageState;
use crate::core::objects::lut::LutState;
use crate::core::objects::matrix::MatrixState;
use crate::core::objects::pyramid::PyramidState;
use crate::core::objects::remap::RemapState;
use crate::core::objects::scalar::ScalarState;
use crate::core::objects::threshold::ThresholdState;
use crate::core::types::RefKind;

/// Opaque handle to a table slot. Equality covers the generation, so a
/// handle left over from a destroyed object never aliases its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl std::fmt::Display for RefId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ref#{}.{}", self.index, self.generation)
    }
}

/// Which of the two reference counts an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountKind {
    /// Application handles.
    External,
    /// Holds taken by other framework objects (node bindings, delay
    /// slots, pyramid levels, composite child graphs).
    Internal,
}

/// Where an object is visible. Virtual objects scoped to a graph may
/// only be bound to that graph's nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Context,
    Graph(RefId),
    Delay(RefId),
    Pyramid(RefId),
}

#[derive(Debug)]
pub struct RefHeader {
    pub kind: RefKind,
    pub scope: Scope,
    pub external_count: u32,
    pub internal_count: u32,
    pub read_count: u64,
    pub write_count: u64,
    pub is_virtual: bool,
    /// Set when the object is a delay slot: owning delay and physical
    /// slot index.
    pub delay_slot: Option<(RefId, usize)>,
    pub name: Option<String>,
}

impl RefHeader {
    pub fn new(kind: RefKind, scope: Scope) -> Self {
        Self {
            kind,
            scope,
            external_count: 0,
            internal_count: 0,
            read_count: 0,
            write_count: 0,
            is_virtual: false,
            delay_slot: None,
            name: None,
        }
    }

    pub fn total(&self) -> u64 {
        self.external_count as u64 + self.internal_count as u64
    }

    pub fn count_mut(&mut self, kind: CountKind) -> &mut u32 {
        match kind {
            CountKind::External => &mut self.external_count,
            CountKind::Internal => &mut self.internal_count,
        }
    }
}

/// Per-kind object state. Graph state sits behind its own mutex so a
/// running graph does not pin the whole table.
pub(crate) enum VxObject {
    Image(ImageState),
    Array(ArrayState),
    Scalar(ScalarState),
    Matrix(MatrixState),
    Convolution(ConvolutionState),
    Distribution(DistributionState),
    Lut(LutState),
    Pyramid(PyramidState),
    Remap(RemapState),
    Threshold(ThresholdState),
    Delay(DelayState),
    Graph(Arc<Mutex<GraphState>>),
}

impl VxObject {
    pub fn kind(&self) -> RefKind {
        match self {
            VxObject::Image(_) => RefKind::Image,
            VxObject::Array(_) => RefKind::Array,
            VxObject::Scalar(_) => RefKind::Scalar,
            VxObject::Matrix(_) => RefKind::Matrix,
            VxObject::Convolution(_) => RefKind::Convolution,
            VxObject::Distribution(_) => RefKind::Distribution,
            VxObject::Lut(_) => RefKind::Lut,
            VxObject::Pyramid(_) => RefKind::Pyramid,
            VxObject::Remap(_) => RefKind::Remap,
            VxObject::Threshold(_) => RefKind::Threshold,
            VxObject::Delay(_) => RefKind::Delay,
            VxObject::Graph(_) => RefKind::Graph,
        }
    }
}

macro_rules! downcast {
    ($fn:ident, $fn_mut:ident, $variant:ident, $ty:ty) => {
        impl VxObject {
            pub(crate) fn $fn(&self) -> Result<&$ty> {
                match self {
                    VxObject::$variant(state) => Ok(state),
                    other => Err(VxError::InvalidType(format!(
                        "expected {}, found {}",
                        RefKind::$variant,
                        other.kind()
                    ))),
                }
            }

            pub(crate) fn $fn_mut(&mut self) -> Result<&mut $ty> {
                match self {
                    VxObject::$variant(state) => Ok(state),
                    other => Err(VxError::InvalidType(format!(
                        "expected {}, found {}",
                        RefKind::$variant,
                        other.kind()
                    ))),
                }
            }
        }
    };
}

downcast!(as_image, as_image_mut, Image, ImageState);
downcast!(as_array, as_array_mut, Array, ArrayState);
downcast!(as_scalar, as_scalar_mut, Scalar, ScalarState);
downcast!(as_matrix, as_matrix_mut, Matrix, MatrixState);
downcast!(as_convolution, as_convolution_mut, Convolution, ConvolutionState);
downcast!(as_distribution, as_distribution_mut, Distribution, DistributionState);
downcast!(as_lut, as_lut_mut, Lut, LutState);
downcast!(as_pyramid, as_pyramid_mut, Pyramid, PyramidState);
downcast!(as_remap, as_remap_mut, Remap, RemapState);
downcast!(as_threshold, as_threshold_mut, Threshold, ThresholdState);
downcast!(as_delay, as_delay_mut, Delay, DelayState);

impl VxObject {
    pub(crate) fn as_graph(&self) -> Result<&Arc<Mutex<GraphState>>> {
        match self {
            VxObject::Graph(state) => Ok(state),
            other => Err(VxError::InvalidType(format!(
                "expected Graph, found {}",
                other.kind()
            ))),
        }
    }
}

pub(crate) struct Entry {
    pub header: RefHeader,
    pub object: VxObject,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Slab-style arena with a free list. Generations bump on removal.
#[derive(Default)]
pub(crate) struct RefTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl RefTable {
    pub fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), live: 0 }
    }

    pub fn insert(&mut self, header: RefHeader, object: VxObject) -> RefId {
        debug_assert_eq!(header.kind, object.kind());
        self.live += 1;
        let entry = Entry { header, object };
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                RefId { index, generation: slot.generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 0, entry: Some(entry) });
                RefId { index, generation: 0 }
            }
        }
    }

    pub fn get(&self, id: RefId) -> Result<&Entry> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.entry.as_ref())
            .ok_or_else(|| VxError::InvalidReference(format!("{id} is not live")))
    }

    pub fn get_mut(&mut self, id: RefId) -> Result<&mut Entry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.entry.as_mut())
            .ok_or_else(|| VxError::InvalidReference(format!("{id} is not live")))
    }

    /// Destroy the slot, invalidating all outstanding `RefId`s for it.
    pub fn remove(&mut self, id: RefId) -> Result<Entry> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .ok_or_else(|| VxError::InvalidReference(format!("{id} is not live")))?;
        let entry = slot
            .entry
            .take()
            .ok_or_else(|| VxError::InvalidReference(format!("{id} is not live")))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Ok(entry)
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn iter(&self) -> impl Iterator<Item = (RefId, &Entry)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.entry
                .as_ref()
                .map(|e| (RefId { index: i as u32, generation: s.generation }, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::objects::scalar::ScalarState;
    use crate::core::types::ScalarValue;

    fn scalar_entry() -> (RefHeader, VxObject) {
        (
            RefHeader::new(RefKind::Scalar, Scope::Context),
            VxObject::Scalar(ScalarState::new(ScalarValue::U32(0))),
        )
    }

    #[test]
    fn stale_handle_is_rejected_after_slot_reuse() {
        let mut table = RefTable::new();
        let (h, o) = scalar_entry();
        let first = table.insert(h, o);
        table.remove(first).unwrap();

        let (h, o) = scalar_entry();
        let second = table.insert(h, o);
        // slot reused, generation advanced
        assert_eq!(first.index, second.index);
        assert_ne!(first, second);

        assert!(matches!(table.get(first), Err(VxError::InvalidReference(_))));
        assert!(table.get(second).is_ok());
    }

    #[test]
    fn live_count_tracks_inserts_and_removes() {
        let mut table = RefTable::new();
        let (h, o) = scalar_entry();
        let a = table.insert(h, o);
        let (h, o) = scalar_entry();
        let b = table.insert(h, o);
        assert_eq!(table.live_count(), 2);

        table.remove(a).unwrap();
        assert_eq!(table.live_count(), 1);
        assert!(table.remove(a).is_err());
        table.remove(b).unwrap();
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn iter_visits_only_live_entries() {
        let mut table = RefTable::new();
        let (h, o) = scalar_entry();
        let a = table.insert(h, o);
        let (h, o) = scalar_entry();
        let b = table.insert(h, o);
        table.remove(a).unwrap();

        let ids: Vec<RefId> = table.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![b]);
    }

    #[test]
    fn total_covers_both_counts() {
        let mut h = RefHeader::new(RefKind::Scalar, Scope::Context);
        h.external_count = 1;
        h.internal_count = 2;
        assert_eq!(h.total(), 3);
        *h.count_mut(CountKind::External) += 1;
        assert_eq!(h.external_count, 2);
    }
}
