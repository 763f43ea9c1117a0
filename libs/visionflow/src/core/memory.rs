//! Lazy multi-plane backing store for data objects.
//!
//! Geometry is fixed at object creation; bytes are only committed when
//! `allocate` runs, either from the graph allocation phase or from the
//! first external access. Allocation is idempotent and all-or-nothing.

use crate::core::error::{Result, VxError};
use crate::core::zones::{zlog, Zone};

/// One plane of row-major storage. `strides` are byte steps per
/// dimension and are only meaningful once the plane is allocated.
#[derive(Debug, Clone)]
pub struct Plane {
    /// Bytes per element.
    pub elem: usize,
    /// Element counts per dimension, innermost first.
    pub dims: Vec<usize>,
    pub strides: Vec<usize>,
    buf: Option<Vec<u8>>,
}

impl Plane {
    pub fn new(elem: usize, dims: &[usize]) -> Self {
        Self { elem, dims: dims.to_vec(), strides: vec![0; dims.len()], buf: None }
    }

    /// Total byte size once allocated.
    pub fn size(&self) -> usize {
        self.elem * self.dims.iter().product::<usize>()
    }

    fn reserve(&self) -> Result<Vec<u8>> {
        let size = self.size();
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)
            .map_err(|_| VxError::NoMemory(format!("plane of {size} bytes")))?;
        buf.resize(size, 0);
        Ok(buf)
    }

    fn compute_strides(&mut self) {
        let mut step = self.elem;
        for (stride, dim) in self.strides.iter_mut().zip(&self.dims) {
            *stride = step;
            step *= *dim;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Memory {
    planes: Vec<Plane>,
    allocated: bool,
}

impl Memory {
    pub fn new(planes: Vec<Plane>) -> Self {
        Self { planes, allocated: false }
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, index: usize) -> Result<&Plane> {
        self.planes
            .get(index)
            .ok_or_else(|| VxError::InvalidParameters(format!("plane index {index}")))
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// Commit backing bytes for every plane. Either every plane ends up
    /// allocated or none does; repeat calls succeed without touching
    /// existing data.
    pub fn allocate(&mut self) -> Result<()> {
        if self.allocated {
            return Ok(());
        }
        let mut bufs = Vec::with_capacity(self.planes.len());
        for plane in &self.planes {
            bufs.push(plane.reserve()?);
        }
        for (plane, buf) in self.planes.iter_mut().zip(bufs) {
            plane.buf = Some(buf);
            plane.compute_strides();
        }
        self.allocated = true;
        zlog!(Zone::Memory, planes = self.planes.len(), "memory allocated");
        Ok(())
    }

    pub fn free(&mut self) {
        for plane in &mut self.planes {
            plane.buf = None;
            plane.strides.iter_mut().for_each(|s| *s = 0);
        }
        self.allocated = false;
    }

    pub fn data(&self, plane: usize) -> Result<&[u8]> {
        self.plane(plane)?
            .buf
            .as_deref()
            .ok_or_else(|| VxError::Failure("memory not allocated".into()))
    }

    pub fn data_mut(&mut self, plane: usize) -> Result<&mut [u8]> {
        self.planes
            .get_mut(plane)
            .ok_or_else(|| VxError::InvalidParameters(format!("plane index {plane}")))?
            .buf
            .as_deref_mut()
            .ok_or_else(|| VxError::Failure("memory not allocated".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_idempotent_and_preserves_contents() {
        let mut mem = Memory::new(vec![Plane::new(1, &[4, 4]), Plane::new(2, &[2, 2])]);
        assert!(!mem.is_allocated());
        assert!(mem.data(0).is_err());

        mem.allocate().unwrap();
        assert!(mem.is_allocated());
        assert_eq!(mem.data(0).unwrap().len(), 16);
        assert_eq!(mem.data(1).unwrap().len(), 8);

        mem.data_mut(0).unwrap()[5] = 0xab;
        mem.allocate().unwrap();
        assert_eq!(mem.data(0).unwrap()[5], 0xab);
    }

    #[test]
    fn strides_follow_dims() {
        let mut mem = Memory::new(vec![Plane::new(2, &[8, 4])]);
        mem.allocate().unwrap();
        let plane = mem.plane(0).unwrap();
        assert_eq!(plane.strides, vec![2, 16]);
        assert_eq!(plane.size(), 64);
    }

    #[test]
    fn free_returns_to_unallocated() {
        let mut mem = Memory::new(vec![Plane::new(1, &[3])]);
        mem.allocate().unwrap();
        mem.free();
        assert!(!mem.is_allocated());
        assert!(mem.data(0).is_err());
    }

    #[test]
    fn bad_plane_index_is_rejected() {
        let mem = Memory::new(vec![Plane::new(1, &[3])]);
        assert!(matches!(mem.plane(1), Err(VxError::InvalidParameters(_))));
    }
}
