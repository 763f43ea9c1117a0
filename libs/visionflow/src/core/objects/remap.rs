use crate::core::context::Context;
use crate::core::error::{Result, VxError};
use crate::core::handles::object_handle;
use crate::core::memory::{Memory, Plane};
use crate::core::reference::{RefHeader, RefId, Scope, VxObject};
use crate::core::types::RefKind;

/// Coordinate map: one (src_x, src_y) float pair per destination pixel.
pub(crate) struct RemapState {
    pub src_width: u32,
    pub src_height: u32,
    pub dst_width: u32,
    pub dst_height: u32,
    pub memory: Memory,
}

impl RemapState {
    pub fn new(src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> Self {
        let memory =
            Memory::new(vec![Plane::new(8, &[dst_width as usize, dst_height as usize])]);
        Self { src_width, src_height, dst_width, dst_height, memory }
    }
}

object_handle! {
    /// Handle to a remap table.
    Remap, Remap
}

impl Remap {
    pub fn src_dims(&self) -> Result<(u32, u32)> {
        self.ctx.with_remap(self.id, |r| Ok((r.src_width, r.src_height)))
    }

    pub fn dst_dims(&self) -> Result<(u32, u32)> {
        self.ctx.with_remap(self.id, |r| Ok((r.dst_width, r.dst_height)))
    }

    /// Set the source coordinate sampled for destination pixel (x, y).
    pub fn set_point(&self, dst_x: u32, dst_y: u32, src_x: f32, src_y: f32) -> Result<()> {
        self.ctx.with_remap_mut(self.id, |r, header| {
            if dst_x >= r.dst_width || dst_y >= r.dst_height {
                return Err(VxError::InvalidParameters(format!(
                    "point ({dst_x}, {dst_y}) outside {}x{} map",
                    r.dst_width, r.dst_height
                )));
            }
            r.memory.allocate()?;
            let off = (dst_y as usize * r.dst_width as usize + dst_x as usize) * 8;
            let dst = r.memory.data_mut(0)?;
            dst[off..off + 4].copy_from_slice(&src_x.to_ne_bytes());
            dst[off + 4..off + 8].copy_from_slice(&src_y.to_ne_bytes());
            header.write_count += 1;
            Ok(())
        })?;
        self.ctx.contaminate(self.id);
        Ok(())
    }

    pub fn point(&self, dst_x: u32, dst_y: u32) -> Result<(f32, f32)> {
        self.ctx.with_remap_mut(self.id, |r, header| {
            if dst_x >= r.dst_width || dst_y >= r.dst_height {
                return Err(VxError::InvalidParameters(format!(
                    "point ({dst_x}, {dst_y}) outside {}x{} map",
                    r.dst_width, r.dst_height
                )));
            }
            r.memory.allocate()?;
            header.read_count += 1;
            let off = (dst_y as usize * r.dst_width as usize + dst_x as usize) * 8;
            let data = r.memory.data(0)?;
            let sx = f32::from_ne_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]);
            let sy =
                f32::from_ne_bytes([data[off + 4], data[off + 5], data[off + 6], data[off + 7]]);
            Ok((sx, sy))
        })
    }
}

impl Context {
    pub fn create_remap(
        &self,
        src_width: u32,
        src_height: u32,
        dst_width: u32,
        dst_height: u32,
    ) -> Result<Remap> {
        if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
            return Err(VxError::InvalidDimension(format!(
                "remap {src_width}x{src_height} -> {dst_width}x{dst_height}"
            )));
        }
        let id = self.insert_object(
            RefHeader::new(RefKind::Remap, Scope::Context),
            VxObject::Remap(RemapState::new(src_width, src_height, dst_width, dst_height)),
        );
        Ok(Remap::from_parts(self.clone(), id))
    }

    pub(crate) fn with_remap<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&RemapState) -> Result<T>,
    ) -> Result<T> {
        let refs = self.refs();
        f(refs.get(id)?.object.as_remap()?)
    }

    pub(crate) fn with_remap_mut<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&mut RemapState, &mut RefHeader) -> Result<T>,
    ) -> Result<T> {
        let mut refs = self.refs();
        let crate::core::reference::Entry { header, object } = refs.get_mut(id)?;
        f(object.as_remap_mut()?, header)
    }
}
