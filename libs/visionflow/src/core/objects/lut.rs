use crate::core::context::Context;
use crate::core::error::{Result, VxError};
use crate::core::handles::object_handle;
use crate::core::memory::{Memory, Plane};
use crate::core::reference::{RefHeader, RefId, Scope, VxObject};
use crate::core::types::RefKind;

pub const LUT_COUNT: usize = 256;

/// 256-entry byte lookup table.
pub(crate) struct LutState {
    pub memory: Memory,
}

impl LutState {
    pub fn new() -> Self {
        Self { memory: Memory::new(vec![Plane::new(1, &[LUT_COUNT])]) }
    }
}

object_handle! {
    /// Handle to a lookup table object.
    Lut, Lut
}

impl Lut {
    pub fn count(&self) -> Result<usize> {
        self.ctx.with_lut(self.id, |l| Ok(l.memory.plane(0)?.dims[0]))
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        self.ctx.with_lut_mut(self.id, |l, header| {
            l.memory.allocate()?;
            header.read_count += 1;
            Ok(l.memory.data(0)?.to_vec())
        })
    }

    pub fn write(&self, table: &[u8]) -> Result<()> {
        self.ctx.with_lut_mut(self.id, |l, header| {
            if table.len() != LUT_COUNT {
                return Err(VxError::InvalidParameters(format!(
                    "{} entries for a {LUT_COUNT}-entry table",
                    table.len()
                )));
            }
            l.memory.allocate()?;
            l.memory.data_mut(0)?.copy_from_slice(table);
            header.write_count += 1;
            Ok(())
        })?;
        self.ctx.contaminate(self.id);
        Ok(())
    }
}

impl Context {
    /// Only full 256-entry byte tables are supported.
    pub fn create_lut(&self, count: usize) -> Result<Lut> {
        if count != LUT_COUNT {
            return Err(VxError::InvalidParameters(format!(
                "lookup tables hold exactly {LUT_COUNT} byte entries, requested {count}"
            )));
        }
        let id = self.insert_object(
            RefHeader::new(RefKind::Lut, Scope::Context),
            VxObject::Lut(LutState::new()),
        );
        Ok(Lut::from_parts(self.clone(), id))
    }

    pub(crate) fn with_lut<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&LutState) -> Result<T>,
    ) -> Result<T> {
        let refs = self.refs();
        f(refs.get(id)?.object.as_lut()?)
    }

    pub(crate) fn with_lut_mut<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&mut LutState, &mut RefHeader) -> Result<T>,
    ) -> Result<T> {
        let mut refs = self.refs();
        let crate::core::reference::Entry { header, object } = refs.get_mut(id)?;
        f(object.as_lut_mut()?, header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_full_byte_tables() {
        let ctx = Context::new().unwrap();
        assert!(matches!(ctx.create_lut(128), Err(VxError::InvalidParameters(_))));
        let lut = ctx.create_lut(256).unwrap();
        assert_eq!(lut.count().unwrap(), 256);

        let table: Vec<u8> = (0..=255).rev().collect();
        lut.write(&table).unwrap();
        assert_eq!(lut.read().unwrap()[0], 255);
        assert!(matches!(lut.write(&[0; 16]), Err(VxError::InvalidParameters(_))));
    }
}
