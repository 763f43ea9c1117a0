use crate::core::context::Context;
use crate::core::error::{Result, VxError};
use crate::core::handles::object_handle;
use crate::core::reference::{RefHeader, RefId, Scope, VxObject};
use crate::core::types::{ItemType, RefKind};
use crate::core::zones::{zlog, Zone};

/// Bounded, append-only item storage. Virtual arrays start with no
/// item type and adopt one during graph verification.
pub(crate) struct ArrayState {
    pub item_type: Option<ItemType>,
    pub capacity: usize,
    pub data: Vec<u8>,
}

impl ArrayState {
    pub fn new(item_type: Option<ItemType>, capacity: usize) -> Self {
        Self { item_type, capacity, data: Vec::new() }
    }

    pub fn item_size(&self) -> usize {
        self.item_type.map(ItemType::size).unwrap_or(0)
    }

    pub fn num_items(&self) -> usize {
        let size = self.item_size();
        if size == 0 { 0 } else { self.data.len() / size }
    }
}

object_handle! {
    /// Handle to an array object.
    Array, Array
}

impl Array {
    pub fn item_type(&self) -> Result<ItemType> {
        self.ctx.with_array(self.id, |a| {
            a.item_type
                .ok_or_else(|| VxError::InvalidType("virtual array is still unresolved".into()))
        })
    }

    pub fn capacity(&self) -> Result<usize> {
        self.ctx.with_array(self.id, |a| Ok(a.capacity))
    }

    pub fn num_items(&self) -> Result<usize> {
        self.ctx.with_array(self.id, |a| Ok(a.num_items()))
    }

    /// Append raw items. The byte length must be a whole number of
    /// items and fit in the remaining capacity.
    pub fn add_items(&self, bytes: &[u8]) -> Result<()> {
        self.ctx.with_array_mut(self.id, |a, header| {
            if header.is_virtual {
                return Err(VxError::InvalidScope(
                    "virtual array data is only visible to its graph".into(),
                ));
            }
            push_items(a, bytes)?;
            header.write_count += 1;
            Ok(())
        })?;
        self.ctx.contaminate(self.id);
        Ok(())
    }

    /// Copy out items `[start, end)`.
    pub fn copy_range(&self, start: usize, end: usize) -> Result<Vec<u8>> {
        let out = self.ctx.with_array_mut(self.id, |a, header| {
            if header.is_virtual {
                return Err(VxError::InvalidScope(
                    "virtual array data is only visible to its graph".into(),
                ));
            }
            let size = a.item_size();
            if start > end || end > a.num_items() {
                return Err(VxError::InvalidParameters(format!(
                    "range {start}..{end} of {} items",
                    a.num_items()
                )));
            }
            header.read_count += 1;
            Ok(a.data[start * size..end * size].to_vec())
        })?;
        Ok(out)
    }

    /// Drop items from the tail, keeping `new_len`.
    pub fn truncate(&self, new_len: usize) -> Result<()> {
        self.ctx.with_array_mut(self.id, |a, header| {
            if new_len > a.num_items() {
                return Err(VxError::InvalidParameters(format!(
                    "truncate to {new_len} of {} items",
                    a.num_items()
                )));
            }
            a.data.truncate(new_len * a.item_size());
            header.write_count += 1;
            Ok(())
        })?;
        self.ctx.contaminate(self.id);
        Ok(())
    }
}

fn push_items(a: &mut ArrayState, bytes: &[u8]) -> Result<()> {
    let size = a.item_size();
    if size == 0 || bytes.len() % size != 0 {
        return Err(VxError::InvalidParameters(format!(
            "{} bytes is not a whole number of {size}-byte items",
            bytes.len()
        )));
    }
    let added = bytes.len() / size;
    if a.num_items() + added > a.capacity {
        return Err(VxError::NoResources(format!(
            "array capacity {} exceeded by {} items",
            a.capacity,
            a.num_items() + added
        )));
    }
    a.data.extend_from_slice(bytes);
    Ok(())
}

impl Context {
    pub fn create_array(&self, item_type: ItemType, capacity: usize) -> Result<Array> {
        if capacity == 0 {
            return Err(VxError::InvalidParameters("zero-capacity array".into()));
        }
        let id = self.insert_object(
            RefHeader::new(RefKind::Array, Scope::Context),
            VxObject::Array(ArrayState::new(Some(item_type), capacity)),
        );
        zlog!(Zone::Api, array = %id, ?item_type, capacity, "array created");
        Ok(Array::from_parts(self.clone(), id))
    }

    pub(crate) fn with_array<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&ArrayState) -> Result<T>,
    ) -> Result<T> {
        let refs = self.refs();
        f(refs.get(id)?.object.as_array()?)
    }

    pub(crate) fn with_array_mut<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&mut ArrayState, &mut RefHeader) -> Result<T>,
    ) -> Result<T> {
        let mut refs = self.refs();
        let crate::core::reference::Entry { header, object } = refs.get_mut(id)?;
        f(object.as_array_mut()?, header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ScalarType;

    #[test]
    fn append_and_read_back() {
        let ctx = Context::new().unwrap();
        let arr = ctx.create_array(ItemType::Scalar(ScalarType::U16), 4).unwrap();

        arr.add_items(&[1, 0, 2, 0, 3, 0]).unwrap();
        assert_eq!(arr.num_items().unwrap(), 3);
        assert_eq!(arr.copy_range(1, 3).unwrap(), vec![2, 0, 3, 0]);

        arr.truncate(1).unwrap();
        assert_eq!(arr.num_items().unwrap(), 1);
    }

    #[test]
    fn capacity_and_item_size_are_enforced() {
        let ctx = Context::new().unwrap();
        let arr = ctx.create_array(ItemType::Scalar(ScalarType::U16), 2).unwrap();

        // 3 bytes is not a whole number of 2-byte items
        assert!(matches!(arr.add_items(&[0, 1, 2]), Err(VxError::InvalidParameters(_))));
        arr.add_items(&[0; 4]).unwrap();
        assert!(matches!(arr.add_items(&[0; 2]), Err(VxError::NoResources(_))));
    }
}
