use crate::core::context::Context;
use crate::core::error::{Result, VxError};
use crate::core::handles::object_handle;
use crate::core::reference::{RefHeader, RefId, Scope, VxObject};
use crate::core::types::{RefKind, ScalarType, ScalarValue};

pub(crate) struct ScalarState {
    pub value: ScalarValue,
}

impl ScalarState {
    pub fn new(value: ScalarValue) -> Self {
        Self { value }
    }
}

object_handle! {
    /// Handle to a single typed value.
    Scalar, Scalar
}

impl Scalar {
    pub fn data_type(&self) -> Result<ScalarType> {
        self.ctx.with_scalar(self.id, |s| Ok(s.value.data_type()))
    }

    pub fn get(&self) -> Result<ScalarValue> {
        let v = self.ctx.with_scalar(self.id, |s| Ok(s.value))?;
        self.ctx.note_read(self.id)?;
        Ok(v)
    }

    /// Replace the value. The type is fixed at creation; graphs reading
    /// this scalar are marked for re-verification.
    pub fn set(&self, value: ScalarValue) -> Result<()> {
        self.ctx.with_scalar_mut(self.id, |s| {
            if s.value.data_type() != value.data_type() {
                return Err(VxError::InvalidType(format!(
                    "scalar holds {:?}, wrote {:?}",
                    s.value.data_type(),
                    value.data_type()
                )));
            }
            s.value = value;
            Ok(())
        })?;
        self.ctx.note_write(self.id)?;
        Ok(())
    }
}

impl Context {
    pub fn create_scalar(&self, value: ScalarValue) -> Result<Scalar> {
        let id = self.insert_object(
            RefHeader::new(RefKind::Scalar, Scope::Context),
            VxObject::Scalar(ScalarState::new(value)),
        );
        Ok(Scalar::from_parts(self.clone(), id))
    }

    pub(crate) fn with_scalar<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&ScalarState) -> Result<T>,
    ) -> Result<T> {
        let refs = self.refs();
        f(refs.get(id)?.object.as_scalar()?)
    }

    pub(crate) fn with_scalar_mut<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&mut ScalarState) -> Result<T>,
    ) -> Result<T> {
        let mut refs = self.refs();
        f(refs.get_mut(id)?.object.as_scalar_mut()?)
    }

    /// Kernel-side accessors.
    pub(crate) fn read_scalar_value(&self, id: RefId) -> Result<ScalarValue> {
        self.with_scalar(id, |s| Ok(s.value))
    }

    pub(crate) fn write_scalar_value(&self, id: RefId, value: ScalarValue) -> Result<()> {
        self.with_scalar_mut(id, |s| {
            if s.value.data_type() != value.data_type() {
                return Err(VxError::InvalidType(format!(
                    "scalar holds {:?}, wrote {:?}",
                    s.value.data_type(),
                    value.data_type()
                )));
            }
            s.value = value;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_keeps_the_created_type() {
        let ctx = Context::new().unwrap();
        let s = ctx.create_scalar(ScalarValue::I32(-3)).unwrap();
        assert_eq!(s.data_type().unwrap(), ScalarType::I32);
        assert_eq!(s.get().unwrap(), ScalarValue::I32(-3));

        s.set(ScalarValue::I32(11)).unwrap();
        assert_eq!(s.get().unwrap(), ScalarValue::I32(11));

        assert!(matches!(s.set(ScalarValue::F32(1.0)), Err(VxError::InvalidType(_))));
    }
}
