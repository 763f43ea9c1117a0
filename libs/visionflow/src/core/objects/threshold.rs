use crate::core::context::Context;
use crate::core::error::{Result, VxError};
use crate::core::handles::object_handle;
use crate::core::reference::{RefHeader, RefId, Scope, VxObject};
use crate::core::types::RefKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdKind {
    /// Single cut value.
    Binary,
    /// Inclusive `[lower, upper]` band.
    Range,
}

pub(crate) struct ThresholdState {
    pub kind: ThresholdKind,
    pub value: i32,
    pub lower: i32,
    pub upper: i32,
    pub true_value: u8,
    pub false_value: u8,
}

impl ThresholdState {
    pub fn new(kind: ThresholdKind) -> Self {
        Self { kind, value: 0, lower: 0, upper: 0, true_value: 255, false_value: 0 }
    }
}

object_handle! {
    /// Handle to a threshold object.
    Threshold, Threshold
}

impl Threshold {
    pub fn kind(&self) -> Result<ThresholdKind> {
        self.ctx.with_threshold(self.id, |t| Ok(t.kind))
    }

    pub fn value(&self) -> Result<i32> {
        self.ctx.with_threshold(self.id, |t| Ok(t.value))
    }

    pub fn bounds(&self) -> Result<(i32, i32)> {
        self.ctx.with_threshold(self.id, |t| Ok((t.lower, t.upper)))
    }

    pub fn set_value(&self, value: i32) -> Result<()> {
        self.ctx.with_threshold_mut(self.id, |t| {
            if t.kind != ThresholdKind::Binary {
                return Err(VxError::InvalidParameters(
                    "single cut value only applies to binary thresholds".into(),
                ));
            }
            t.value = value;
            Ok(())
        })?;
        self.ctx.note_write(self.id)?;
        Ok(())
    }

    pub fn set_bounds(&self, lower: i32, upper: i32) -> Result<()> {
        self.ctx.with_threshold_mut(self.id, |t| {
            if t.kind != ThresholdKind::Range {
                return Err(VxError::InvalidParameters(
                    "bounds only apply to range thresholds".into(),
                ));
            }
            if lower > upper {
                return Err(VxError::InvalidValue(format!("threshold band {lower}..={upper}")));
            }
            t.lower = lower;
            t.upper = upper;
            Ok(())
        })?;
        self.ctx.note_write(self.id)?;
        Ok(())
    }
}

impl Context {
    pub fn create_threshold(&self, kind: ThresholdKind) -> Result<Threshold> {
        let id = self.insert_object(
            RefHeader::new(RefKind::Threshold, Scope::Context),
            VxObject::Threshold(ThresholdState::new(kind)),
        );
        Ok(Threshold::from_parts(self.clone(), id))
    }

    pub(crate) fn with_threshold<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&ThresholdState) -> Result<T>,
    ) -> Result<T> {
        let refs = self.refs();
        f(refs.get(id)?.object.as_threshold()?)
    }

    pub(crate) fn with_threshold_mut<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&mut ThresholdState) -> Result<T>,
    ) -> Result<T> {
        let mut refs = self.refs();
        f(refs.get_mut(id)?.object.as_threshold_mut()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_gate_their_setters() {
        let ctx = Context::new().unwrap();
        let bin = ctx.create_threshold(ThresholdKind::Binary).unwrap();
        bin.set_value(42).unwrap();
        assert_eq!(bin.value().unwrap(), 42);
        assert!(matches!(bin.set_bounds(0, 9), Err(VxError::InvalidParameters(_))));

        let range = ctx.create_threshold(ThresholdKind::Range).unwrap();
        range.set_bounds(10, 20).unwrap();
        assert_eq!(range.bounds().unwrap(), (10, 20));
        assert!(matches!(range.set_bounds(20, 10), Err(VxError::InvalidValue(_))));
        assert!(matches!(range.set_value(3), Err(VxError::InvalidParameters(_))));
    }
}
