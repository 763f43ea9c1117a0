use crate::core::context::Context;
use crate::core::error::{Result, VxError};
use crate::core::handles::object_handle;
use crate::core::memory::{Memory, Plane};
use crate::core::reference::{RefHeader, RefId, Scope, VxObject};
use crate::core::types::RefKind;

/// Convolution dimensions must be odd so the kernel has a center tap.
const MIN_DIM: usize = 3;
const MAX_DIM: usize = 15;

/// Signed 16-bit coefficient grid with a power-of-two post-shift.
pub(crate) struct ConvolutionState {
    pub columns: usize,
    pub rows: usize,
    pub scale: u32,
    pub memory: Memory,
}

impl ConvolutionState {
    pub fn new(columns: usize, rows: usize) -> Self {
        let memory = Memory::new(vec![Plane::new(2, &[columns, rows])]);
        Self { columns, rows, scale: 1, memory }
    }

    pub fn coefficients(&mut self) -> Result<Vec<i16>> {
        self.memory.allocate()?;
        Ok(self
            .memory
            .data(0)?
            .chunks_exact(2)
            .map(|c| i16::from_ne_bytes([c[0], c[1]]))
            .collect())
    }
}

object_handle! {
    /// Handle to a convolution coefficient object.
    Convolution, Convolution
}

impl Convolution {
    pub fn columns(&self) -> Result<usize> {
        self.ctx.with_convolution(self.id, |c| Ok(c.columns))
    }

    pub fn rows(&self) -> Result<usize> {
        self.ctx.with_convolution(self.id, |c| Ok(c.rows))
    }

    pub fn scale(&self) -> Result<u32> {
        self.ctx.with_convolution(self.id, |c| Ok(c.scale))
    }

    /// Divisor applied after the weighted sum; must be a power of two.
    pub fn set_scale(&self, scale: u32) -> Result<()> {
        self.ctx.with_convolution_mut(self.id, |c, header| {
            if scale == 0 || !scale.is_power_of_two() {
                return Err(VxError::InvalidValue(format!(
                    "convolution scale {scale} is not a power of two"
                )));
            }
            c.scale = scale;
            header.write_count += 1;
            Ok(())
        })?;
        self.ctx.contaminate(self.id);
        Ok(())
    }

    pub fn write_coefficients(&self, coeffs: &[i16]) -> Result<()> {
        self.ctx.with_convolution_mut(self.id, |c, header| {
            if coeffs.len() != c.columns * c.rows {
                return Err(VxError::InvalidParameters(format!(
                    "{} coefficients for a {}x{} convolution",
                    coeffs.len(),
                    c.columns,
                    c.rows
                )));
            }
            c.memory.allocate()?;
            let dst = c.memory.data_mut(0)?;
            for (i, v) in coeffs.iter().enumerate() {
                dst[i * 2..i * 2 + 2].copy_from_slice(&v.to_ne_bytes());
            }
            header.write_count += 1;
            Ok(())
        })?;
        self.ctx.contaminate(self.id);
        Ok(())
    }

    pub fn read_coefficients(&self) -> Result<Vec<i16>> {
        self.ctx.with_convolution_mut(self.id, |c, header| {
            header.read_count += 1;
            c.coefficients()
        })
    }
}

impl Context {
    pub fn create_convolution(&self, columns: usize, rows: usize) -> Result<Convolution> {
        for dim in [columns, rows] {
            if dim % 2 == 0 || !(MIN_DIM..=MAX_DIM).contains(&dim) {
                return Err(VxError::InvalidDimension(format!(
                    "convolution dimension {dim}: odd sizes in {MIN_DIM}..={MAX_DIM} only"
                )));
            }
        }
        let id = self.insert_object(
            RefHeader::new(RefKind::Convolution, Scope::Context),
            VxObject::Convolution(ConvolutionState::new(columns, rows)),
        );
        Ok(Convolution::from_parts(self.clone(), id))
    }

    pub(crate) fn with_convolution<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&ConvolutionState) -> Result<T>,
    ) -> Result<T> {
        let refs = self.refs();
        f(refs.get(id)?.object.as_convolution()?)
    }

    pub(crate) fn with_convolution_mut<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&mut ConvolutionState, &mut RefHeader) -> Result<T>,
    ) -> Result<T> {
        let mut refs = self.refs();
        let crate::core::reference::Entry { header, object } = refs.get_mut(id)?;
        f(object.as_convolution_mut()?, header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_dimensions() {
        let ctx = Context::new().unwrap();
        assert!(ctx.create_convolution(3, 5).is_ok());
        assert!(matches!(ctx.create_convolution(4, 3), Err(VxError::InvalidDimension(_))));
        assert!(matches!(ctx.create_convolution(1, 3), Err(VxError::InvalidDimension(_))));
        assert!(matches!(ctx.create_convolution(17, 3), Err(VxError::InvalidDimension(_))));
    }

    #[test]
    fn scale_must_be_power_of_two() {
        let ctx = Context::new().unwrap();
        let conv = ctx.create_convolution(3, 3).unwrap();
        assert_eq!(conv.scale().unwrap(), 1);
        conv.set_scale(16).unwrap();
        assert_eq!(conv.scale().unwrap(), 16);
        assert!(matches!(conv.set_scale(3), Err(VxError::InvalidValue(_))));
        assert!(matches!(conv.set_scale(0), Err(VxError::InvalidValue(_))));
    }

    #[test]
    fn coefficient_round_trip() {
        let ctx = Context::new().unwrap();
        let conv = ctx.create_convolution(3, 3).unwrap();
        let taps: Vec<i16> = vec![1, 2, 1, 2, 4, 2, 1, 2, 1];
        conv.write_coefficients(&taps).unwrap();
        assert_eq!(conv.read_coefficients().unwrap(), taps);
        assert!(matches!(
            conv.write_coefficients(&[0; 4]),
            Err(VxError::InvalidParameters(_))
        ));
    }
}
