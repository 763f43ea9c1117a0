use crate::core::context::Context;
use crate::core::error::{Result, VxError};
use crate::core::handles::object_handle;
use crate::core::memory::{Memory, Plane};
use crate::core::reference::{RefHeader, RefId, Scope, VxObject};
use crate::core::types::{RefKind, ScalarType};

pub(crate) struct MatrixState {
    pub data_type: ScalarType,
    pub columns: usize,
    pub rows: usize,
    pub memory: Memory,
}

impl MatrixState {
    pub fn new(data_type: ScalarType, columns: usize, rows: usize) -> Self {
        let memory = Memory::new(vec![Plane::new(data_type.size(), &[columns, rows])]);
        Self { data_type, columns, rows, memory }
    }

    pub fn byte_len(&self) -> usize {
        self.columns * self.rows * self.data_type.size()
    }
}

object_handle! {
    /// Handle to a dense 2D coefficient matrix.
    Matrix, Matrix
}

impl Matrix {
    pub fn data_type(&self) -> Result<ScalarType> {
        self.ctx.with_matrix(self.id, |m| Ok(m.data_type))
    }

    pub fn columns(&self) -> Result<usize> {
        self.ctx.with_matrix(self.id, |m| Ok(m.columns))
    }

    pub fn rows(&self) -> Result<usize> {
        self.ctx.with_matrix(self.id, |m| Ok(m.rows))
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        self.ctx.with_matrix_mut(self.id, |m, header| {
            m.memory.allocate()?;
            header.read_count += 1;
            Ok(m.memory.data(0)?.to_vec())
        })
    }

    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        self.ctx.with_matrix_mut(self.id, |m, header| {
            if bytes.len() != m.byte_len() {
                return Err(VxError::InvalidParameters(format!(
                    "wrote {} bytes into a {} byte matrix",
                    bytes.len(),
                    m.byte_len()
                )));
            }
            m.memory.allocate()?;
            m.memory.data_mut(0)?.copy_from_slice(bytes);
            header.write_count += 1;
            Ok(())
        })?;
        self.ctx.contaminate(self.id);
        Ok(())
    }
}

impl Context {
    pub fn create_matrix(
        &self,
        data_type: ScalarType,
        columns: usize,
        rows: usize,
    ) -> Result<Matrix> {
        if !matches!(data_type, ScalarType::U8 | ScalarType::I32 | ScalarType::F32) {
            return Err(VxError::InvalidType(format!("{data_type:?} matrix")));
        }
        if columns == 0 || rows == 0 {
            return Err(VxError::InvalidDimension(format!("{columns}x{rows} matrix")));
        }
        let id = self.insert_object(
            RefHeader::new(RefKind::Matrix, Scope::Context),
            VxObject::Matrix(MatrixState::new(data_type, columns, rows)),
        );
        Ok(Matrix::from_parts(self.clone(), id))
    }

    pub(crate) fn with_matrix<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&MatrixState) -> Result<T>,
    ) -> Result<T> {
        let refs = self.refs();
        f(refs.get(id)?.object.as_matrix()?)
    }

    pub(crate) fn with_matrix_mut<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&mut MatrixState, &mut RefHeader) -> Result<T>,
    ) -> Result<T> {
        let mut refs = self.refs();
        let crate::core::reference::Entry { header, object } = refs.get_mut(id)?;
        f(object.as_matrix_mut()?, header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_coefficients() {
        let ctx = Context::new().unwrap();
        let m = ctx.create_matrix(ScalarType::U8, 3, 2).unwrap();
        m.write(&[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(m.read().unwrap(), vec![1, 2, 3, 4, 5, 6]);
        assert!(matches!(m.write(&[0; 5]), Err(VxError::InvalidParameters(_))));
    }

    #[test]
    fn rejects_degenerate_shapes_and_types() {
        let ctx = Context::new().unwrap();
        assert!(matches!(
            ctx.create_matrix(ScalarType::U8, 0, 3),
            Err(VxError::InvalidDimension(_))
        ));
        assert!(matches!(
            ctx.create_matrix(ScalarType::F64, 3, 3),
            Err(VxError::InvalidType(_))
        ));
    }
}
