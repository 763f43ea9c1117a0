use crate::core::error::{Result, VxError};
use crate::core::types::{ImageFormat, ItemType, RefKind, ScalarType};

/// Shape requirement produced by an output validator during graph
/// verification. Virtual objects adopt it; concrete objects must match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetaFormat {
    Unset,
    Image { width: u32, height: u32, format: ImageFormat },
    Array { item_type: ItemType, capacity: usize },
    Scalar { data_type: ScalarType },
    Distribution { bins: usize, offset: i32, range: u32 },
    Pyramid { levels: usize, scale: f32, width: u32, height: u32, format: ImageFormat },
}

impl MetaFormat {
    pub fn kind(&self) -> Option<RefKind> {
        match self {
            MetaFormat::Unset => None,
            MetaFormat::Image { .. } => Some(RefKind::Image),
            MetaFormat::Array { .. } => Some(RefKind::Array),
            MetaFormat::Scalar { .. } => Some(RefKind::Scalar),
            MetaFormat::Distribution { .. } => Some(RefKind::Distribution),
            MetaFormat::Pyramid { .. } => Some(RefKind::Pyramid),
        }
    }

    /// Check the validator filled the meta in with the kind the kernel
    /// signature declares for that slot.
    pub fn expect_kind(&self, expected: RefKind) -> Result<()> {
        match self.kind() {
            Some(k) if k == expected => Ok(()),
            Some(k) => Err(VxError::InvalidType(format!(
                "output validator produced {k} meta for a {expected} parameter"
            ))),
            None => Err(VxError::InvalidType(format!(
                "output validator left meta unset for a {expected} parameter"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let m = MetaFormat::Image { width: 4, height: 4, format: ImageFormat::U8 };
        assert_eq!(m.kind(), Some(RefKind::Image));
        assert!(m.expect_kind(RefKind::Image).is_ok());
        assert!(matches!(m.expect_kind(RefKind::Array), Err(VxError::InvalidType(_))));
        assert!(matches!(MetaFormat::Unset.expect_kind(RefKind::Image), Err(VxError::InvalidType(_))));
    }
}
