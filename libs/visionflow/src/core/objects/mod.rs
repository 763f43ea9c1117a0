pub mod array;
pub mod convolution;
pub mod delay;
pub mod distribution;
pub mod image;
pub mod lut;
pub mod matrix;
pub mod pyramid;
pub mod remap;
pub mod scalar;
pub mod threshold;

use crate::core::error::Result;
use crate::core::handles::Reference;
use crate::core::types::RefKind;

macro_rules! reference_downcast {
    ($fn:ident, $kind:ident, $ty:ty) => {
        impl Reference {
            /// Downcast, checking the live object's kind.
            pub fn $fn(&self) -> Result<$ty> {
                self.ctx.check_kind(self.id, RefKind::$kind)?;
                Ok(<$ty>::from_parts(self.ctx.clone(), self.id))
            }
        }
    };
}

reference_downcast!(into_image, Image, image::Image);
reference_downcast!(into_array, Array, array::Array);
reference_downcast!(into_scalar, Scalar, scalar::Scalar);
reference_downcast!(into_matrix, Matrix, matrix::Matrix);
reference_downcast!(into_convolution, Convolution, convolution::Convolution);
reference_downcast!(into_distribution, Distribution, distribution::Distribution);
reference_downcast!(into_lut, Lut, lut::Lut);
reference_downcast!(into_pyramid, Pyramid, pyramid::Pyramid);
reference_downcast!(into_remap, Remap, remap::Remap);
reference_downcast!(into_threshold, Threshold, threshold::Threshold);

impl Reference {
    pub fn kind(&self) -> Result<RefKind> {
        self.ctx.ref_kind(self.id)
    }
}
