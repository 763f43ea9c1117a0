use serde::{Deserialize, Serialize};

/// Direction of a kernel parameter relative to the kernel body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
    Bidirectional,
}

impl Direction {
    /// A bidirectional parameter both reads and writes its object.
    pub fn writes(self) -> bool {
        matches!(self, Direction::Output | Direction::Bidirectional)
    }

    pub fn reads(self) -> bool {
        matches!(self, Direction::Input | Direction::Bidirectional)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamState {
    Required,
    Optional,
}

/// Closed set of framework and data object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefKind {
    Image,
    Array,
    Scalar,
    Matrix,
    Convolution,
    Distribution,
    Lut,
    Pyramid,
    Remap,
    Threshold,
    Delay,
    Graph,
}

impl RefKind {
    /// Data objects may be aged through a delay; framework objects may not.
    pub fn is_data(self) -> bool {
        !matches!(self, RefKind::Delay | RefKind::Graph)
    }
}

impl std::fmt::Display for RefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Pixel layout of an image. `Virt` marks a virtual image whose format
/// is unknown until graph verification resolves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    Virt,
    U8,
    U16,
    S16,
    S32,
    Rgb,
    Rgbx,
    Nv12,
    Iyuv,
}

impl ImageFormat {
    pub fn plane_count(self) -> usize {
        match self {
            ImageFormat::Virt => 0,
            ImageFormat::U8
            | ImageFormat::U16
            | ImageFormat::S16
            | ImageFormat::S32
            | ImageFormat::Rgb
            | ImageFormat::Rgbx => 1,
            ImageFormat::Nv12 => 2,
            ImageFormat::Iyuv => 3,
        }
    }

    /// Bytes per addressable element in the given plane.
    pub fn pixel_size(self, plane: usize) -> usize {
        match (self, plane) {
            (ImageFormat::U8, 0) => 1,
            (ImageFormat::U16, 0) | (ImageFormat::S16, 0) => 2,
            (ImageFormat::S32, 0) => 4,
            (ImageFormat::Rgb, 0) => 3,
            (ImageFormat::Rgbx, 0) => 4,
            (ImageFormat::Nv12, 0) => 1,
            // interleaved UV pair
            (ImageFormat::Nv12, 1) => 2,
            (ImageFormat::Iyuv, _) => 1,
            _ => 0,
        }
    }

    /// Subsampling divisors (x, y) for the given plane.
    pub fn subsampling(self, plane: usize) -> (u32, u32) {
        match (self, plane) {
            (ImageFormat::Nv12, 1) => (2, 2),
            (ImageFormat::Iyuv, 1) | (ImageFormat::Iyuv, 2) => (2, 2),
            _ => (1, 1),
        }
    }
}

/// Border handling policy for neighborhood kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorderMode {
    /// Border output pixels are left unwritten.
    #[default]
    Undefined,
    /// Out-of-bounds reads yield the given constant.
    Constant(u8),
    /// Out-of-bounds reads clamp to the nearest edge pixel.
    Replicate,
}

/// Verdict returned by a node completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    Abandon,
}

/// Half-open pixel region: `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rectangle {
    pub start_x: u32,
    pub start_y: u32,
    pub end_x: u32,
    pub end_y: u32,
}

impl Rectangle {
    pub fn new(start_x: u32, start_y: u32, end_x: u32, end_y: u32) -> Self {
        Self { start_x, start_y, end_x, end_y }
    }

    pub fn width(&self) -> u32 {
        self.end_x.saturating_sub(self.start_x)
    }

    pub fn height(&self) -> u32 {
        self.end_y.saturating_sub(self.start_y)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Element type carried by scalars, matrices and arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    Bool,
    Enum,
    Size,
}

impl ScalarType {
    pub fn size(self) -> usize {
        match self {
            ScalarType::U8 | ScalarType::I8 | ScalarType::Bool => 1,
            ScalarType::U16 | ScalarType::I16 => 2,
            ScalarType::U32 | ScalarType::I32 | ScalarType::Enum | ScalarType::F32 => 4,
            ScalarType::U64 | ScalarType::I64 | ScalarType::F64 | ScalarType::Size => 8,
        }
    }
}

/// A typed scalar payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Enum(u32),
    Size(usize),
}

impl ScalarValue {
    pub fn data_type(&self) -> ScalarType {
        match self {
            ScalarValue::U8(_) => ScalarType::U8,
            ScalarValue::I8(_) => ScalarType::I8,
            ScalarValue::U16(_) => ScalarType::U16,
            ScalarValue::I16(_) => ScalarType::I16,
            ScalarValue::U32(_) => ScalarType::U32,
            ScalarValue::I32(_) => ScalarType::I32,
            ScalarValue::U64(_) => ScalarType::U64,
            ScalarValue::I64(_) => ScalarType::I64,
            ScalarValue::F32(_) => ScalarType::F32,
            ScalarValue::F64(_) => ScalarType::F64,
            ScalarValue::Bool(_) => ScalarType::Bool,
            ScalarValue::Enum(_) => ScalarType::Enum,
            ScalarValue::Size(_) => ScalarType::Size,
        }
    }
}

/// Item layouts storable in arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    Scalar(ScalarType),
    Coordinates2d,
    Keypoint,
    Rectangle,
}

impl ItemType {
    pub fn size(self) -> usize {
        match self {
            ItemType::Scalar(t) => t.size(),
            // two i32 coordinates
            ItemType::Coordinates2d => 8,
            // x, y, strength, scale, orientation, tracking_status, error
            ItemType::Keypoint => 28,
            ItemType::Rectangle => 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsampled_plane_geometry() {
        assert_eq!(ImageFormat::Nv12.plane_count(), 2);
        assert_eq!(ImageFormat::Nv12.pixel_size(1), 2);
        assert_eq!(ImageFormat::Nv12.subsampling(1), (2, 2));
        assert_eq!(ImageFormat::Iyuv.plane_count(), 3);
        assert_eq!(ImageFormat::Iyuv.subsampling(2), (2, 2));
        assert_eq!(ImageFormat::U8.subsampling(0), (1, 1));
        assert_eq!(ImageFormat::Virt.plane_count(), 0);
    }

    #[test]
    fn direction_read_write_split() {
        assert!(Direction::Bidirectional.reads());
        assert!(Direction::Bidirectional.writes());
        assert!(!Direction::Input.writes());
        assert!(!Direction::Output.reads());
    }

    #[test]
    fn rectangle_extents() {
        let r = Rectangle::new(2, 3, 10, 7);
        assert_eq!(r.width(), 8);
        assert_eq!(r.height(), 4);
        assert!(!r.is_empty());
        assert!(Rectangle::new(5, 5, 5, 9).is_empty());
    }

    #[test]
    fn scalar_value_reports_its_type() {
        assert_eq!(ScalarValue::F32(1.5).data_type(), ScalarType::F32);
        assert_eq!(ScalarType::Size.size(), 8);
        assert_eq!(ItemType::Keypoint.size(), 28);
    }
}
