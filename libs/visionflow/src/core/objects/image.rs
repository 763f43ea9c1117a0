//! Images: multi-plane raster data with lazily committed storage.
//!
//! External access is copy-in/copy-out. `access_patch` snapshots a
//! region into an owned patch and pins the image with an external
//! count; `commit_patch` copies writes back, marks dependent graphs for
//! re-verification, and unpins.

use crate::core::context::Context;
use crate::core::error::{Result, StatusAcc, VxError};
use crate::core::handles::object_handle;
use crate::core::memory::{Memory, Plane};
use crate::core::reference::{CountKind, RefHeader, RefId, Scope, VxObject};
use crate::core::types::{ImageFormat, Rectangle, RefKind};
use crate::core::zones::{zlog, Zone};

/// Fixed-point unit for patch addressing scale factors.
pub const SCALE_UNITY: u32 = 1024;

pub(crate) struct ImageState {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub memory: Memory,
}

impl ImageState {
    pub fn new(width: u32, height: u32, format: ImageFormat) -> Self {
        let mut state = Self { width, height, format, memory: Memory::default() };
        state.rebuild_planes();
        state
    }

    /// Adopt resolved geometry. Used when verification fills in a
    /// virtual image; any previously committed bytes are discarded.
    pub fn reshape(&mut self, width: u32, height: u32, format: ImageFormat) {
        self.width = width;
        self.height = height;
        self.format = format;
        self.rebuild_planes();
    }

    fn rebuild_planes(&mut self) {
        let planes = (0..self.format.plane_count())
            .map(|p| {
                let (dx, dy) = self.plane_dims(p);
                Plane::new(self.format.pixel_size(p), &[dx, dy])
            })
            .collect();
        self.memory = Memory::new(planes);
    }

    /// Element dimensions of one plane after subsampling.
    pub fn plane_dims(&self, plane: usize) -> (usize, usize) {
        let (sx, sy) = self.format.subsampling(plane);
        ((self.width / sx) as usize, (self.height / sy) as usize)
    }

    pub fn is_unresolved(&self) -> bool {
        self.format == ImageFormat::Virt || self.width == 0 || self.height == 0
    }
}

/// How a patch will be used. Write access marks the image dirty on
/// commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    fn writes(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

/// Patch addressing in the style of strided image walking: logical
/// full-resolution coordinates scaled down for subsampled planes.
#[derive(Debug, Clone, Copy)]
pub struct Addressing {
    pub dim_x: u32,
    pub dim_y: u32,
    pub stride_x: usize,
    pub stride_y: usize,
    /// `SCALE_UNITY / subsampling`, applied to logical coordinates.
    pub scale_x: u32,
    pub scale_y: u32,
    pub step_x: u32,
    pub step_y: u32,
}

/// An owned snapshot of one plane region.
pub struct ImagePatch {
    pub rect: Rectangle,
    pub plane: usize,
    pub addr: Addressing,
    pub data: Vec<u8>,
    usage: AccessMode,
    image: RefId,
}

impl ImagePatch {
    fn offset(&self, x: u32, y: u32) -> usize {
        let px = (x * self.addr.scale_x / SCALE_UNITY) as usize;
        let py = (y * self.addr.scale_y / SCALE_UNITY) as usize;
        py * self.addr.stride_y + px * self.addr.stride_x
    }

    /// Element bytes at logical patch-relative coordinates.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let off = self.offset(x, y);
        &self.data[off..off + self.addr.stride_x]
    }

    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let off = self.offset(x, y);
        let elem = self.addr.stride_x;
        &mut self.data[off..off + elem]
    }
}

object_handle! {
    /// Handle to an image object.
    Image, Image
}

impl Image {
    pub fn width(&self) -> Result<u32> {
        self.ctx.with_image(self.id, |img| Ok(img.width))
    }

    pub fn height(&self) -> Result<u32> {
        self.ctx.with_image(self.id, |img| Ok(img.height))
    }

    pub fn format(&self) -> Result<ImageFormat> {
        self.ctx.with_image(self.id, |img| Ok(img.format))
    }

    pub fn plane_count(&self) -> Result<usize> {
        self.ctx.with_image(self.id, |img| Ok(img.format.plane_count()))
    }

    /// Valid region. Kernels here always produce full frames, so this
    /// is the whole image.
    pub fn valid_region(&self) -> Result<Rectangle> {
        self.ctx
            .with_image(self.id, |img| Ok(Rectangle::new(0, 0, img.width, img.height)))
    }

    /// Map a region of one plane into an owned patch. The image stays
    /// pinned (one external count) until the patch is committed.
    pub fn access_patch(
        &self,
        rect: Option<Rectangle>,
        plane: usize,
        usage: AccessMode,
    ) -> Result<ImagePatch> {
        // attribute queries accumulate, matching the multi-query call
        // pattern of the public API
        let mut acc = StatusAcc::new();
        let width = acc.merge(self.width()).unwrap_or(0);
        let height = acc.merge(self.height()).unwrap_or(0);
        let format = acc.merge(self.format()).unwrap_or(ImageFormat::Virt);
        acc.finish()?;

        let rect = rect.unwrap_or(Rectangle { start_x: 0, start_y: 0, end_x: width, end_y: height });
        if rect.is_empty() || rect.end_x > width || rect.end_y > height {
            return Err(VxError::InvalidParameters(format!(
                "patch rect {rect:?} outside {width}x{height} image"
            )));
        }
        if plane >= format.plane_count() {
            return Err(VxError::InvalidParameters(format!("plane {plane} of {format:?} image")));
        }

        let (data, addr) = self.ctx.with_image_mut(self.id, |img, header| {
            if header.is_virtual {
                return Err(VxError::InvalidScope(
                    "virtual image data is only visible to its graph".into(),
                ));
            }
            img.memory.allocate()?;
            header.read_count += 1;

            let (sx, sy) = format.subsampling(plane);
            let (plane_w, _) = img.plane_dims(plane);
            let elem = format.pixel_size(plane);
            let x0 = (rect.start_x / sx) as usize;
            let x1 = (rect.end_x.div_ceil(sx)) as usize;
            let y0 = (rect.start_y / sy) as usize;
            let y1 = (rect.end_y.div_ceil(sy)) as usize;
            let row_bytes = (x1 - x0) * elem;

            let src = img.memory.data(plane)?;
            let mut data = vec![0u8; row_bytes * (y1 - y0)];
            for (i, py) in (y0..y1).enumerate() {
                let src_off = (py * plane_w + x0) * elem;
                data[i * row_bytes..(i + 1) * row_bytes]
                    .copy_from_slice(&src[src_off..src_off + row_bytes]);
            }

            let addr = Addressing {
                dim_x: rect.width(),
                dim_y: rect.height(),
                stride_x: elem,
                stride_y: row_bytes,
                scale_x: SCALE_UNITY / sx,
                scale_y: SCALE_UNITY / sy,
                step_x: sx,
                step_y: sy,
            };
            Ok((data, addr))
        })?;

        self.ctx.retain_id(self.id, CountKind::External)?;
        zlog!(Zone::Api, image = %self.id, plane, "patch mapped");
        Ok(ImagePatch { rect, plane, addr, data, usage, image: self.id })
    }

    /// Copy a written patch back and unpin the image. Writes mark every
    /// graph reading this image as needing re-verification.
    pub fn commit_patch(&self, patch: ImagePatch) -> Result<()> {
        if patch.image != self.id {
            return Err(VxError::InvalidParameters(
                "patch was mapped from a different image".into(),
            ));
        }
        let wrote = patch.usage.writes();
        self.ctx.with_image_mut(self.id, |img, header| {
            if wrote {
                let (sx, sy) = img.format.subsampling(patch.plane);
                let (plane_w, _) = img.plane_dims(patch.plane);
                let elem = img.format.pixel_size(patch.plane);
                let x0 = (patch.rect.start_x / sx) as usize;
                let y0 = (patch.rect.start_y / sy) as usize;
                let y1 = (patch.rect.end_y.div_ceil(sy)) as usize;
                let row_bytes = patch.addr.stride_y;

                let dst = img.memory.data_mut(patch.plane)?;
                for (i, py) in (y0..y1).enumerate() {
                    let dst_off = (py * plane_w + x0) * elem;
                    dst[dst_off..dst_off + row_bytes]
                        .copy_from_slice(&patch.data[i * row_bytes..(i + 1) * row_bytes]);
                }
                header.write_count += 1;
            }
            Ok(())
        })?;
        if wrote {
            self.ctx.contaminate(self.id);
        }
        self.ctx.release_id(self.id, CountKind::External)?;
        zlog!(Zone::Api, image = %self.id, wrote, "patch committed");
        Ok(())
    }
}

/// Owned pixel data for kernel computation, one buffer per plane.
pub struct PlaneData {
    pub dim_x: usize,
    pub dim_y: usize,
    pub elem: usize,
    pub data: Vec<u8>,
}

impl PlaneData {
    pub fn new(dim_x: usize, dim_y: usize, elem: usize) -> Self {
        Self { dim_x, dim_y, elem, data: vec![0; dim_x * dim_y * elem] }
    }

    fn offset(&self, x: usize, y: usize) -> usize {
        (y * self.dim_x + x) * self.elem
    }

    pub fn get_u8(&self, x: usize, y: usize) -> u8 {
        self.data[self.offset(x, y)]
    }

    pub fn set_u8(&mut self, x: usize, y: usize, v: u8) {
        let off = self.offset(x, y);
        self.data[off] = v;
    }

    pub fn get_i16(&self, x: usize, y: usize) -> i16 {
        let off = self.offset(x, y);
        i16::from_ne_bytes([self.data[off], self.data[off + 1]])
    }

    pub fn set_i16(&mut self, x: usize, y: usize, v: i16) {
        let off = self.offset(x, y);
        self.data[off..off + 2].copy_from_slice(&v.to_ne_bytes());
    }
}

/// Full-image snapshot used inside kernel bodies.
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub planes: Vec<PlaneData>,
}

impl ImageData {
    pub fn new(width: u32, height: u32, format: ImageFormat) -> Self {
        let planes = (0..format.plane_count())
            .map(|p| {
                let (sx, sy) = format.subsampling(p);
                PlaneData::new((width / sx) as usize, (height / sy) as usize, format.pixel_size(p))
            })
            .collect();
        Self { width, height, format, planes }
    }
}

impl Context {
    /// Create a concrete image. Subsampled formats need even extents.
    pub fn create_image(&self, width: u32, height: u32, format: ImageFormat) -> Result<Image> {
        if format == ImageFormat::Virt {
            return Err(VxError::InvalidFormat("concrete images need a concrete format".into()));
        }
        if width == 0 || height == 0 {
            return Err(VxError::InvalidDimension(format!("{width}x{height} image")));
        }
        if matches!(format, ImageFormat::Nv12 | ImageFormat::Iyuv)
            && (width % 2 != 0 || height % 2 != 0)
        {
            return Err(VxError::InvalidDimension(format!(
                "{format:?} requires even dimensions, got {width}x{height}"
            )));
        }
        let id = self.insert_object(
            RefHeader::new(RefKind::Image, Scope::Context),
            VxObject::Image(ImageState::new(width, height, format)),
        );
        zlog!(Zone::Api, image = %id, width, height, ?format, "image created");
        Ok(Image::from_parts(self.clone(), id))
    }

    /// Insert a container-owned image. The container's internal hold
    /// is the only count; no application handle exists for it.
    pub(crate) fn insert_image_internal(
        &self,
        width: u32,
        height: u32,
        format: ImageFormat,
        scope: Scope,
    ) -> RefId {
        let mut header = RefHeader::new(RefKind::Image, scope);
        header.internal_count = 1;
        self.refs()
            .insert(header, VxObject::Image(ImageState::new(width, height, format)))
    }

    pub(crate) fn with_image<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&ImageState) -> Result<T>,
    ) -> Result<T> {
        let refs = self.refs();
        f(refs.get(id)?.object.as_image()?)
    }

    pub(crate) fn with_image_mut<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&mut ImageState, &mut RefHeader) -> Result<T>,
    ) -> Result<T> {
        let mut refs = self.refs();
        let crate::core::reference::Entry { header, object } = refs.get_mut(id)?;
        f(object.as_image_mut()?, header)
    }

    /// Kernel-side read: lazily allocate, then snapshot all planes.
    pub(crate) fn read_image_data(&self, id: RefId) -> Result<ImageData> {
        self.with_image_mut(id, |img, header| {
            img.memory.allocate()?;
            header.read_count += 1;
            let mut out = ImageData::new(img.width, img.height, img.format);
            for p in 0..img.format.plane_count() {
                out.planes[p].data.copy_from_slice(img.memory.data(p)?);
            }
            Ok(out)
        })
    }

    /// Kernel-side write: shape must match exactly. Does not mark
    /// graphs for re-verification; only external writes do that.
    pub(crate) fn write_image_data(&self, id: RefId, data: &ImageData) -> Result<()> {
        self.with_image_mut(id, |img, header| {
            if img.width != data.width || img.height != data.height {
                return Err(VxError::InvalidDimension(format!(
                    "wrote {}x{} into {}x{} image",
                    data.width, data.height, img.width, img.height
                )));
            }
            if img.format != data.format {
                return Err(VxError::InvalidFormat(format!(
                    "wrote {:?} data into {:?} image",
                    data.format, img.format
                )));
            }
            img.memory.allocate()?;
            header.write_count += 1;
            for p in 0..img.format.plane_count() {
                img.memory.data_mut(p)?.copy_from_slice(&data.planes[p].data);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_bad_geometry() {
        let ctx = Context::new().unwrap();
        assert!(matches!(
            ctx.create_image(0, 4, ImageFormat::U8),
            Err(VxError::InvalidDimension(_))
        ));
        assert!(matches!(
            ctx.create_image(5, 4, ImageFormat::Nv12),
            Err(VxError::InvalidDimension(_))
        ));
        assert!(matches!(
            ctx.create_image(4, 4, ImageFormat::Virt),
            Err(VxError::InvalidFormat(_))
        ));
    }

    #[test]
    fn patch_round_trip_writes_through() {
        let ctx = Context::new().unwrap();
        let img = ctx.create_image(8, 8, ImageFormat::U8).unwrap();

        let mut patch = img
            .access_patch(Some(Rectangle::new(2, 2, 6, 6)), 0, AccessMode::ReadWrite)
            .unwrap();
        assert_eq!(patch.addr.dim_x, 4);
        *patch.pixel_mut(1, 1).first_mut().unwrap() = 200;
        img.commit_patch(patch).unwrap();

        let patch = img.access_patch(None, 0, AccessMode::ReadOnly).unwrap();
        assert_eq!(patch.pixel(3, 3)[0], 200);
        assert_eq!(patch.pixel(0, 0)[0], 0);
        img.commit_patch(patch).unwrap();
    }

    #[test]
    fn patch_pins_image_until_commit() {
        let ctx = Context::new().unwrap();
        let img = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
        assert_eq!(img.counts().unwrap(), (1, 0));

        let patch = img.access_patch(None, 0, AccessMode::ReadOnly).unwrap();
        assert_eq!(img.counts().unwrap(), (2, 0));
        img.commit_patch(patch).unwrap();
        assert_eq!(img.counts().unwrap(), (1, 0));
    }

    #[test]
    fn subsampled_plane_addressing() {
        let ctx = Context::new().unwrap();
        let img = ctx.create_image(8, 8, ImageFormat::Nv12).unwrap();
        let patch = img.access_patch(None, 1, AccessMode::ReadOnly).unwrap();
        assert_eq!(patch.addr.scale_x, SCALE_UNITY / 2);
        assert_eq!(patch.addr.step_y, 2);
        assert_eq!(patch.addr.stride_x, 2);
        // logical coordinates 6 and 7 land on the same UV sample
        assert_eq!(patch.pixel(6, 6).as_ptr(), patch.pixel(7, 7).as_ptr());
        img.commit_patch(patch).unwrap();
    }

    #[test]
    fn out_of_bounds_rect_is_rejected() {
        let ctx = Context::new().unwrap();
        let img = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
        let r = img.access_patch(Some(Rectangle::new(0, 0, 5, 4)), 0, AccessMode::ReadOnly);
        assert!(matches!(r, Err(VxError::InvalidParameters(_))));
    }
}
