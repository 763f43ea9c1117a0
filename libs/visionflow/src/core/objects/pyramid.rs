use crate::core::context::Context;
use crate::core::error::{Result, VxError};
use crate::core::handles::object_handle;
use crate::core::objects::image::Image;
use crate::core::reference::{CountKind, RefHeader, RefId, Scope, VxObject};
use crate::core::types::{ImageFormat, RefKind};
use crate::core::zones::{zlog, Zone};

/// Supported inter-level scale.
pub const SCALE_HALF: f32 = 0.5;

/// A stack of images, each level scaled down from the previous one.
/// Level images are owned through internal counts and scoped to the
/// pyramid.
pub(crate) struct PyramidState {
    pub levels: Vec<RefId>,
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

object_handle! {
    /// Handle to an image pyramid.
    Pyramid, Pyramid
}

impl Pyramid {
    pub fn level_count(&self) -> Result<usize> {
        self.ctx.with_pyramid(self.id, |p| Ok(p.levels.len()))
    }

    pub fn scale(&self) -> Result<f32> {
        self.ctx.with_pyramid(self.id, |p| Ok(p.scale))
    }

    pub fn dims(&self) -> Result<(u32, u32)> {
        self.ctx.with_pyramid(self.id, |p| Ok((p.width, p.height)))
    }

    pub fn format(&self) -> Result<ImageFormat> {
        self.ctx.with_pyramid(self.id, |p| Ok(p.format))
    }

    /// Fetch one level. The returned handle carries a fresh external
    /// count and must be released by the caller.
    pub fn level(&self, index: usize) -> Result<Image> {
        let level_id = self.ctx.with_pyramid(self.id, |p| {
            p.levels.get(index).copied().ok_or_else(|| {
                VxError::InvalidParameters(format!(
                    "level {index} of a {}-level pyramid",
                    p.levels.len()
                ))
            })
        })?;
        self.ctx.retain_id(level_id, CountKind::External)?;
        Ok(Image::from_parts(self.ctx.clone(), level_id))
    }
}

impl Context {
    pub fn create_pyramid(
        &self,
        levels: usize,
        scale: f32,
        width: u32,
        height: u32,
        format: ImageFormat,
    ) -> Result<Pyramid> {
        if levels == 0 {
            return Err(VxError::InvalidParameters("zero-level pyramid".into()));
        }
        if scale != SCALE_HALF {
            return Err(VxError::InvalidValue(format!(
                "pyramid scale {scale} unsupported, only {SCALE_HALF}"
            )));
        }
        if width == 0 || height == 0 || format == ImageFormat::Virt {
            return Err(VxError::InvalidDimension(format!(
                "{width}x{height} {format:?} pyramid base"
            )));
        }

        // reserve the pyramid slot first so levels can carry its scope
        let id = self.insert_object(
            RefHeader::new(RefKind::Pyramid, Scope::Context),
            VxObject::Pyramid(PyramidState {
                levels: Vec::new(),
                scale,
                width,
                height,
                format,
            }),
        );

        let mut level_ids = Vec::with_capacity(levels);
        let (mut w, mut h) = (width, height);
        for _ in 0..levels {
            if w == 0 || h == 0 {
                // roll back the half-built pyramid
                for lid in &level_ids {
                    let _ = self.release_id(*lid, CountKind::Internal);
                }
                let _ = self.release_id(id, CountKind::External);
                return Err(VxError::InvalidDimension(format!(
                    "{levels}-level pyramid underflows a {width}x{height} base"
                )));
            }
            let lid = self.insert_image_internal(w, h, format, Scope::Pyramid(id));
            level_ids.push(lid);
            w = (w as f32 * scale) as u32;
            h = (h as f32 * scale) as u32;
        }

        self.with_pyramid_mut(id, |p| {
            p.levels = level_ids;
            Ok(())
        })?;
        zlog!(Zone::Api, pyramid = %id, levels, width, height, "pyramid created");
        Ok(Pyramid::from_parts(self.clone(), id))
    }

    pub(crate) fn with_pyramid<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&PyramidState) -> Result<T>,
    ) -> Result<T> {
        let refs = self.refs();
        f(refs.get(id)?.object.as_pyramid()?)
    }

    pub(crate) fn with_pyramid_mut<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&mut PyramidState) -> Result<T>,
    ) -> Result<T> {
        let mut refs = self.refs();
        f(refs.get_mut(id)?.object.as_pyramid_mut()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_halve_downward() {
        let ctx = Context::new().unwrap();
        let pyr = ctx.create_pyramid(3, SCALE_HALF, 64, 48, ImageFormat::U8).unwrap();
        assert_eq!(pyr.level_count().unwrap(), 3);

        let l0 = pyr.level(0).unwrap();
        let l2 = pyr.level(2).unwrap();
        assert_eq!((l0.width().unwrap(), l0.height().unwrap()), (64, 48));
        assert_eq!((l2.width().unwrap(), l2.height().unwrap()), (16, 12));
        l0.release().unwrap();
        l2.release().unwrap();

        assert!(pyr.level(3).is_err());
    }

    #[test]
    fn releasing_the_pyramid_destroys_unheld_levels() {
        let ctx = Context::new().unwrap();
        let before = ctx.live_references();
        let pyr = ctx.create_pyramid(2, SCALE_HALF, 8, 8, ImageFormat::U8).unwrap();
        assert_eq!(ctx.live_references(), before + 3);
        pyr.release().unwrap();
        assert_eq!(ctx.live_references(), before);
    }

    #[test]
    fn held_level_outlives_the_pyramid() {
        let ctx = Context::new().unwrap();
        let pyr = ctx.create_pyramid(2, SCALE_HALF, 8, 8, ImageFormat::U8).unwrap();
        let level = pyr.level(1).unwrap();
        // one app handle plus the pyramid's own hold
        assert_eq!(level.counts().unwrap(), (1, 1));
        pyr.release().unwrap();

        // the held level keeps its slot alive through its external count
        assert_eq!(level.counts().unwrap(), (1, 0));
        assert_eq!(level.width().unwrap(), 4);
        level.release().unwrap();
    }

    #[test]
    fn unsupported_scale_is_rejected() {
        let ctx = Context::new().unwrap();
        assert!(matches!(
            ctx.create_pyramid(2, 0.75, 8, 8, ImageFormat::U8),
            Err(VxError::InvalidValue(_))
        ));
    }
}
