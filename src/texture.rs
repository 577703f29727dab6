//! Texture objects with a packed dimension cache.
//!
//! The level-0 size of a [`Texture`] is kept in one `u64` split into three
//! 21-bit fields (width, height, depth), so any thread can read it with a
//! single atomic load.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::caps;
use crate::driver::{Driver, ObjectKind, PixelUpload, TextureTarget};
use crate::object::{GpuObject, ObjectRef};
use crate::render_thread::RenderThread;

const HEIGHT_SHIFT: u32 = u64::BITS / 3;
const DEPTH_SHIFT: u32 = HEIGHT_SHIFT * 2;
const SIZE_MASK: u64 = (1 << HEIGHT_SHIFT) - 1;

/// Largest size representable on each axis of the dimension word.
pub const MAX_DIMENSION: u32 = (1 << HEIGHT_SHIFT) - 1;

/// `GL_TEXTURE_MIN_FILTER`.
pub const TEXTURE_MIN_FILTER: u32 = 0x2801;
/// `GL_TEXTURE_MAG_FILTER`.
pub const TEXTURE_MAG_FILTER: u32 = 0x2800;
/// `GL_TEXTURE_WRAP_S`.
pub const TEXTURE_WRAP_S: u32 = 0x2802;
/// `GL_TEXTURE_WRAP_T`.
pub const TEXTURE_WRAP_T: u32 = 0x2803;
/// `GL_TEXTURE_WRAP_R`.
pub const TEXTURE_WRAP_R: u32 = 0x8072;
/// `GL_TEXTURE_BASE_LEVEL`.
pub const TEXTURE_BASE_LEVEL: u32 = 0x813C;
/// `GL_TEXTURE_MAX_LEVEL`.
pub const TEXTURE_MAX_LEVEL: u32 = 0x813D;
/// `GL_TEXTURE_MIN_LOD`.
pub const TEXTURE_MIN_LOD: u32 = 0x813A;
/// `GL_TEXTURE_MAX_LOD`.
pub const TEXTURE_MAX_LOD: u32 = 0x813B;

/// `GL_NEAREST`.
pub const NEAREST: i32 = 0x2600;
/// `GL_LINEAR`.
pub const LINEAR: i32 = 0x2601;
/// `GL_NEAREST_MIPMAP_LINEAR`.
pub const NEAREST_MIPMAP_LINEAR: i32 = 0x2702;
/// `GL_LINEAR_MIPMAP_LINEAR`.
pub const LINEAR_MIPMAP_LINEAR: i32 = 0x2703;
/// `GL_CLAMP_TO_EDGE`.
pub const CLAMP_TO_EDGE: i32 = 0x812F;
/// `GL_REPEAT`.
pub const REPEAT: i32 = 0x2901;

/// Packs a size into the dimension word. Each axis keeps its low 21 bits.
#[must_use]
pub const fn pack_dimension(width: u32, height: u32, depth: u32) -> u64 {
    (width as u64 & SIZE_MASK)
        | ((height as u64 & SIZE_MASK) << HEIGHT_SHIFT)
        | ((depth as u64 & SIZE_MASK) << DEPTH_SHIFT)
}

/// Splits a dimension word back into `(width, height, depth)`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn unpack_dimension(dimension: u64) -> (u32, u32, u32) {
    (
        (dimension & SIZE_MASK) as u32,
        ((dimension >> HEIGHT_SHIFT) & SIZE_MASK) as u32,
        ((dimension >> DEPTH_SHIFT) & SIZE_MASK) as u32,
    )
}

/// Last values written for each parameter; `None` when unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct TextureParameters {
    min_filter: Option<i32>,
    mag_filter: Option<i32>,
    wrap_s: Option<i32>,
    wrap_t: Option<i32>,
    wrap_r: Option<i32>,
    swizzle: Option<[i32; 4]>,
}

/// A texture whose native object is created on first use.
#[derive(Debug)]
pub struct Texture {
    object: GpuObject,
    target: TextureTarget,
    dimension: AtomicU64,
    /// Storage is immutable and must be recreated to change.
    immutable: AtomicBool,
    parameters: Mutex<TextureParameters>,
}

impl Texture {
    /// An empty texture for `target`.
    #[must_use]
    pub fn new(render_thread: Arc<RenderThread>, target: TextureTarget) -> Self {
        Self {
            object: GpuObject::new(render_thread, ObjectKind::Texture),
            target,
            dimension: AtomicU64::new(0),
            immutable: AtomicBool::new(false),
            parameters: Mutex::new(TextureParameters::default()),
        }
    }

    /// Wraps an existing texture name, taking ownership of it.
    #[must_use]
    pub fn from_ref(object: ObjectRef, target: TextureTarget, width: u32, height: u32) -> Self {
        Self {
            object: GpuObject::from_ref(object),
            target,
            dimension: AtomicU64::new(pack_dimension(width, height, 1)),
            immutable: AtomicBool::new(true),
            parameters: Mutex::new(TextureParameters::default()),
        }
    }

    /// The texture name, created and bound to its target on first call.
    ///
    /// # Panics
    ///
    /// Panics if not called from the render thread, or after close.
    pub fn get(&self, driver: &dyn Driver) -> u32 {
        let target = self.target;
        self.object.get_or_create_with(driver, |driver| {
            let texture = driver.create_object(ObjectKind::Texture)?;
            driver.init_texture(target, texture);
            Some(texture)
        })
    }

    fn handle(&self, driver: &dyn Driver) -> Option<NonZeroU32> {
        NonZeroU32::new(self.get(driver))
    }

    /// The immutable target. Any thread.
    #[must_use]
    pub fn target(&self) -> TextureTarget {
        self.target
    }

    /// Whether the native texture exists. Any thread.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.object.is_created()
    }

    /// Whether [`close`](Self::close) or [`abandon`](Self::abandon) was
    /// called. Any thread.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.object.is_closed()
    }

    /// The native name, or `0`. Any thread.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.object.id()
    }

    /// Cached level-0 width; `0` before the first allocation. Any thread.
    #[must_use]
    pub fn width(&self) -> u32 {
        unpack_dimension(self.dimension.load(Ordering::Acquire)).0
    }

    /// Cached level-0 height; `0` before the first allocation. Any thread.
    #[must_use]
    pub fn height(&self) -> u32 {
        unpack_dimension(self.dimension.load(Ordering::Acquire)).1
    }

    /// Cached level-0 depth; `0` before the first allocation. Any thread.
    #[must_use]
    pub fn depth(&self) -> u32 {
        unpack_dimension(self.dimension.load(Ordering::Acquire)).2
    }

    /// Records the size a later allocation is expected to produce, for
    /// asynchronous producers that know it up front. Checked on the next
    /// allocation; makes no driver call.
    pub fn set_dimension(&self, width: u32, height: u32, depth: u32) {
        self.dimension
            .store(pack_dimension(width, height, depth), Ordering::Release);
    }

    /// Allocates `max_level + 1` mip levels of `internal_format` and locks
    /// the sampled level range to exactly those levels.
    ///
    /// Pixel contents are undefined until uploaded or cleared. Mip levels
    /// that were not regenerated may keep stale data from a previous
    /// allocation of the same texture; clear them if that matters.
    ///
    /// # Panics
    ///
    /// Panics unless the target is 2D, `max_level >= 0`, and both sizes are
    /// in `1..=MAX_DIMENSION`. Panics off the render thread.
    #[allow(clippy::cast_precision_loss)]
    pub fn allocate_2d(&self, driver: &dyn Driver, internal_format: u32, width: i32, height: i32, max_level: i32) {
        assert!(
            self.target == TextureTarget::Texture2D,
            "allocate_2d on a {:?} texture",
            self.target
        );
        assert!(max_level >= 0, "max mip level {max_level} is negative");
        check_size(width, height);
        self.recreate_if_immutable(driver);
        let Some(texture) = self.handle(driver) else { return };
        let target = self.target;

        // Mip generation reads from the base level up to the max level.
        driver.texture_parameter_i32(target, texture, TEXTURE_BASE_LEVEL, 0);
        driver.texture_parameter_i32(target, texture, TEXTURE_MAX_LEVEL, max_level);
        driver.texture_parameter_f32(target, texture, TEXTURE_MIN_LOD, 0.0);
        driver.texture_parameter_f32(target, texture, TEXTURE_MAX_LOD, max_level as f32);

        if driver.caps().is_texture_storage_compatible(internal_format) {
            driver.texture_storage_2d(target, texture, max_level + 1, internal_format, width, height);
            self.immutable.store(true, Ordering::Release);
        } else {
            let (format, ty) = driver
                .caps()
                .format_default_external(internal_format)
                .unwrap_or((caps::RED, caps::UNSIGNED_BYTE));
            for level in 0..=max_level {
                driver.texture_image_2d(
                    target,
                    texture,
                    level,
                    internal_format,
                    (width >> level).max(1),
                    (height >> level).max(1),
                    format,
                    ty,
                );
            }
        }

        self.update_dimension(driver, texture, "2D");
    }

    /// Allocates multisample storage with fixed sample locations.
    ///
    /// # Panics
    ///
    /// Panics unless the target is multisample, `samples >= 1`, and both
    /// sizes are in `1..=MAX_DIMENSION`. Panics off the render thread.
    pub fn allocate_2d_multisample(
        &self,
        driver: &dyn Driver,
        internal_format: u32,
        width: i32,
        height: i32,
        samples: i32,
    ) {
        assert!(
            self.target == TextureTarget::Texture2DMultisample,
            "allocate_2d_multisample on a {:?} texture",
            self.target
        );
        assert!(samples >= 1, "sample count {samples} is less than 1");
        check_size(width, height);
        self.recreate_if_immutable(driver);
        let Some(texture) = self.handle(driver) else { return };
        driver.texture_storage_2d_multisample(texture, samples, internal_format, width, height);
        self.immutable.store(true, Ordering::Release);
        self.update_dimension(driver, texture, "2DMS");
    }

    /// Immutable storage can't be respecified, so swap in a fresh name.
    fn recreate_if_immutable(&self, driver: &dyn Driver) {
        if self.immutable.swap(false, Ordering::AcqRel) {
            if let Some(old) = self.object.recycle() {
                old.release(driver);
            }
            self.reset_parameters();
        }
    }

    /// Re-reads the level-0 size from the driver, which is the source of
    /// truth, and warns if it differs from what was expected.
    fn update_dimension(&self, driver: &dyn Driver, texture: NonZeroU32, what: &str) {
        let (width, height) = driver.texture_level_size(self.target, texture, 0);
        #[allow(clippy::cast_sign_loss)]
        let allocated = pack_dimension(width.max(0) as u32, height.max(0) as u32, 1);
        let expected = self.dimension.swap(allocated, Ordering::AcqRel);
        if expected != 0 && expected != allocated {
            tracing::warn!(
                "Inconsistent {what} texture dimension, set {expected:#x} but allocated {allocated:#x}"
            );
        }
    }

    /// Uploads pixels into a rectangle of one mip level. `pixels` stays
    /// owned by the caller.
    ///
    /// # Panics
    ///
    /// Panics if the level is negative, the rectangle is empty, the
    /// alignment is not 1, 2, 4 or 8, the pixel format is unknown, or
    /// `pixels` is shorter than the upload reads. Panics off the render
    /// thread.
    pub fn upload(&self, driver: &dyn Driver, upload: &PixelUpload, pixels: &[u8]) {
        assert!(upload.level >= 0, "mip level {} is negative", upload.level);
        assert!(
            upload.width > 0 && upload.height > 0,
            "empty upload {}x{}",
            upload.width,
            upload.height
        );
        assert!(
            matches!(upload.alignment, 1 | 2 | 4 | 8),
            "unpack alignment {} is not 1, 2, 4 or 8",
            upload.alignment
        );
        let Some(required) = upload.required_len() else {
            panic!(
                "unknown pixel format {:#x} type {:#x}, or negative unpack skips",
                upload.format, upload.ty
            );
        };
        assert!(
            pixels.len() >= required,
            "{} pixel bytes, upload reads {required}",
            pixels.len()
        );
        let Some(texture) = self.handle(driver) else { return };
        driver.texture_sub_image_2d(self.target, texture, upload, pixels);
    }

    /// Fills a whole mip level with zeros.
    pub fn clear(&self, driver: &dyn Driver, level: i32) {
        assert!(level >= 0, "mip level {level} is negative");
        let Some(texture) = self.handle(driver) else { return };
        driver.clear_texture(self.target, texture, level, None);
    }

    /// Fills a rectangle of a mip level with zeros.
    pub fn clear_region(&self, driver: &dyn Driver, level: i32, x: i32, y: i32, width: i32, height: i32) {
        assert!(level >= 0, "mip level {level} is negative");
        let Some(texture) = self.handle(driver) else { return };
        driver.clear_texture(self.target, texture, level, Some([x, y, width, height]));
    }

    fn reset_parameters(&self) {
        *self.parameters.lock().expect("texture parameters poisoned") = TextureParameters::default();
    }

    /// Writes one integer parameter unless the cache says it already holds
    /// `value`.
    fn set_cached(
        &self,
        driver: &dyn Driver,
        pname: u32,
        value: i32,
        slot: impl FnOnce(&mut TextureParameters) -> &mut Option<i32>,
    ) {
        let Some(texture) = self.handle(driver) else { return };
        let mut parameters = self.parameters.lock().expect("texture parameters poisoned");
        let cached = slot(&mut parameters);
        if *cached != Some(value) {
            driver.texture_parameter_i32(self.target, texture, pname, value);
            *cached = Some(value);
        }
    }

    /// Sets the S wrap mode.
    pub fn set_wrap_s(&self, driver: &dyn Driver, wrap: i32) {
        self.set_cached(driver, TEXTURE_WRAP_S, wrap, |p| &mut p.wrap_s);
    }

    /// Sets the T wrap mode.
    pub fn set_wrap_t(&self, driver: &dyn Driver, wrap: i32) {
        self.set_cached(driver, TEXTURE_WRAP_T, wrap, |p| &mut p.wrap_t);
    }

    /// Sets the R wrap mode.
    pub fn set_wrap_r(&self, driver: &dyn Driver, wrap: i32) {
        self.set_cached(driver, TEXTURE_WRAP_R, wrap, |p| &mut p.wrap_r);
    }

    /// Sets the S and T wrap modes.
    pub fn set_wrap(&self, driver: &dyn Driver, wrap_s: i32, wrap_t: i32) {
        self.set_wrap_s(driver, wrap_s);
        self.set_wrap_t(driver, wrap_t);
    }

    /// Sets all three wrap modes.
    pub fn set_wrap_mode(&self, driver: &dyn Driver, wrap_s: i32, wrap_t: i32, wrap_r: i32) {
        self.set_wrap(driver, wrap_s, wrap_t);
        self.set_wrap_r(driver, wrap_r);
    }

    /// Linear or nearest filtering. With `mipmap`, sampling between levels
    /// is always linear.
    pub fn set_filter(&self, driver: &dyn Driver, linear: bool, mipmap: bool) {
        let (min, mag) = match (linear, mipmap) {
            (true, true) => (LINEAR_MIPMAP_LINEAR, LINEAR),
            (true, false) => (LINEAR, LINEAR),
            (false, true) => (NEAREST_MIPMAP_LINEAR, NEAREST),
            (false, false) => (NEAREST, NEAREST),
        };
        self.set_filter_mode(driver, min, mag);
    }

    /// Sets the minification and magnification filters.
    pub fn set_filter_mode(&self, driver: &dyn Driver, min_filter: i32, mag_filter: i32) {
        self.set_cached(driver, TEXTURE_MIN_FILTER, min_filter, |p| &mut p.min_filter);
        self.set_cached(driver, TEXTURE_MAG_FILTER, mag_filter, |p| &mut p.mag_filter);
    }

    /// Sets which channels shaders read as RGBA, e.g.
    /// `(ONE, ONE, ONE, RED)` to read a coverage mask as alpha.
    pub fn set_swizzle(&self, driver: &dyn Driver, r: i32, g: i32, b: i32, a: i32) {
        let Some(texture) = self.handle(driver) else { return };
        let swizzle = [r, g, b, a];
        let mut parameters = self.parameters.lock().expect("texture parameters poisoned");
        if parameters.swizzle != Some(swizzle) {
            driver.texture_swizzle(self.target, texture, swizzle);
            parameters.swizzle = Some(swizzle);
        }
    }

    /// Generates mip levels from level 0.
    pub fn generate_mipmap(&self, driver: &dyn Driver) {
        let Some(texture) = self.handle(driver) else { return };
        driver.generate_mipmap(self.target, texture);
    }

    /// Deletes the native texture and forgets its size. Idempotent.
    ///
    /// # Panics
    ///
    /// Panics off the render thread.
    pub fn close(&self, driver: &dyn Driver) {
        self.object.close(driver);
        self.dimension.store(0, Ordering::Release);
        self.reset_parameters();
    }

    /// Forgets the native texture without a driver call. For lost contexts.
    pub fn abandon(&self) {
        self.object.abandon();
        self.dimension.store(0, Ordering::Release);
    }
}

#[track_caller]
fn check_size(width: i32, height: i32) {
    let range = 1..=i64::from(MAX_DIMENSION);
    assert!(
        range.contains(&i64::from(width)) && range.contains(&i64::from(height)),
        "texture size {width}x{height} out of range"
    );
}
