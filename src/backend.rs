//! Descriptors for textures that cross the crate boundary.

use crate::driver::TextureTarget;

/// A pixel format as the backend names it.
///
/// External formats belong to textures produced outside the crate (video
/// decoders, imported OS surfaces) and can be sampled but not allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BackendFormat {
    format: u32,
    external: bool,
}

impl BackendFormat {
    /// A sized internal format such as `GL_RGBA8`.
    #[must_use]
    pub const fn new(format: u32) -> Self {
        Self {
            format,
            external: false,
        }
    }

    /// A format only valid on externally created textures.
    #[must_use]
    pub const fn external(format: u32) -> Self {
        Self {
            format,
            external: true,
        }
    }

    /// The GL enum.
    #[must_use]
    pub const fn format(self) -> u32 {
        self.format
    }

    /// Whether the crate may only wrap, never allocate, this format.
    #[must_use]
    pub const fn is_external(self) -> bool {
        self.external
    }
}

/// What the backend knows about a texture besides its size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureInfo {
    /// Binding target.
    pub target: TextureTarget,
    /// Native texture name.
    pub texture: u32,
    /// Pixel format.
    pub format: BackendFormat,
    /// Allocated mip levels, at least 1.
    pub levels: i32,
    /// Samples per pixel, 1 for single-sampled.
    pub samples: i32,
    /// Backed by protected memory.
    pub protected: bool,
}

/// A texture created outside this crate, described for wrapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BackendTexture {
    /// Level-0 width.
    pub width: u32,
    /// Level-0 height.
    pub height: u32,
    /// Everything else.
    pub info: TextureInfo,
}

impl BackendTexture {
    /// Describes a single-sampled 2D texture with `levels` mip levels.
    #[must_use]
    pub const fn new_2d(texture: u32, width: u32, height: u32, format: BackendFormat, levels: i32) -> Self {
        Self {
            width,
            height,
            info: TextureInfo {
                target: TextureTarget::Texture2D,
                texture,
                format,
                levels,
                samples: 1,
                protected: false,
            },
        }
    }

    /// Whether the description names a texture at all.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.info.texture != 0 && self.width > 0 && self.height > 0 && self.info.levels > 0
    }
}

/// Who deletes a wrapped texture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Ownership {
    /// The crate deletes it with the wrapper.
    Owned,
    /// The producer deletes it; the crate never does.
    #[default]
    Borrowed,
}
