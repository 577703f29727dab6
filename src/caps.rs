//! Capabilities and limits of the current context.
//!
//! A [`Caps`] is read once when the driver is created and never changes
//! afterwards. It also owns the small format tables that decide which sized
//! internal formats can be textured, rendered to, and how to specify them
//! without immutable storage.

/// `GL_RGBA8`.
pub const RGBA8: u32 = 0x8058;
/// `GL_RGB8`.
pub const RGB8: u32 = 0x8051;
/// `GL_R8`.
pub const R8: u32 = 0x8229;
/// `GL_RG8`.
pub const RG8: u32 = 0x822B;
/// `GL_SRGB8_ALPHA8`.
pub const SRGB8_ALPHA8: u32 = 0x8C43;
/// `GL_RGBA16F`.
pub const RGBA16F: u32 = 0x881A;
/// `GL_R16F`.
pub const R16F: u32 = 0x822D;
/// `GL_DEPTH24_STENCIL8`.
pub const DEPTH24_STENCIL8: u32 = 0x88F0;

/// `GL_RED`.
pub const RED: u32 = 0x1903;
/// `GL_RG`.
pub const RG: u32 = 0x8227;
/// `GL_RGB`.
pub const RGB: u32 = 0x1907;
/// `GL_RGBA`.
pub const RGBA: u32 = 0x1908;
/// `GL_DEPTH_STENCIL`.
pub const DEPTH_STENCIL: u32 = 0x84F9;
/// `GL_UNSIGNED_BYTE`.
pub const UNSIGNED_BYTE: u32 = 0x1401;
/// `GL_HALF_FLOAT`.
pub const HALF_FLOAT: u32 = 0x140B;
/// `GL_UNSIGNED_INT_24_8`.
pub const UNSIGNED_INT_24_8: u32 = 0x84FA;

/// Hardware capabilities and driver limits.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Caps {
    /// `(major, minor)` context version.
    pub version: (u32, u32),
    /// `glTexStorage*` is available (GL 4.2 / `ARB_texture_storage`).
    pub texture_storage: bool,
    /// Separate vertex attribute formats and bindings (GL 4.3 /
    /// `ARB_vertex_attrib_binding`).
    pub vertex_attrib_binding: bool,
    /// `GL_TEXTURE_SWIZZLE_RGBA` (GL 3.3 / `ARB_texture_swizzle`).
    pub texture_swizzle: bool,
    /// `glClearTexImage` (GL 4.4 / `ARB_clear_texture`).
    pub clear_texture: bool,
    /// `GL_UNPACK_ROW_LENGTH` is honored.
    pub unpack_row_length: bool,
    /// Protected-memory textures. Never available on OpenGL.
    pub protected_content: bool,
    /// Trusted driver: skip `glGetError` / framebuffer status checks.
    pub skip_error_checks: bool,
    /// `GL_MAX_SAMPLES`; 0 or 1 means no multisample renderbuffers.
    pub max_samples: i32,
    /// `GL_MAX_TEXTURE_SIZE`.
    pub max_texture_size: i32,
    /// `GL_MAX_VERTEX_ATTRIBS`.
    pub max_vertex_attribs: u32,
    /// `GL_MAX_COMBINED_TEXTURE_IMAGE_UNITS`.
    pub max_texture_units: u32,
}

impl Default for Caps {
    /// A fully featured GL 4.5 core context.
    fn default() -> Self {
        Self {
            version: (4, 5),
            texture_storage: true,
            vertex_attrib_binding: true,
            texture_swizzle: true,
            clear_texture: true,
            unpack_row_length: true,
            protected_content: false,
            skip_error_checks: false,
            max_samples: 8,
            max_texture_size: 16384,
            max_vertex_attribs: 16,
            max_texture_units: 32,
        }
    }
}

impl Caps {
    /// Whether the context is at least version `major.minor`.
    #[must_use]
    pub fn is_at_least(&self, major: u32, minor: u32) -> bool {
        self.version >= (major, minor)
    }

    /// Names of baseline requirements this context does not meet.
    ///
    /// An empty list means the context is usable. The names are meant to be
    /// shown to the user as-is.
    #[must_use]
    pub fn missing_requirements(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.is_at_least(3, 3) {
            missing.push("OpenGL 3.3");
        }
        if !self.vertex_attrib_binding {
            missing.push("ARB_vertex_attrib_binding");
        }
        if !self.texture_swizzle {
            missing.push("ARB_texture_swizzle");
        }
        missing
    }

    /// Sized internal format to use when texturing `format`, or `None` if
    /// the format cannot be textured.
    #[must_use]
    pub fn texture_internal_format(&self, format: u32) -> Option<u32> {
        match format {
            RGBA8 | RGB8 | R8 | RG8 | SRGB8_ALPHA8 | DEPTH24_STENCIL8 => Some(format),
            RGBA16F | R16F if self.is_at_least(3, 0) => Some(format),
            _ => None,
        }
    }

    /// Whether `format` can be allocated with immutable storage.
    #[must_use]
    pub fn is_texture_storage_compatible(&self, format: u32) -> bool {
        self.texture_storage && self.texture_internal_format(format).is_some()
    }

    /// Whether `format` can be rendered to with `sample_count` samples.
    #[must_use]
    pub fn is_format_renderable(&self, format: u32, sample_count: i32) -> bool {
        let color = matches!(format, RGBA8 | RGB8 | R8 | RG8 | SRGB8_ALPHA8 | RGBA16F | R16F);
        color && (sample_count <= 1 || sample_count <= self.max_samples)
    }

    /// Default external `(format, type)` pair used to specify `format`
    /// level by level when immutable storage is not available.
    #[must_use]
    pub fn format_default_external(&self, format: u32) -> Option<(u32, u32)> {
        match format {
            RGBA8 | SRGB8_ALPHA8 => Some((RGBA, UNSIGNED_BYTE)),
            RGB8 => Some((RGB, UNSIGNED_BYTE)),
            RG8 => Some((RG, UNSIGNED_BYTE)),
            R8 => Some((RED, UNSIGNED_BYTE)),
            RGBA16F => Some((RGBA, HALF_FLOAT)),
            R16F => Some((RED, HALF_FLOAT)),
            DEPTH24_STENCIL8 => Some((DEPTH_STENCIL, UNSIGNED_INT_24_8)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_caps_meet_baseline() {
        assert!(Caps::default().missing_requirements().is_empty());
    }

    #[test]
    fn missing_requirements_accumulate() {
        let caps = Caps {
            version: (3, 2),
            vertex_attrib_binding: false,
            ..Caps::default()
        };
        assert_eq!(
            caps.missing_requirements(),
            vec!["OpenGL 3.3", "ARB_vertex_attrib_binding"]
        );
    }

    #[test]
    fn renderability_respects_sample_limit() {
        let caps = Caps {
            max_samples: 0,
            ..Caps::default()
        };
        assert!(caps.is_format_renderable(RGBA8, 1));
        assert!(!caps.is_format_renderable(RGBA8, 4));
        assert!(!caps.is_format_renderable(DEPTH24_STENCIL8, 1));
    }

    #[test]
    fn storage_compatibility_follows_caps() {
        let caps = Caps {
            texture_storage: false,
            ..Caps::default()
        };
        assert!(!caps.is_texture_storage_compatible(RGBA8));
        assert!(Caps::default().is_texture_storage_compatible(RGBA8));
        assert!(!Caps::default().is_texture_storage_compatible(0x1234));
    }
}
