//! The driver binding surface.
//!
//! [`Driver`] is the thinnest adapter over the native graphics API that the
//! rest of the crate needs. Every call is only valid on the rendering thread;
//! implementations may assume the context is current.

use std::num::NonZeroU32;

use crate::caps::{self, Caps};
use crate::resource_provider::SamplerState;
use crate::vertex_format::VertexAttribType;

/// `GL_NO_ERROR`.
pub const NO_ERROR: u32 = 0;

/// `GL_FRAMEBUFFER_COMPLETE`.
pub const FRAMEBUFFER_COMPLETE: u32 = 0x8CD5;

const BGRA: u32 = 0x80E1;
const BYTE: u32 = 0x1400;
const SHORT: u32 = 0x1402;
const UNSIGNED_SHORT: u32 = 0x1403;
const INT: u32 = 0x1404;
const UNSIGNED_INT: u32 = 0x1405;
const FLOAT: u32 = 0x1406;

/// The kind of a native GPU object, which decides how it is created and
/// deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// A texture name.
    Texture,
    /// A buffer object.
    Buffer,
    /// A framebuffer object.
    Framebuffer,
    /// A renderbuffer object.
    Renderbuffer,
    /// A vertex array object.
    VertexArray,
    /// A sampler object.
    Sampler,
    /// A program object.
    Program,
    /// A shader object of the given stage.
    Shader(ShaderStage),
}

/// Texture targets supported by [`Texture`](crate::Texture).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    /// `GL_TEXTURE_2D`.
    Texture2D,
    /// `GL_TEXTURE_2D_MULTISAMPLE`.
    Texture2DMultisample,
}

impl TextureTarget {
    /// The GL enum for this target.
    #[must_use]
    pub const fn gl_enum(self) -> u32 {
        match self {
            Self::Texture2D => 0x0DE1,
            Self::Texture2DMultisample => 0x9100,
        }
    }
}

/// Programmable pipeline stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// `.vert`
    Vertex,
    /// `.frag`
    Fragment,
    /// `.geom`
    Geometry,
    /// `.tesc`
    TessControl,
    /// `.tese`
    TessEvaluation,
    /// `.comp`
    Compute,
}

impl ShaderStage {
    /// Infers the stage from a resource path suffix, e.g. `"a/b.frag"`.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let (_, ext) = path.rsplit_once('.')?;
        match ext {
            "vert" => Some(Self::Vertex),
            "frag" => Some(Self::Fragment),
            "geom" => Some(Self::Geometry),
            "tesc" => Some(Self::TessControl),
            "tese" => Some(Self::TessEvaluation),
            "comp" => Some(Self::Compute),
            _ => None,
        }
    }

    /// The GL enum for this stage.
    #[must_use]
    pub const fn gl_enum(self) -> u32 {
        match self {
            Self::Vertex => 0x8B31,
            Self::Fragment => 0x8B30,
            Self::Geometry => 0x8DD9,
            Self::TessControl => 0x8E88,
            Self::TessEvaluation => 0x8E87,
            Self::Compute => 0x91B9,
        }
    }
}

/// Buffer binding targets used by the buffer pools.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Per-vertex data.
    Vertex,
    /// Per-instance data, bound like vertex data.
    Instance,
    /// Element indices.
    Index,
}

/// Describes one sub-image upload: the destination rectangle, the unpack
/// state and the layout of the source pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelUpload {
    /// Mip level to write.
    pub level: i32,
    /// Destination x offset.
    pub x: i32,
    /// Destination y offset.
    pub y: i32,
    /// Width of the region in pixels.
    pub width: i32,
    /// Height of the region in pixels.
    pub height: i32,
    /// Source row length in pixels, or 0 when rows are tightly packed.
    pub row_length: i32,
    /// Source rows to skip.
    pub skip_rows: i32,
    /// Source pixels to skip at the start of each row.
    pub skip_pixels: i32,
    /// Source row alignment, one of 1, 2, 4, 8.
    pub alignment: i32,
    /// Source pixel format, e.g. `GL_RGBA`.
    pub format: u32,
    /// Source component type, e.g. `GL_UNSIGNED_BYTE`.
    pub ty: u32,
}

impl PixelUpload {
    /// A tightly packed upload of a full `width`x`height` region at level 0.
    #[must_use]
    pub const fn packed(width: i32, height: i32, format: u32, ty: u32) -> Self {
        Self {
            level: 0,
            x: 0,
            y: 0,
            width,
            height,
            row_length: 0,
            skip_rows: 0,
            skip_pixels: 0,
            alignment: 1,
            format,
            ty,
        }
    }

    /// Size of one source pixel, or `None` for a format and type pair this
    /// crate doesn't know.
    #[must_use]
    pub const fn bytes_per_pixel(&self) -> Option<usize> {
        let components = match self.format {
            caps::RED => 1,
            caps::RG => 2,
            caps::RGB => 3,
            caps::RGBA | BGRA => 4,
            caps::DEPTH_STENCIL => {
                return match self.ty {
                    caps::UNSIGNED_INT_24_8 => Some(4),
                    _ => None,
                }
            }
            _ => return None,
        };
        let size = match self.ty {
            caps::UNSIGNED_BYTE | BYTE => 1,
            caps::HALF_FLOAT | UNSIGNED_SHORT | SHORT => 2,
            FLOAT | UNSIGNED_INT | INT => 4,
            _ => return None,
        };
        Some(components * size)
    }

    /// Bytes the driver reads from the source for this upload, honoring row
    /// length, skips and row alignment. The last row is not padded.
    ///
    /// `None` for an unknown pixel type or negative sizes.
    #[must_use]
    pub fn required_len(&self) -> Option<usize> {
        let pixel = self.bytes_per_pixel()?;
        let width = usize::try_from(self.width).ok()?;
        let height = usize::try_from(self.height).ok()?;
        let skip_rows = usize::try_from(self.skip_rows).ok()?;
        let skip_pixels = usize::try_from(self.skip_pixels).ok()?;
        let alignment = usize::try_from(self.alignment).ok()?.max(1);
        if width == 0 || height == 0 {
            return Some(0);
        }
        let row_pixels = if self.row_length > 0 {
            usize::try_from(self.row_length).ok()?
        } else {
            width
        };
        let stride = (row_pixels * pixel).next_multiple_of(alignment);
        Some((skip_rows + height - 1) * stride + (skip_pixels + width) * pixel)
    }
}

/// The native graphics API as seen by this crate.
///
/// Object names are passed as [`NonZeroU32`] because `0` is never a valid
/// object. Mutating calls report failure through [`get_error`] when
/// [`Caps::skip_error_checks`] is off.
///
/// [`get_error`]: Driver::get_error
pub trait Driver {
    /// Capabilities queried when the driver was created.
    fn caps(&self) -> &Caps;

    /// Creates a native object. Returns `None` if the driver refuses.
    fn create_object(&self, kind: ObjectKind) -> Option<NonZeroU32>;
    /// Deletes a native object.
    fn delete_object(&self, kind: ObjectKind, id: NonZeroU32);

    /// Clears any pending error flags.
    fn clear_errors(&self);
    /// Returns the oldest pending error, or [`NO_ERROR`].
    fn get_error(&self) -> u32;

    /// Binds `texture` to `target` once so the name takes on that target.
    fn init_texture(&self, target: TextureTarget, texture: NonZeroU32);
    /// Sets an integer texture parameter.
    fn texture_parameter_i32(&self, target: TextureTarget, texture: NonZeroU32, pname: u32, value: i32);
    /// Sets a float texture parameter.
    fn texture_parameter_f32(&self, target: TextureTarget, texture: NonZeroU32, pname: u32, value: f32);
    /// Sets the RGBA read swizzle.
    fn texture_swizzle(&self, target: TextureTarget, texture: NonZeroU32, swizzle: [i32; 4]);
    /// Allocates immutable storage for `levels` mip levels.
    fn texture_storage_2d(
        &self,
        target: TextureTarget,
        texture: NonZeroU32,
        levels: i32,
        internal_format: u32,
        width: i32,
        height: i32,
    );
    /// Specifies one mutable mip level without data.
    #[allow(clippy::too_many_arguments)]
    fn texture_image_2d(
        &self,
        target: TextureTarget,
        texture: NonZeroU32,
        level: i32,
        internal_format: u32,
        width: i32,
        height: i32,
        external_format: u32,
        external_type: u32,
    );
    /// Allocates multisample storage with fixed sample locations.
    fn texture_storage_2d_multisample(
        &self,
        texture: NonZeroU32,
        samples: i32,
        internal_format: u32,
        width: i32,
        height: i32,
    );
    /// Queries the width and height the driver reports for a mip level.
    /// `(0, 0)` when the texture has no storage.
    fn texture_level_size(&self, target: TextureTarget, texture: NonZeroU32, level: i32) -> (i32, i32);
    /// Sets the unpack state and uploads a sub-image.
    fn texture_sub_image_2d(&self, target: TextureTarget, texture: NonZeroU32, upload: &PixelUpload, pixels: &[u8]);
    /// Fills a region of a level with zeros, or the whole level when `rect`
    /// is `None`. `rect` is `[x, y, width, height]`.
    fn clear_texture(&self, target: TextureTarget, texture: NonZeroU32, level: i32, rect: Option<[i32; 4]>);
    /// Generates the mip chain from level 0.
    fn generate_mipmap(&self, target: TextureTarget, texture: NonZeroU32);
    /// Binds `texture` to `target` on texture unit `unit`, or unbinds it.
    fn bind_texture_unit(&self, unit: u32, target: TextureTarget, texture: Option<NonZeroU32>);

    /// Allocates multisample renderbuffer storage.
    fn renderbuffer_storage_multisample(
        &self,
        renderbuffer: NonZeroU32,
        samples: i32,
        internal_format: u32,
        width: i32,
        height: i32,
    );
    /// Binds `framebuffer` for drawing and reading, or the default one.
    fn bind_framebuffer(&self, framebuffer: Option<NonZeroU32>);
    /// Attaches level 0 of a 2D texture as color attachment 0 of the bound framebuffer.
    fn framebuffer_texture(&self, texture: NonZeroU32);
    /// Attaches a renderbuffer as color attachment 0 of the bound framebuffer.
    fn framebuffer_renderbuffer(&self, renderbuffer: NonZeroU32);
    /// Completeness status of the bound framebuffer.
    fn framebuffer_status(&self) -> u32;
    /// Copies the color rectangle `[left, top, right, bottom]` of `read`
    /// into the same rectangle of `draw` with nearest filtering. Ignores the
    /// scissor test and leaves the framebuffer bindings as they were.
    fn blit_framebuffer(&self, read: NonZeroU32, draw: NonZeroU32, rect: [i32; 4]);

    /// Declares the format of one attribute location in a vertex array.
    fn vertex_attrib_format(
        &self,
        vertex_array: NonZeroU32,
        location: u32,
        ty: VertexAttribType,
        binding: u32,
        relative_offset: u32,
    );
    /// Sets the instance divisor of a binding point in a vertex array.
    fn vertex_binding_divisor(&self, vertex_array: NonZeroU32, binding: u32, divisor: u32);
    /// Binds a buffer to a binding point of a vertex array.
    fn bind_vertex_buffer(
        &self,
        vertex_array: NonZeroU32,
        binding: u32,
        buffer: Option<NonZeroU32>,
        offset: usize,
        stride: u32,
    );

    /// Allocates uninitialized storage for a buffer.
    fn buffer_storage(&self, buffer: NonZeroU32, usage: BufferUsage, size: usize);
    /// Writes into a buffer.
    fn buffer_sub_data(&self, buffer: NonZeroU32, usage: BufferUsage, offset: usize, data: &[u8]);

    /// Applies sampler state to a sampler object.
    fn sampler_parameters(&self, sampler: NonZeroU32, state: SamplerState);
    /// Binds a sampler to texture unit `unit`, or unbinds it.
    fn bind_sampler(&self, unit: u32, sampler: Option<NonZeroU32>);

    /// Sets the source and compiles a shader. Returns the info log on failure.
    ///
    /// # Errors
    ///
    /// Returns the driver's info log when compilation fails.
    fn compile_shader(&self, shader: NonZeroU32, source: &str) -> Result<(), String>;
    /// Attaches a shader to a program.
    fn attach_shader(&self, program: NonZeroU32, shader: NonZeroU32);
    /// Detaches a shader from a program.
    fn detach_shader(&self, program: NonZeroU32, shader: NonZeroU32);
    /// Links a program. Returns the info log on failure.
    ///
    /// # Errors
    ///
    /// Returns the driver's info log when linking fails.
    fn link_program(&self, program: NonZeroU32) -> Result<(), String>;

    /// Inserts a fence after all previously submitted commands and returns
    /// its token. Tokens increase monotonically.
    fn insert_fence(&self) -> Option<u64>;
    /// Non-blocking poll.
    fn fence_signaled(&self, fence: u64) -> bool;
    /// Releases a fence.
    fn delete_fence(&self, fence: u64);
    /// Submits pending commands.
    fn flush(&self);
    /// Blocks until all submitted commands complete.
    fn finish(&self);
}

/// Converts a raw name into a [`NonZeroU32`], for callers that carry `0` as
/// "no object".
#[must_use]
pub fn name(id: u32) -> Option<NonZeroU32> {
    NonZeroU32::new(id)
}
