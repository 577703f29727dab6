//! [`Driver`] over a [`glow::Context`].
//!
//! Texture updates go through a bind, since DSA entry points are not
//! available everywhere. How that bind treats existing state is decided
//! once per driver, see [`TextureBinding`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use glow::HasContext;

use crate::caps::Caps;
use crate::driver::{BufferUsage, Driver, ObjectKind, PixelUpload, TextureTarget};
use crate::resource_provider::SamplerState;
use crate::vertex_format::VertexAttribType;

/// `GL_TEXTURE_MAX_ANISOTROPY`, core in 4.6 and the same value as the EXT.
const TEXTURE_MAX_ANISOTROPY: u32 = 0x84FE;

/// How texture updates bind the texture they modify.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureBinding {
    /// Bind on the last texture unit and leave it there. That unit is never
    /// handed out for drawing, so nothing needs restoring.
    SetupUnit,
    /// Query the current binding and restore it afterwards. For contexts
    /// shared with code that doesn't know about the reserved unit.
    RestorePrevious,
}

/// A [`Driver`] issuing real GL calls.
///
/// Not `Send`: it must stay on the thread where its context is current.
pub struct GlowDriver {
    gl: Arc<glow::Context>,
    caps: Caps,
    binding: TextureBinding,
    fences: RefCell<HashMap<u64, glow::Fence>>,
    next_fence: Cell<u64>,
    sizes: LevelSizes,
}

/// Level-0 sizes of the textures this driver allocated.
///
/// glow has no `glGetTexLevelParameter`, so this record is what
/// [`Driver::texture_level_size`] reports under glow.
#[derive(Debug, Default)]
struct LevelSizes(RefCell<HashMap<NonZeroU32, (i32, i32)>>);

impl LevelSizes {
    fn record(&self, texture: NonZeroU32, width: i32, height: i32) {
        self.0.borrow_mut().insert(texture, (width, height));
    }

    fn forget(&self, texture: NonZeroU32) {
        self.0.borrow_mut().remove(&texture);
    }

    /// `(0, 0)` for a texture without allocated storage.
    fn level(&self, texture: NonZeroU32, level: i32) -> (i32, i32) {
        let Some((width, height)) = self.0.borrow().get(&texture).copied() else {
            return (0, 0);
        };
        let shift = u32::try_from(level).unwrap_or(0).min(31);
        ((width >> shift).max(1), (height >> shift).max(1))
    }
}

impl GlowDriver {
    /// Queries capabilities and uses [`TextureBinding::SetupUnit`].
    ///
    /// # Safety
    ///
    /// `gl` must be current on the calling thread for the whole lifetime of
    /// the driver, and the driver must only be used from that thread.
    pub unsafe fn new(gl: Arc<glow::Context>) -> Self {
        unsafe { Self::with_texture_binding(gl, TextureBinding::SetupUnit) }
    }

    /// Like [`new`](Self::new) with an explicit binding strategy.
    ///
    /// # Safety
    ///
    /// Same as [`new`](Self::new).
    pub unsafe fn with_texture_binding(gl: Arc<glow::Context>, binding: TextureBinding) -> Self {
        let caps = unsafe { query_caps(&gl) };
        tracing::info!(?caps, ?binding, "GL driver ready");
        Self {
            gl,
            caps,
            binding,
            fences: RefCell::new(HashMap::new()),
            next_fence: Cell::new(1),
            sizes: LevelSizes::default(),
        }
    }

    /// The context.
    #[must_use]
    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    /// The binding strategy in use.
    #[must_use]
    pub fn texture_binding(&self) -> TextureBinding {
        self.binding
    }

    /// Runs `f` with `texture` bound to `target`.
    fn with_texture<R>(&self, target: TextureTarget, texture: NonZeroU32, f: impl FnOnce(&glow::Context, u32) -> R) -> R {
        let gl = &*self.gl;
        let target = target.gl_enum();
        unsafe {
            match self.binding {
                TextureBinding::SetupUnit => {
                    gl.active_texture(glow::TEXTURE0 + self.caps.max_texture_units.saturating_sub(1));
                    gl.bind_texture(target, Some(glow::NativeTexture(texture)));
                    f(gl, target)
                }
                TextureBinding::RestorePrevious => {
                    let binding = if target == glow::TEXTURE_2D {
                        glow::TEXTURE_BINDING_2D
                    } else {
                        glow::TEXTURE_BINDING_2D_MULTISAMPLE
                    };
                    let previous = name(gl.get_parameter_i32(binding));
                    gl.bind_texture(target, Some(glow::NativeTexture(texture)));
                    let result = f(gl, target);
                    gl.bind_texture(target, previous.map(glow::NativeTexture));
                    result
                }
            }
        }
    }

    fn unpack(&self, upload: &PixelUpload) {
        unsafe {
            self.gl.pixel_store_i32(glow::UNPACK_ROW_LENGTH, upload.row_length);
            self.gl.pixel_store_i32(glow::UNPACK_SKIP_ROWS, upload.skip_rows);
            self.gl.pixel_store_i32(glow::UNPACK_SKIP_PIXELS, upload.skip_pixels);
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, upload.alignment);
        }
    }
}

impl std::fmt::Debug for GlowDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlowDriver")
            .field("caps", &self.caps)
            .field("binding", &self.binding)
            .field("fences", &self.fences.borrow().len())
            .finish_non_exhaustive()
    }
}

/// Raw GL integer to an object name.
fn name(raw: i32) -> Option<NonZeroU32> {
    u32::try_from(raw).ok().and_then(NonZeroU32::new)
}

/// Reads version, extensions and limits.
///
/// # Safety
///
/// Requires a valid, current OpenGL context.
unsafe fn query_caps(gl: &glow::Context) -> Caps {
    let version = gl.version();
    let at_least = |major, minor| (version.major, version.minor) >= (major, minor);
    let extensions = gl.supported_extensions();
    let has = |extension: &str| extensions.contains(extension);
    let limit = |pname| unsafe { gl.get_parameter_i32(pname) };
    let count = |pname| u32::try_from(limit(pname)).unwrap_or(0);

    Caps {
        version: (version.major, version.minor),
        texture_storage: at_least(4, 2) || has("GL_ARB_texture_storage"),
        vertex_attrib_binding: at_least(4, 3) || has("GL_ARB_vertex_attrib_binding"),
        texture_swizzle: at_least(3, 3) || has("GL_ARB_texture_swizzle"),
        clear_texture: at_least(4, 4) || has("GL_ARB_clear_texture"),
        unpack_row_length: !version.is_embedded || at_least(3, 0),
        protected_content: false,
        skip_error_checks: false,
        max_samples: limit(glow::MAX_SAMPLES),
        max_texture_size: limit(glow::MAX_TEXTURE_SIZE),
        max_vertex_attribs: count(glow::MAX_VERTEX_ATTRIBS),
        max_texture_units: count(glow::MAX_COMBINED_TEXTURE_IMAGE_UNITS),
    }
}

// SAFETY for every block below: the constructor's contract guarantees a
// current context on this thread.
impl Driver for GlowDriver {
    fn caps(&self) -> &Caps {
        &self.caps
    }

    fn create_object(&self, kind: ObjectKind) -> Option<NonZeroU32> {
        let gl = &*self.gl;
        let created = unsafe {
            match kind {
                ObjectKind::Texture => gl.create_texture().map(|o| o.0),
                ObjectKind::Buffer => gl.create_buffer().map(|o| o.0),
                ObjectKind::Framebuffer => gl.create_framebuffer().map(|o| o.0),
                ObjectKind::Renderbuffer => gl.create_renderbuffer().map(|o| o.0),
                ObjectKind::VertexArray => gl.create_vertex_array().map(|o| o.0),
                ObjectKind::Sampler => gl.create_sampler().map(|o| o.0),
                ObjectKind::Program => gl.create_program().map(|o| o.0),
                ObjectKind::Shader(stage) => gl.create_shader(stage.gl_enum()).map(|o| o.0),
            }
        };
        created
            .inspect_err(|err| tracing::warn!(?kind, "can't create GL object: {err}"))
            .ok()
    }

    fn delete_object(&self, kind: ObjectKind, id: NonZeroU32) {
        let gl = &*self.gl;
        unsafe {
            match kind {
                ObjectKind::Texture => {
                    self.sizes.forget(id);
                    gl.delete_texture(glow::NativeTexture(id));
                }
                ObjectKind::Buffer => gl.delete_buffer(glow::NativeBuffer(id)),
                ObjectKind::Framebuffer => gl.delete_framebuffer(glow::NativeFramebuffer(id)),
                ObjectKind::Renderbuffer => gl.delete_renderbuffer(glow::NativeRenderbuffer(id)),
                ObjectKind::VertexArray => gl.delete_vertex_array(glow::NativeVertexArray(id)),
                ObjectKind::Sampler => gl.delete_sampler(glow::NativeSampler(id)),
                ObjectKind::Program => gl.delete_program(glow::NativeProgram(id)),
                ObjectKind::Shader(_) => gl.delete_shader(glow::NativeShader(id)),
            }
        }
    }

    fn clear_errors(&self) {
        // bounded: a lost context can report errors forever
        for _ in 0..16 {
            if unsafe { self.gl.get_error() } == glow::NO_ERROR {
                break;
            }
        }
    }

    fn get_error(&self) -> u32 {
        unsafe { self.gl.get_error() }
    }

    fn init_texture(&self, target: TextureTarget, texture: NonZeroU32) {
        self.with_texture(target, texture, |_, _| ());
    }

    fn texture_parameter_i32(&self, target: TextureTarget, texture: NonZeroU32, pname: u32, value: i32) {
        self.with_texture(target, texture, |gl, target| unsafe {
            gl.tex_parameter_i32(target, pname, value);
        });
    }

    fn texture_parameter_f32(&self, target: TextureTarget, texture: NonZeroU32, pname: u32, value: f32) {
        self.with_texture(target, texture, |gl, target| unsafe {
            gl.tex_parameter_f32(target, pname, value);
        });
    }

    fn texture_swizzle(&self, target: TextureTarget, texture: NonZeroU32, swizzle: [i32; 4]) {
        self.with_texture(target, texture, |gl, target| unsafe {
            gl.tex_parameter_i32_slice(target, glow::TEXTURE_SWIZZLE_RGBA, &swizzle);
        });
    }

    fn texture_storage_2d(
        &self,
        target: TextureTarget,
        texture: NonZeroU32,
        levels: i32,
        internal_format: u32,
        width: i32,
        height: i32,
    ) {
        self.with_texture(target, texture, |gl, target| unsafe {
            gl.tex_storage_2d(target, levels, internal_format, width, height);
        });
        self.sizes.record(texture, width, height);
    }

    #[expect(clippy::cast_possible_wrap)]
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
    ) {
        self.with_texture(target, texture, |gl, target| unsafe {
            gl.tex_image_2d(
                target,
                level,
                internal_format as i32,
                width,
                height,
                0,
                external_format,
                external_type,
                glow::PixelUnpackData::Slice(None),
            );
        });
        if level == 0 {
            self.sizes.record(texture, width, height);
        }
    }

    fn texture_storage_2d_multisample(
        &self,
        texture: NonZeroU32,
        samples: i32,
        internal_format: u32,
        width: i32,
        height: i32,
    ) {
        self.with_texture(TextureTarget::Texture2DMultisample, texture, |gl, target| unsafe {
            gl.tex_storage_2d_multisample(target, samples, internal_format, width, height, true);
        });
        self.sizes.record(texture, width, height);
    }

    fn texture_level_size(&self, _target: TextureTarget, texture: NonZeroU32, level: i32) -> (i32, i32) {
        self.sizes.level(texture, level)
    }

    fn texture_sub_image_2d(&self, target: TextureTarget, texture: NonZeroU32, upload: &PixelUpload, pixels: &[u8]) {
        self.unpack(upload);
        self.with_texture(target, texture, |gl, target| unsafe {
            gl.tex_sub_image_2d(
                target,
                upload.level,
                upload.x,
                upload.y,
                upload.width,
                upload.height,
                upload.format,
                upload.ty,
                glow::PixelUnpackData::Slice(Some(pixels)),
            );
        });
        self.unpack(&PixelUpload {
            alignment: 4,
            ..PixelUpload::packed(0, 0, 0, 0)
        });
    }

    fn clear_texture(&self, target: TextureTarget, texture: NonZeroU32, level: i32, rect: Option<[i32; 4]>) {
        let gl = &*self.gl;
        unsafe {
            let framebuffer = match gl.create_framebuffer() {
                Ok(framebuffer) => framebuffer,
                Err(err) => {
                    tracing::warn!("can't clear texture {texture}: {err}");
                    return;
                }
            };
            let previous = name(gl.get_parameter_i32(glow::DRAW_FRAMEBUFFER_BINDING));
            let scissor = gl.is_enabled(glow::SCISSOR_TEST);
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(framebuffer));
            gl.framebuffer_texture_2d(
                glow::DRAW_FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                target.gl_enum(),
                Some(glow::NativeTexture(texture)),
                level,
            );
            match rect {
                Some([x, y, width, height]) => {
                    gl.enable(glow::SCISSOR_TEST);
                    gl.scissor(x, y, width, height);
                }
                None => gl.disable(glow::SCISSOR_TEST),
            }
            gl.clear_buffer_f32_slice(glow::COLOR, 0, &[0.0; 4]);
            if scissor {
                gl.enable(glow::SCISSOR_TEST);
            } else {
                gl.disable(glow::SCISSOR_TEST);
            }
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, previous.map(glow::NativeFramebuffer));
            gl.delete_framebuffer(framebuffer);
        }
    }

    fn generate_mipmap(&self, target: TextureTarget, texture: NonZeroU32) {
        self.with_texture(target, texture, |gl, target| unsafe { gl.generate_mipmap(target) });
    }

    fn bind_texture_unit(&self, unit: u32, target: TextureTarget, texture: Option<NonZeroU32>) {
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(target.gl_enum(), texture.map(glow::NativeTexture));
        }
    }

    fn renderbuffer_storage_multisample(
        &self,
        renderbuffer: NonZeroU32,
        samples: i32,
        internal_format: u32,
        width: i32,
        height: i32,
    ) {
        let gl = &*self.gl;
        unsafe {
            gl.bind_renderbuffer(glow::RENDERBUFFER, Some(glow::NativeRenderbuffer(renderbuffer)));
            gl.renderbuffer_storage_multisample(glow::RENDERBUFFER, samples, internal_format, width, height);
            gl.bind_renderbuffer(glow::RENDERBUFFER, None);
        }
    }

    fn bind_framebuffer(&self, framebuffer: Option<NonZeroU32>) {
        unsafe {
            self.gl
                .bind_framebuffer(glow::FRAMEBUFFER, framebuffer.map(glow::NativeFramebuffer));
        }
    }

    fn framebuffer_texture(&self, texture: NonZeroU32) {
        unsafe {
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(glow::NativeTexture(texture)),
                0,
            );
        }
    }

    fn framebuffer_renderbuffer(&self, renderbuffer: NonZeroU32) {
        unsafe {
            self.gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::RENDERBUFFER,
                Some(glow::NativeRenderbuffer(renderbuffer)),
            );
        }
    }

    fn framebuffer_status(&self) -> u32 {
        unsafe { self.gl.check_framebuffer_status(glow::FRAMEBUFFER) }
    }

    fn blit_framebuffer(&self, read: NonZeroU32, draw: NonZeroU32, rect: [i32; 4]) {
        let gl = &*self.gl;
        let [left, top, right, bottom] = rect;
        unsafe {
            let previous_read = name(gl.get_parameter_i32(glow::READ_FRAMEBUFFER_BINDING));
            let previous_draw = name(gl.get_parameter_i32(glow::DRAW_FRAMEBUFFER_BINDING));
            // the blit is clipped by the scissor
            let scissor = gl.is_enabled(glow::SCISSOR_TEST);
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(glow::NativeFramebuffer(read)));
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(glow::NativeFramebuffer(draw)));
            if scissor {
                gl.disable(glow::SCISSOR_TEST);
            }
            gl.blit_framebuffer(
                left,
                top,
                right,
                bottom,
                left,
                top,
                right,
                bottom,
                glow::COLOR_BUFFER_BIT,
                glow::NEAREST,
            );
            if scissor {
                gl.enable(glow::SCISSOR_TEST);
            }
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, previous_read.map(glow::NativeFramebuffer));
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, previous_draw.map(glow::NativeFramebuffer));
        }
    }

    fn vertex_attrib_format(
        &self,
        vertex_array: NonZeroU32,
        location: u32,
        ty: VertexAttribType,
        binding: u32,
        relative_offset: u32,
    ) {
        let gl = &*self.gl;
        unsafe {
            gl.bind_vertex_array(Some(glow::NativeVertexArray(vertex_array)));
            gl.enable_vertex_attrib_array(location);
            if ty.is_integer() {
                gl.vertex_attrib_format_i32(location, ty.components(), ty.gl_type(), relative_offset);
            } else {
                gl.vertex_attrib_format_f32(
                    location,
                    ty.components(),
                    ty.gl_type(),
                    ty.is_normalized(),
                    relative_offset,
                );
            }
            gl.vertex_attrib_binding(location, binding);
            gl.bind_vertex_array(None);
        }
    }

    fn vertex_binding_divisor(&self, vertex_array: NonZeroU32, binding: u32, divisor: u32) {
        let gl = &*self.gl;
        unsafe {
            gl.bind_vertex_array(Some(glow::NativeVertexArray(vertex_array)));
            gl.vertex_binding_divisor(binding, divisor);
            gl.bind_vertex_array(None);
        }
    }

    fn bind_vertex_buffer(
        &self,
        vertex_array: NonZeroU32,
        binding: u32,
        buffer: Option<NonZeroU32>,
        offset: usize,
        stride: u32,
    ) {
        let (Ok(offset), Ok(stride)) = (i32::try_from(offset), i32::try_from(stride)) else {
            tracing::error!(offset, stride, "vertex buffer binding out of GL range");
            return;
        };
        let gl = &*self.gl;
        unsafe {
            gl.bind_vertex_array(Some(glow::NativeVertexArray(vertex_array)));
            gl.bind_vertex_buffer(binding, buffer.map(glow::NativeBuffer), offset, stride);
            gl.bind_vertex_array(None);
        }
    }

    #[expect(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn buffer_storage(&self, buffer: NonZeroU32, usage: BufferUsage, size: usize) {
        let gl = &*self.gl;
        let size = size as i32;
        let hint = match usage {
            BufferUsage::Vertex | BufferUsage::Index => glow::DYNAMIC_DRAW,
            BufferUsage::Instance => glow::STREAM_DRAW,
        };
        // the copy target leaves vertex array state alone
        unsafe {
            gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(glow::NativeBuffer(buffer)));
            gl.buffer_data_size(glow::COPY_WRITE_BUFFER, size, hint);
            gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
        }
    }

    #[expect(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn buffer_sub_data(&self, buffer: NonZeroU32, _usage: BufferUsage, offset: usize, data: &[u8]) {
        let gl = &*self.gl;
        let offset = offset as i32;
        unsafe {
            gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(glow::NativeBuffer(buffer)));
            gl.buffer_sub_data_u8_slice(glow::COPY_WRITE_BUFFER, offset, data);
            gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
        }
    }

    fn sampler_parameters(&self, sampler: NonZeroU32, state: SamplerState) {
        let gl = &*self.gl;
        let sampler = glow::NativeSampler(sampler);
        unsafe {
            gl.sampler_parameter_i32(sampler, glow::TEXTURE_MIN_FILTER, state.min_filter);
            gl.sampler_parameter_i32(sampler, glow::TEXTURE_MAG_FILTER, state.mag_filter);
            gl.sampler_parameter_i32(sampler, glow::TEXTURE_WRAP_S, state.wrap_s);
            gl.sampler_parameter_i32(sampler, glow::TEXTURE_WRAP_T, state.wrap_t);
            if state.max_anisotropy > 1 {
                gl.sampler_parameter_f32(sampler, TEXTURE_MAX_ANISOTROPY, f32::from(state.max_anisotropy));
            }
        }
    }

    fn bind_sampler(&self, unit: u32, sampler: Option<NonZeroU32>) {
        unsafe { self.gl.bind_sampler(unit, sampler.map(glow::NativeSampler)) };
    }

    fn compile_shader(&self, shader: NonZeroU32, source: &str) -> Result<(), String> {
        let gl = &*self.gl;
        let shader = glow::NativeShader(shader);
        unsafe {
            gl.shader_source(shader, source);
            gl.compile_shader(shader);
            if gl.get_shader_compile_status(shader) {
                Ok(())
            } else {
                Err(gl.get_shader_info_log(shader))
            }
        }
    }

    fn attach_shader(&self, program: NonZeroU32, shader: NonZeroU32) {
        unsafe {
            self.gl
                .attach_shader(glow::NativeProgram(program), glow::NativeShader(shader));
        }
    }

    fn detach_shader(&self, program: NonZeroU32, shader: NonZeroU32) {
        unsafe {
            self.gl
                .detach_shader(glow::NativeProgram(program), glow::NativeShader(shader));
        }
    }

    fn link_program(&self, program: NonZeroU32) -> Result<(), String> {
        let gl = &*self.gl;
        let program = glow::NativeProgram(program);
        unsafe {
            gl.link_program(program);
            if gl.get_program_link_status(program) {
                Ok(())
            } else {
                Err(gl.get_program_info_log(program))
            }
        }
    }

    fn insert_fence(&self) -> Option<u64> {
        let fence = unsafe { self.gl.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0) }
            .inspect_err(|err| tracing::warn!("can't insert fence: {err}"))
            .ok()?;
        let token = self.next_fence.get();
        self.next_fence.set(token + 1);
        self.fences.borrow_mut().insert(token, fence);
        Some(token)
    }

    fn fence_signaled(&self, fence: u64) -> bool {
        let fences = self.fences.borrow();
        let Some(&sync) = fences.get(&fence) else {
            return true;
        };
        let status = unsafe { self.gl.client_wait_sync(sync, 0, 0) };
        status == glow::ALREADY_SIGNALED || status == glow::CONDITION_SATISFIED
    }

    fn delete_fence(&self, fence: u64) {
        if let Some(sync) = self.fences.borrow_mut().remove(&fence) {
            unsafe { self.gl.delete_sync(sync) };
        }
    }

    fn flush(&self) {
        unsafe { self.gl.flush() };
    }

    fn finish(&self) {
        unsafe { self.gl.finish() };
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn id(raw: u32) -> NonZeroU32 {
        NonZeroU32::new(raw).unwrap()
    }

    #[test]
    fn level_sizes_halve_down_to_one() {
        let sizes = LevelSizes::default();
        sizes.record(id(3), 64, 16);
        assert_eq!(sizes.level(id(3), 0), (64, 16));
        assert_eq!(sizes.level(id(3), 2), (16, 4));
        assert_eq!(sizes.level(id(3), 5), (2, 1));
        assert_eq!(sizes.level(id(3), 40), (1, 1));
    }

    #[test]
    fn unknown_or_deleted_texture_has_no_size() {
        let sizes = LevelSizes::default();
        assert_eq!(sizes.level(id(1), 0), (0, 0));
        sizes.record(id(1), 8, 8);
        sizes.record(id(1), 32, 32);
        assert_eq!(sizes.level(id(1), 0), (32, 32));
        sizes.forget(id(1));
        assert_eq!(sizes.level(id(1), 0), (0, 0));
    }
}
