//! Per-context device bookkeeping.
//!
//! A [`Server`] owns everything one GL context needs besides the caches:
//! binding state, samplers and vertex formats, upload pools, and the fences
//! that tell when submitted work is done. It lives on the render thread.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Arc;

use bitflags::bitflags;

use crate::backend::{BackendFormat, BackendTexture, Ownership};
use crate::buffer_pool::{BufferAllocPool, CpuBufferCache, PoolSlice};
use crate::caps::Caps;
use crate::driver::{BufferUsage, Driver, ObjectKind, PixelUpload, TextureTarget, FRAMEBUFFER_COMPLETE, NO_ERROR};
use crate::error::ServerError;
use crate::object::{GpuObject, ObjectRef};
use crate::render_thread::RenderThread;
use crate::resource_provider::{ResourceProvider, SamplerState};
use crate::texture::Texture;
use crate::vertex_format::{VertexAttrib, VertexFormat};

bitflags! {
    /// Requested properties of a new texture.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SurfaceFlags: u32 {
        /// Counts against the application's GPU memory budget.
        const BUDGETED = 1;
        /// Can be drawn into; gets framebuffers.
        const RENDERABLE = 1 << 1;
        /// Backed by protected memory.
        const PROTECTED = 1 << 2;
    }
}

/// Tuning knobs for a [`Server`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerOptions {
    /// Overrides [`Caps::skip_error_checks`] when set.
    pub skip_error_checks: Option<bool>,
    /// Idle CPU scratch buffers kept for repacking uploads.
    pub cpu_buffer_cache_size: usize,
    /// Minimum size of a vertex pool block in bytes.
    pub vertex_block_size: usize,
    /// Minimum size of an instance pool block in bytes.
    pub instance_block_size: usize,
    /// Minimum size of an index pool block in bytes.
    pub index_block_size: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            skip_error_checks: None,
            cpu_buffer_cache_size: 6,
            vertex_block_size: 1 << 16,
            instance_block_size: 1 << 15,
            index_block_size: 1 << 14,
        }
    }
}

/// Tracks driver binding state to skip redundant binds.
///
/// `None` means "unknown", which always rebinds.
#[derive(Debug)]
pub struct CommandBuffer {
    framebuffer: Option<Option<NonZeroU32>>,
    textures: Vec<Option<Option<NonZeroU32>>>,
    samplers: Vec<Option<Option<NonZeroU32>>>,
}

impl CommandBuffer {
    fn new(texture_units: u32) -> Self {
        // the last unit belongs to the driver for texture updates
        let units = texture_units.saturating_sub(1) as usize;
        Self {
            framebuffer: None,
            textures: vec![None; units],
            samplers: vec![None; units],
        }
    }

    /// Units available for binding.
    #[must_use]
    pub fn texture_units(&self) -> u32 {
        u32::try_from(self.textures.len()).unwrap_or(u32::MAX)
    }

    /// The framebuffer last bound through this buffer, if known.
    #[must_use]
    pub fn bound_framebuffer(&self) -> Option<Option<NonZeroU32>> {
        self.framebuffer
    }

    /// Binds `framebuffer`, or the default one.
    pub fn bind_framebuffer(&mut self, driver: &dyn Driver, framebuffer: Option<NonZeroU32>) {
        if self.framebuffer != Some(framebuffer) {
            driver.bind_framebuffer(framebuffer);
            self.framebuffer = Some(framebuffer);
        }
    }

    /// Binds a texture and sampler to `unit`.
    ///
    /// # Panics
    ///
    /// Panics if `unit` is not below [`texture_units`](Self::texture_units).
    pub fn bind_texture(
        &mut self,
        driver: &dyn Driver,
        unit: u32,
        target: TextureTarget,
        texture: Option<NonZeroU32>,
        sampler: Option<NonZeroU32>,
    ) {
        let index = unit as usize;
        assert!(
            index < self.textures.len(),
            "texture unit {unit} out of range for {} units",
            self.textures.len()
        );
        if self.textures[index] != Some(texture) {
            driver.bind_texture_unit(unit, target, texture);
            self.textures[index] = Some(texture);
        }
        if self.samplers[index] != Some(sampler) {
            driver.bind_sampler(unit, sampler);
            self.samplers[index] = Some(sampler);
        }
    }

    /// Forgets all tracked state, e.g. after foreign code touched the
    /// context.
    pub fn reset_states(&mut self) {
        self.framebuffer = None;
        self.textures.fill(None);
        self.samplers.fill(None);
    }
}

/// Framebuffers that draw into a texture.
///
/// With more than one sample, drawing goes to a multisampled renderbuffer
/// that is resolved into the texture's framebuffer.
#[derive(Debug)]
pub struct RenderTarget {
    framebuffer: GpuObject,
    msaa_framebuffer: Option<GpuObject>,
    msaa_color: Option<GpuObject>,
    sample_count: i32,
}

impl RenderTarget {
    /// Framebuffer with the texture attached; the resolve target.
    #[must_use]
    pub fn framebuffer(&self) -> u32 {
        self.framebuffer.id()
    }

    /// Multisampled framebuffer to draw into, when `sample_count > 1`.
    #[must_use]
    pub fn msaa_framebuffer(&self) -> Option<u32> {
        self.msaa_framebuffer.as_ref().map(GpuObject::id)
    }

    /// Framebuffer to draw into.
    #[must_use]
    pub fn draw_framebuffer(&self) -> u32 {
        self.msaa_framebuffer().unwrap_or_else(|| self.framebuffer())
    }

    /// Samples per pixel.
    #[must_use]
    pub fn sample_count(&self) -> i32 {
        self.sample_count
    }

    fn close(&self, driver: &dyn Driver) {
        self.framebuffer.close(driver);
        if let Some(framebuffer) = &self.msaa_framebuffer {
            framebuffer.close(driver);
        }
        if let Some(color) = &self.msaa_color {
            color.close(driver);
        }
    }

    fn abandon(&self) {
        self.framebuffer.abandon();
        for object in [&self.msaa_framebuffer, &self.msaa_color].into_iter().flatten() {
            object.abandon();
        }
    }
}

/// A texture created or wrapped by a [`Server`].
#[derive(Debug)]
pub struct ServerTexture {
    texture: Texture,
    format: BackendFormat,
    level_count: i32,
    flags: SurfaceFlags,
    render_target: Option<RenderTarget>,
    ownership: Ownership,
}

impl ServerTexture {
    /// The texture object.
    #[must_use]
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Level-0 width.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    /// Level-0 height.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.texture.height()
    }

    /// Pixel format.
    #[must_use]
    pub fn format(&self) -> BackendFormat {
        self.format
    }

    /// Allocated mip levels.
    #[must_use]
    pub fn level_count(&self) -> i32 {
        self.level_count
    }

    /// Flags it was created with.
    #[must_use]
    pub fn flags(&self) -> SurfaceFlags {
        self.flags
    }

    /// Framebuffers, for renderable textures.
    #[must_use]
    pub fn render_target(&self) -> Option<&RenderTarget> {
        self.render_target.as_ref()
    }

    /// Who deletes the native texture.
    #[must_use]
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Forgets every native object without driver calls. For lost contexts.
    pub fn abandon(&self) {
        if let Some(target) = &self.render_target {
            target.abandon();
        }
        self.texture.abandon();
    }

    /// Deletes everything the crate owns now. A borrowed texture is left to
    /// its producer.
    pub fn close(&self, driver: &dyn Driver) {
        if let Some(target) = &self.render_target {
            target.close(driver);
        }
        match self.ownership {
            Ownership::Owned => self.texture.close(driver),
            Ownership::Borrowed => self.texture.abandon(),
        }
    }
}

impl Drop for ServerTexture {
    fn drop(&mut self) {
        if self.ownership == Ownership::Borrowed {
            self.texture.abandon();
        }
    }
}

type FinishedCallback = Box<dyn FnOnce()>;

/// Device bookkeeping for one GL context.
///
/// Created when the context becomes current and torn down with
/// [`disconnect`](Self::disconnect). Every method must be called on the
/// render thread, and none but `disconnect` after disconnecting.
pub struct Server<D: Driver> {
    driver: D,
    render_thread: Arc<RenderThread>,
    caps: Caps,
    skip_error_checks: bool,
    command_buffer: CommandBuffer,
    resource_provider: ResourceProvider,
    cpu_buffer_cache: CpuBufferCache,
    vertex_pool: BufferAllocPool,
    instance_pool: BufferAllocPool,
    index_pool: BufferAllocPool,
    finished_callbacks: VecDeque<(u64, FinishedCallback)>,
    last_fence: u64,
    disconnected: bool,
}

impl<D: Driver> Server<D> {
    /// Binds the calling thread as the render thread and sets up the
    /// per-context state.
    ///
    /// # Errors
    ///
    /// [`ServerError::MissingCapabilities`] if the context lacks baseline
    /// features. The list is meant to be shown to the user.
    ///
    /// # Panics
    ///
    /// Panics if `render_thread` is bound to another thread.
    pub fn new(driver: D, render_thread: Arc<RenderThread>, options: ServerOptions) -> Result<Self, ServerError> {
        render_thread.bind_current();
        let caps = driver.caps().clone();
        let missing = caps.missing_requirements();
        if !missing.is_empty() {
            tracing::error!(?missing, "GPU lacks required capabilities");
            return Err(ServerError::MissingCapabilities(missing));
        }
        let skip_error_checks = options.skip_error_checks.unwrap_or(caps.skip_error_checks);
        tracing::info!(version = ?caps.version, skip_error_checks, "GL server connected");

        let pool = |usage, size| BufferAllocPool::new(Arc::clone(&render_thread), usage, size);
        Ok(Self {
            command_buffer: CommandBuffer::new(caps.max_texture_units),
            resource_provider: ResourceProvider::new(Arc::clone(&render_thread)),
            cpu_buffer_cache: CpuBufferCache::new(options.cpu_buffer_cache_size),
            vertex_pool: pool(BufferUsage::Vertex, options.vertex_block_size),
            instance_pool: pool(BufferUsage::Instance, options.instance_block_size),
            index_pool: pool(BufferUsage::Index, options.index_block_size),
            finished_callbacks: VecDeque::new(),
            last_fence: 0,
            disconnected: false,
            skip_error_checks,
            caps,
            driver,
            render_thread,
        })
    }

    #[track_caller]
    fn check_connected(&self) {
        assert!(!self.disconnected, "server used after disconnect");
        self.render_thread.check_render_thread();
    }

    /// The driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The render thread.
    pub fn render_thread(&self) -> &Arc<RenderThread> {
        &self.render_thread
    }

    /// Capabilities read at creation.
    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    /// Whether driver error queries are skipped.
    pub fn skips_error_checks(&self) -> bool {
        self.skip_error_checks
    }

    /// Binding state.
    pub fn command_buffer(&mut self) -> &mut CommandBuffer {
        &mut self.command_buffer
    }

    /// Whether [`disconnect`](Self::disconnect) has been called.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Consumes the pending error flag; `true` if the last calls succeeded.
    fn check_error(&self, what: &str) -> bool {
        if self.skip_error_checks {
            return true;
        }
        let error = self.driver.get_error();
        if error == NO_ERROR {
            true
        } else {
            tracing::warn!("{what} failed with GL error {error:#x}");
            false
        }
    }

    fn clear_errors(&self) {
        if !self.skip_error_checks {
            self.driver.clear_errors();
        }
    }

    fn check_framebuffer(&self, what: &str) -> bool {
        if self.skip_error_checks {
            return true;
        }
        let status = self.driver.framebuffer_status();
        if status == FRAMEBUFFER_COMPLETE {
            true
        } else {
            tracing::warn!("{what} framebuffer incomplete: {status:#x}");
            false
        }
    }

    /// Allocates a texture with `level_count` mip levels, plus framebuffers
    /// when `flags` has [`SurfaceFlags::RENDERABLE`].
    ///
    /// Returns `None` when the request can't be met: protected memory,
    /// external or unsupported formats, unsupported sample counts, or a
    /// driver failure. Nothing created by a failed call stays allocated.
    ///
    /// # Panics
    ///
    /// Panics if a size, `level_count` or `sample_count` is less than 1,
    /// off the render thread, or after disconnect.
    pub fn create_texture(
        &mut self,
        width: i32,
        height: i32,
        format: BackendFormat,
        level_count: i32,
        sample_count: i32,
        flags: SurfaceFlags,
    ) -> Option<ServerTexture> {
        self.check_connected();
        assert!(width > 0 && height > 0, "texture size {width}x{height} is empty");
        assert!(level_count > 0, "level count {level_count} is less than 1");
        assert!(sample_count > 0, "sample count {sample_count} is less than 1");

        if flags.contains(SurfaceFlags::PROTECTED) && !self.caps.protected_content {
            tracing::debug!("protected textures are not supported");
            return None;
        }
        if format.is_external() {
            tracing::debug!(format = format.format(), "can't allocate an external format");
            return None;
        }
        let Some(internal_format) = self.caps.texture_internal_format(format.format()) else {
            tracing::warn!("unsupported texture format {:#x}", format.format());
            return None;
        };
        if width.max(height) > self.caps.max_texture_size {
            tracing::warn!(width, height, max = self.caps.max_texture_size, "texture too large");
            return None;
        }
        let renderable = flags.contains(SurfaceFlags::RENDERABLE);
        if renderable && !self.caps.is_format_renderable(internal_format, sample_count) {
            tracing::debug!(sample_count, "format {internal_format:#x} is not renderable");
            return None;
        }

        let texture = Texture::new(Arc::clone(&self.render_thread), TextureTarget::Texture2D);
        self.clear_errors();
        texture.allocate_2d(&self.driver, internal_format, width, height, level_count - 1);
        let texture_id = NonZeroU32::new(texture.id())?;
        if !self.check_error("texture allocation") {
            texture.close(&self.driver);
            return None;
        }

        let render_target = if renderable {
            let target = self.create_render_target(texture_id, internal_format, width, height, sample_count);
            if target.is_none() {
                texture.close(&self.driver);
                return None;
            }
            target
        } else {
            None
        };

        Some(ServerTexture {
            texture,
            format,
            level_count,
            flags,
            render_target,
            ownership: Ownership::Owned,
        })
    }

    /// Creates all framebuffer objects or none of them.
    fn create_render_target(
        &mut self,
        texture: NonZeroU32,
        internal_format: u32,
        width: i32,
        height: i32,
        sample_count: i32,
    ) -> Option<RenderTarget> {
        let object = |kind| GpuObject::new(Arc::clone(&self.render_thread), kind);
        let multisampled = sample_count > 1;
        let target = RenderTarget {
            framebuffer: object(ObjectKind::Framebuffer),
            msaa_framebuffer: multisampled.then(|| object(ObjectKind::Framebuffer)),
            msaa_color: multisampled.then(|| object(ObjectKind::Renderbuffer)),
            sample_count,
        };
        let created = self.init_render_target(&target, texture, internal_format, width, height);
        // the bind state is whatever the failed step left behind
        self.command_buffer.bind_framebuffer(&self.driver, None);
        if created {
            Some(target)
        } else {
            target.close(&self.driver);
            None
        }
    }

    fn init_render_target(
        &mut self,
        target: &RenderTarget,
        texture: NonZeroU32,
        internal_format: u32,
        width: i32,
        height: i32,
    ) -> bool {
        let driver: &dyn Driver = &self.driver;
        if let (Some(framebuffer), Some(color)) = (&target.msaa_framebuffer, &target.msaa_color) {
            let Some(color) = color.name(driver) else { return false };
            self.clear_errors();
            driver.renderbuffer_storage_multisample(color, target.sample_count, internal_format, width, height);
            if !self.check_error("multisample renderbuffer allocation") {
                return false;
            }
            let Some(framebuffer) = framebuffer.name(driver) else { return false };
            self.command_buffer.bind_framebuffer(driver, Some(framebuffer));
            driver.framebuffer_renderbuffer(color);
            if !self.check_framebuffer("multisample") {
                return false;
            }
        }

        let Some(framebuffer) = target.framebuffer.name(driver) else { return false };
        self.command_buffer.bind_framebuffer(driver, Some(framebuffer));
        driver.framebuffer_texture(texture);
        self.check_framebuffer("resolve")
    }

    /// Wraps a texture created outside the crate. An [`Ownership::Borrowed`]
    /// texture is never deleted by the crate.
    ///
    /// Returns `None` for an invalid description or protected memory.
    ///
    /// # Panics
    ///
    /// Panics off the render thread or after disconnect.
    pub fn wrap_backend_texture(&mut self, backend: &BackendTexture, ownership: Ownership) -> Option<ServerTexture> {
        self.check_connected();
        if !backend.is_valid() {
            tracing::warn!(?backend, "invalid backend texture");
            return None;
        }
        if backend.info.protected && !self.caps.protected_content {
            return None;
        }
        let id = NonZeroU32::new(backend.info.texture)?;
        let object = ObjectRef::new(Arc::clone(&self.render_thread), ObjectKind::Texture, id);
        let texture = Texture::from_ref(object, backend.info.target, backend.width, backend.height);
        Some(ServerTexture {
            texture,
            format: backend.info.format,
            level_count: backend.info.levels,
            flags: SurfaceFlags::empty(),
            render_target: None,
            ownership,
        })
    }

    /// Uploads a `width`x`height` rectangle of `pixels` whose rows are
    /// `row_bytes` apart. Rows are repacked through a scratch buffer when
    /// the driver can't skip the padding itself.
    ///
    /// Returns `false` if the driver reported an error.
    ///
    /// # Panics
    ///
    /// Panics if `bytes_per_pixel` is 0, if `pixels` is too short for the
    /// rectangle, off the render thread, or after disconnect.
    #[allow(clippy::too_many_arguments)]
    pub fn write_pixels(
        &mut self,
        texture: &ServerTexture,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        row_bytes: usize,
        bytes_per_pixel: usize,
        pixels: &[u8],
    ) -> bool {
        self.check_connected();
        assert!(bytes_per_pixel > 0, "bytes per pixel is 0");
        let (Ok(columns), Ok(rows)) = (usize::try_from(width), usize::try_from(height)) else {
            panic!("negative upload size {width}x{height}");
        };
        if rows == 0 || columns == 0 {
            return true;
        }
        let trim = columns * bytes_per_pixel;
        assert!(row_bytes >= trim, "row bytes {row_bytes} shorter than {trim}");
        let needed = row_bytes * (rows - 1) + trim;
        assert!(pixels.len() >= needed, "{} pixel bytes, need {needed}", pixels.len());

        let mut upload = PixelUpload {
            x,
            y,
            ..PixelUpload::packed(width, height, format, ty)
        };
        self.clear_errors();
        if row_bytes == trim {
            texture.texture.upload(&self.driver, &upload, &pixels[..needed]);
        } else if self.caps.unpack_row_length && row_bytes % bytes_per_pixel == 0 {
            upload.row_length = i32::try_from(row_bytes / bytes_per_pixel).unwrap_or(i32::MAX);
            texture.texture.upload(&self.driver, &upload, &pixels[..needed]);
        } else {
            let mut packed = self.cpu_buffer_cache.acquire(trim * rows);
            for (dst, src) in packed.chunks_exact_mut(trim).zip(pixels.chunks(row_bytes)) {
                dst.copy_from_slice(&src[..trim]);
            }
            texture.texture.upload(&self.driver, &upload, &packed);
            self.cpu_buffer_cache.recycle(packed);
        }
        self.check_error("pixel upload")
    }

    /// Resolves the multisampled color of a render target into its texture
    /// over `rect`, `[left, top, right, bottom]` in pixels.
    ///
    /// Returns `false` when there is nothing to resolve: the texture isn't
    /// renderable, is single-sampled, or its framebuffers were never
    /// created.
    ///
    /// # Panics
    ///
    /// Panics if `rect` is inverted or leaves the texture, off the render
    /// thread, or after disconnect.
    pub fn resolve_render_target(&mut self, texture: &ServerTexture, rect: [i32; 4]) -> bool {
        self.check_connected();
        let [left, top, right, bottom] = rect;
        let width = i32::try_from(texture.width()).unwrap_or(i32::MAX);
        let height = i32::try_from(texture.height()).unwrap_or(i32::MAX);
        assert!(
            0 <= left && left <= right && right <= width && 0 <= top && top <= bottom && bottom <= height,
            "resolve rectangle {rect:?} outside {width}x{height}"
        );
        let Some(target) = &texture.render_target else {
            return false;
        };
        let (Some(read), Some(draw)) = (
            target.msaa_framebuffer().and_then(NonZeroU32::new),
            NonZeroU32::new(target.framebuffer()),
        ) else {
            return false;
        };
        self.driver.blit_framebuffer(read, draw, rect);
        true
    }

    /// Regenerates every mip level from level 0.
    ///
    /// # Panics
    ///
    /// Panics off the render thread or after disconnect.
    pub fn generate_mipmaps(&mut self, texture: &ServerTexture) -> bool {
        self.check_connected();
        self.clear_errors();
        texture.texture.generate_mipmap(&self.driver);
        self.check_error("mipmap generation")
    }

    /// Binds a texture with sampler `state` to `unit`.
    ///
    /// # Panics
    ///
    /// Panics if the unit is out of range, off the render thread, or after
    /// disconnect.
    pub fn bind_texture(&mut self, unit: u32, texture: &ServerTexture, state: SamplerState) {
        self.check_connected();
        let driver: &dyn Driver = &self.driver;
        let sampler = self.resource_provider.find_or_create_sampler(driver, state);
        let id = texture.texture.get(driver);
        self.command_buffer.bind_texture(
            driver,
            unit,
            texture.texture.target(),
            NonZeroU32::new(id),
            NonZeroU32::new(sampler),
        );
    }

    /// The shared sampler for `state`; see
    /// [`ResourceProvider::find_or_create_sampler`].
    pub fn find_or_create_sampler(&mut self, state: SamplerState) -> u32 {
        self.check_connected();
        self.resource_provider.find_or_create_sampler(&self.driver, state)
    }

    /// The shared vertex format for `attribs`.
    pub fn find_or_create_vertex_format(
        &mut self,
        attribs: impl IntoIterator<Item = VertexAttrib>,
    ) -> Arc<VertexFormat> {
        self.check_connected();
        self.resource_provider.find_or_create_vertex_format(attribs)
    }

    /// Stages per-vertex data for this frame.
    pub fn append_vertices<T: bytemuck::Pod>(&mut self, data: &[T]) -> Option<PoolSlice> {
        self.check_connected();
        self.vertex_pool.append(&self.driver, data)
    }

    /// Stages per-instance data for this frame.
    pub fn append_instances<T: bytemuck::Pod>(&mut self, data: &[T]) -> Option<PoolSlice> {
        self.check_connected();
        self.instance_pool.append(&self.driver, data)
    }

    /// Stages indices for this frame.
    pub fn append_indices<T: bytemuck::Pod>(&mut self, data: &[T]) -> Option<PoolSlice> {
        self.check_connected();
        self.index_pool.append(&self.driver, data)
    }

    /// Ends a frame's use of the upload pools.
    pub fn reset_pools(&mut self) {
        self.check_connected();
        for pool in [&mut self.vertex_pool, &mut self.instance_pool, &mut self.index_pool] {
            pool.reset();
        }
    }

    /// Inserts a fence after all work submitted so far. Tokens increase
    /// monotonically; `0` means the driver had no fence and the work was
    /// waited for instead.
    pub fn insert_fence(&mut self) -> u64 {
        self.check_connected();
        let Some(fence) = self.driver.insert_fence() else {
            tracing::warn!("no fence available, waiting for the GPU");
            self.driver.finish();
            return 0;
        };
        debug_assert!(fence > self.last_fence, "fence {fence} after {}", self.last_fence);
        self.last_fence = fence;
        tracing::debug!(fence, "inserted fence");
        fence
    }

    /// Whether the GPU has passed `fence`. Never blocks.
    pub fn check_fence(&self, fence: u64) -> bool {
        self.check_connected();
        fence == 0 || self.driver.fence_signaled(fence)
    }

    /// Releases a fence.
    pub fn delete_fence(&self, fence: u64) {
        self.check_connected();
        if fence != 0 {
            self.driver.delete_fence(fence);
        }
    }

    /// Runs `callback` once all work submitted so far has completed.
    /// Callbacks run in the order they were added.
    pub fn add_finished_callback(&mut self, callback: impl FnOnce() + 'static) {
        let fence = self.insert_fence();
        self.finished_callbacks.push_back((fence, Box::new(callback)));
    }

    /// Runs the callbacks whose fences have passed, stopping at the first
    /// one that hasn't so none runs ahead of an earlier one.
    pub fn check_finished_callbacks(&mut self) {
        self.check_connected();
        while let Some(&(fence, _)) = self.finished_callbacks.front() {
            if !self.check_fence(fence) {
                break;
            }
            self.delete_fence(fence);
            if let Some((_, callback)) = self.finished_callbacks.pop_front() {
                callback();
            }
        }
    }

    /// Blocks until the GPU is idle, then runs every finished callback.
    pub fn wait_for_queue(&mut self) {
        self.check_connected();
        self.driver.finish();
        self.check_finished_callbacks();
    }

    /// Number of callbacks still waiting.
    pub fn pending_callbacks(&self) -> usize {
        self.finished_callbacks.len()
    }

    /// Submits staged pool data, runs deferred render calls, flushes the
    /// driver and runs finished callbacks.
    pub fn flush(&mut self) {
        self.check_connected();
        for pool in [&mut self.vertex_pool, &mut self.instance_pool, &mut self.index_pool] {
            pool.submit(&self.driver);
        }
        self.render_thread.flush(&self.driver);
        self.driver.flush();
        self.check_finished_callbacks();
    }

    /// Tears the server down.
    ///
    /// With `cleanup`, every owned object is deleted and the GPU is drained.
    /// Without it the context is assumed gone: objects are forgotten and
    /// queued render calls dropped with no driver call. Objects still held
    /// elsewhere are forgotten too when they are dropped later. Either way all
    /// finished callbacks run. Calling it again does nothing.
    pub fn disconnect(&mut self, cleanup: bool) {
        if self.disconnected {
            return;
        }
        self.render_thread.check_render_thread();
        for pool in [&mut self.vertex_pool, &mut self.instance_pool, &mut self.index_pool] {
            pool.reset();
        }
        self.cpu_buffer_cache.release_all();
        self.command_buffer.reset_states();

        if cleanup {
            self.resource_provider.release(&self.driver);
            for pool in [&mut self.vertex_pool, &mut self.instance_pool, &mut self.index_pool] {
                pool.release(&self.driver);
            }
            self.render_thread.flush(&self.driver);
            self.driver.finish();
            for (fence, callback) in self.finished_callbacks.drain(..) {
                if fence != 0 {
                    self.driver.delete_fence(fence);
                }
                callback();
            }
        } else {
            self.resource_provider.discard();
            for pool in [&mut self.vertex_pool, &mut self.instance_pool, &mut self.index_pool] {
                pool.discard();
            }
            let dropped = self.render_thread.abandon_context();
            if dropped > 0 {
                tracing::debug!(dropped, "dropped render calls for a lost context");
            }
            for (_, callback) in self.finished_callbacks.drain(..) {
                callback();
            }
        }
        self.disconnected = true;
        tracing::info!(cleanup, "GL server disconnected");
    }
}

impl<D: Driver> std::fmt::Debug for Server<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("caps", &self.caps)
            .field("skip_error_checks", &self.skip_error_checks)
            .field("pending_callbacks", &self.finished_callbacks.len())
            .field("disconnected", &self.disconnected)
            .finish_non_exhaustive()
    }
}
