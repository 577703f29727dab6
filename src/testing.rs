//! Test doubles: a recording [`Driver`] and an in-memory [`ResourceLoader`].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use crate::caps::Caps;
use crate::driver::{BufferUsage, Driver, ObjectKind, PixelUpload, TextureTarget, FRAMEBUFFER_COMPLETE, NO_ERROR};
use crate::error::LoadError;
use crate::loader::ResourceLoader;
use crate::resource_provider::SamplerState;
use crate::vertex_format::VertexAttribType;

/// `GL_FRAMEBUFFER_INCOMPLETE_ATTACHMENT`.
pub const FRAMEBUFFER_INCOMPLETE: u32 = 0x8CD6;
/// `GL_OUT_OF_MEMORY`.
pub const OUT_OF_MEMORY: u32 = 0x0505;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttribRecord {
    pub vertex_array: u32,
    pub location: u32,
    pub ty: VertexAttribType,
    pub binding: u32,
    pub offset: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexBufferRecord {
    pub vertex_array: u32,
    pub binding: u32,
    pub buffer: u32,
    pub offset: usize,
    pub stride: u32,
}

/// A driver that keeps books instead of talking to a GPU.
pub struct FakeDriver {
    caps: Caps,
    next_id: Cell<u32>,
    created: RefCell<HashMap<ObjectKind, usize>>,
    live: RefCell<HashMap<ObjectKind, BTreeSet<u32>>>,
    deleted_ids: RefCell<Vec<u32>>,
    delete_threads: RefCell<Vec<ThreadId>>,
    fail_creation: RefCell<HashSet<ObjectKind>>,
    errors: RefCell<Vec<u32>>,
    storage_error: Cell<u32>,
    texture_sizes: RefCell<HashMap<u32, (i32, i32)>>,
    reported_size: Cell<Option<(i32, i32)>>,
    framebuffer_checks: Cell<usize>,
    fail_framebuffer_check: Cell<Option<usize>>,
    fail_link: Cell<bool>,
    attachments: RefCell<HashMap<u32, HashSet<u32>>>,
    double_attaches: Cell<usize>,
    compiles: Cell<usize>,
    calls: RefCell<Vec<String>>,
    attribs: RefCell<Vec<AttribRecord>>,
    vertex_buffers: RefCell<Vec<VertexBufferRecord>>,
    buffer_sizes: RefCell<HashMap<u32, usize>>,
    buffer_writes: RefCell<Vec<(u32, usize, Vec<u8>)>>,
    uploads: RefCell<Vec<(u32, PixelUpload, usize)>>,
    next_fence: Cell<u64>,
    fences: RefCell<BTreeSet<u64>>,
    signaled: RefCell<HashSet<u64>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::with_caps(Caps::default())
    }

    pub fn with_caps(caps: Caps) -> Self {
        Self {
            caps,
            next_id: Cell::new(1),
            created: RefCell::default(),
            live: RefCell::default(),
            deleted_ids: RefCell::default(),
            delete_threads: RefCell::default(),
            fail_creation: RefCell::default(),
            errors: RefCell::default(),
            storage_error: Cell::new(NO_ERROR),
            texture_sizes: RefCell::default(),
            reported_size: Cell::new(None),
            framebuffer_checks: Cell::new(0),
            fail_framebuffer_check: Cell::new(None),
            fail_link: Cell::new(false),
            attachments: RefCell::default(),
            double_attaches: Cell::new(0),
            compiles: Cell::new(0),
            calls: RefCell::default(),
            attribs: RefCell::default(),
            vertex_buffers: RefCell::default(),
            buffer_sizes: RefCell::default(),
            buffer_writes: RefCell::default(),
            uploads: RefCell::default(),
            next_fence: Cell::new(1),
            fences: RefCell::default(),
            signaled: RefCell::default(),
        }
    }

    fn log(&self, call: impl Into<String>) {
        self.calls.borrow_mut().push(call.into());
    }

    // --- knobs ---

    pub fn fail_creation(&self, kind: ObjectKind, fail: bool) {
        if fail {
            self.fail_creation.borrow_mut().insert(kind);
        } else {
            self.fail_creation.borrow_mut().remove(&kind);
        }
    }

    /// Makes the next storage allocation raise `error`.
    pub fn fail_next_storage(&self, error: u32) {
        self.storage_error.set(error);
    }

    /// Makes every size query report `size` regardless of the allocation.
    pub fn report_size(&self, size: Option<(i32, i32)>) {
        self.reported_size.set(size);
    }

    /// Makes the `n`th (1-based) framebuffer status check report incomplete.
    pub fn fail_framebuffer_check(&self, n: Option<usize>) {
        self.fail_framebuffer_check.set(n);
        self.framebuffer_checks.set(0);
    }

    pub fn fail_link(&self, fail: bool) {
        self.fail_link.set(fail);
    }

    pub fn signal_fence(&self, fence: u64) {
        self.signaled.borrow_mut().insert(fence);
    }

    // --- observations ---

    pub fn created(&self, kind: ObjectKind) -> usize {
        self.created.borrow().get(&kind).copied().unwrap_or(0)
    }

    pub fn live(&self, kind: ObjectKind) -> usize {
        self.live.borrow().get(&kind).map_or(0, BTreeSet::len)
    }

    pub fn live_total(&self) -> usize {
        self.live.borrow().values().map(BTreeSet::len).sum()
    }

    pub fn is_live(&self, id: u32) -> bool {
        self.live.borrow().values().any(|ids| ids.contains(&id))
    }

    pub fn deleted(&self, kind: ObjectKind) -> usize {
        self.created(kind) - self.live(kind)
    }

    pub fn deleted_ids(&self) -> Vec<u32> {
        self.deleted_ids.borrow().clone()
    }

    pub fn all_deletes_on(&self, thread: ThreadId) -> bool {
        self.delete_threads.borrow().iter().all(|t| *t == thread)
    }

    pub fn compiles(&self) -> usize {
        self.compiles.get()
    }

    pub fn double_attaches(&self) -> usize {
        self.double_attaches.get()
    }

    pub fn attached(&self, program: u32) -> usize {
        self.attachments.borrow().get(&program).map_or(0, HashSet::len)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn attribs(&self) -> Vec<AttribRecord> {
        self.attribs.borrow().clone()
    }

    pub fn vertex_buffers(&self) -> Vec<VertexBufferRecord> {
        self.vertex_buffers.borrow().clone()
    }

    pub fn buffer_size(&self, buffer: u32) -> Option<usize> {
        self.buffer_sizes.borrow().get(&buffer).copied()
    }

    pub fn buffer_writes(&self) -> Vec<(u32, usize, Vec<u8>)> {
        self.buffer_writes.borrow().clone()
    }

    pub fn uploads(&self) -> Vec<(u32, PixelUpload, usize)> {
        self.uploads.borrow().clone()
    }

    pub fn live_fences(&self) -> usize {
        self.fences.borrow().len()
    }
}

impl Driver for FakeDriver {
    fn caps(&self) -> &Caps {
        &self.caps
    }

    fn create_object(&self, kind: ObjectKind) -> Option<NonZeroU32> {
        if self.fail_creation.borrow().contains(&kind) {
            return None;
        }
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        *self.created.borrow_mut().entry(kind).or_default() += 1;
        self.live.borrow_mut().entry(kind).or_default().insert(id);
        self.log(format!("create {kind:?} {id}"));
        NonZeroU32::new(id)
    }

    fn delete_object(&self, kind: ObjectKind, id: NonZeroU32) {
        let removed = self
            .live
            .borrow_mut()
            .get_mut(&kind)
            .is_some_and(|ids| ids.remove(&id.get()));
        assert!(removed, "double delete or unknown {kind:?} {id}");
        if kind == ObjectKind::Program {
            self.attachments.borrow_mut().remove(&id.get());
        }
        self.deleted_ids.borrow_mut().push(id.get());
        self.delete_threads.borrow_mut().push(thread::current().id());
        self.log(format!("delete {kind:?} {id}"));
    }

    fn clear_errors(&self) {
        self.errors.borrow_mut().clear();
    }

    fn get_error(&self) -> u32 {
        let mut errors = self.errors.borrow_mut();
        if errors.is_empty() {
            NO_ERROR
        } else {
            errors.remove(0)
        }
    }

    fn init_texture(&self, target: TextureTarget, texture: NonZeroU32) {
        self.log(format!("init_texture {target:?} {texture}"));
    }

    fn texture_parameter_i32(&self, _target: TextureTarget, texture: NonZeroU32, pname: u32, value: i32) {
        self.log(format!("tex_param {texture} {pname:#x} {value}"));
    }

    fn texture_parameter_f32(&self, _target: TextureTarget, texture: NonZeroU32, pname: u32, value: f32) {
        self.log(format!("tex_param_f {texture} {pname:#x} {value}"));
    }

    fn texture_swizzle(&self, _target: TextureTarget, texture: NonZeroU32, swizzle: [i32; 4]) {
        self.log(format!("tex_swizzle {texture} {swizzle:?}"));
    }

    fn texture_storage_2d(
        &self,
        _target: TextureTarget,
        texture: NonZeroU32,
        levels: i32,
        _internal_format: u32,
        width: i32,
        height: i32,
    ) {
        self.log(format!("tex_storage {texture} {levels} {width}x{height}"));
        let error = self.storage_error.replace(NO_ERROR);
        if error == NO_ERROR {
            self.texture_sizes.borrow_mut().insert(texture.get(), (width, height));
        } else {
            self.errors.borrow_mut().push(error);
        }
    }

    fn texture_image_2d(
        &self,
        _target: TextureTarget,
        texture: NonZeroU32,
        level: i32,
        _internal_format: u32,
        width: i32,
        height: i32,
        _external_format: u32,
        _external_type: u32,
    ) {
        self.log(format!("tex_image {texture} {level} {width}x{height}"));
        if level == 0 {
            let error = self.storage_error.replace(NO_ERROR);
            if error == NO_ERROR {
                self.texture_sizes.borrow_mut().insert(texture.get(), (width, height));
            } else {
                self.errors.borrow_mut().push(error);
            }
        }
    }

    fn texture_storage_2d_multisample(
        &self,
        texture: NonZeroU32,
        samples: i32,
        _internal_format: u32,
        width: i32,
        height: i32,
    ) {
        self.log(format!("tex_storage_ms {texture} {samples} {width}x{height}"));
        self.texture_sizes.borrow_mut().insert(texture.get(), (width, height));
    }

    fn texture_level_size(&self, _target: TextureTarget, texture: NonZeroU32, level: i32) -> (i32, i32) {
        if let Some(size) = self.reported_size.get() {
            return size;
        }
        let (w, h) = self
            .texture_sizes
            .borrow()
            .get(&texture.get())
            .copied()
            .unwrap_or((0, 0));
        ((w >> level).max(1), (h >> level).max(1))
    }

    fn texture_sub_image_2d(&self, _target: TextureTarget, texture: NonZeroU32, upload: &PixelUpload, pixels: &[u8]) {
        self.log(format!("tex_sub_image {texture} {}", upload.level));
        self.uploads.borrow_mut().push((texture.get(), *upload, pixels.len()));
    }

    fn clear_texture(&self, _target: TextureTarget, texture: NonZeroU32, level: i32, rect: Option<[i32; 4]>) {
        self.log(format!("clear_texture {texture} {level} {rect:?}"));
    }

    fn generate_mipmap(&self, _target: TextureTarget, texture: NonZeroU32) {
        self.log(format!("generate_mipmap {texture}"));
    }

    fn bind_texture_unit(&self, unit: u32, _target: TextureTarget, texture: Option<NonZeroU32>) {
        self.log(format!("bind_texture {unit} {}", texture.map_or(0, NonZeroU32::get)));
    }

    fn renderbuffer_storage_multisample(
        &self,
        renderbuffer: NonZeroU32,
        samples: i32,
        _internal_format: u32,
        width: i32,
        height: i32,
    ) {
        self.log(format!("rb_storage {renderbuffer} {samples} {width}x{height}"));
    }

    fn bind_framebuffer(&self, framebuffer: Option<NonZeroU32>) {
        self.log(format!("bind_framebuffer {}", framebuffer.map_or(0, NonZeroU32::get)));
    }

    fn framebuffer_texture(&self, texture: NonZeroU32) {
        self.log(format!("fb_texture {texture}"));
    }

    fn framebuffer_renderbuffer(&self, renderbuffer: NonZeroU32) {
        self.log(format!("fb_renderbuffer {renderbuffer}"));
    }

    fn framebuffer_status(&self) -> u32 {
        let n = self.framebuffer_checks.get() + 1;
        self.framebuffer_checks.set(n);
        self.log("fb_status");
        if self.fail_framebuffer_check.get() == Some(n) {
            FRAMEBUFFER_INCOMPLETE
        } else {
            FRAMEBUFFER_COMPLETE
        }
    }

    fn blit_framebuffer(&self, read: NonZeroU32, draw: NonZeroU32, rect: [i32; 4]) {
        self.log(format!("blit {read} {draw} {rect:?}"));
    }

    fn vertex_attrib_format(
        &self,
        vertex_array: NonZeroU32,
        location: u32,
        ty: VertexAttribType,
        binding: u32,
        relative_offset: u32,
    ) {
        self.attribs.borrow_mut().push(AttribRecord {
            vertex_array: vertex_array.get(),
            location,
            ty,
            binding,
            offset: relative_offset,
        });
    }

    fn vertex_binding_divisor(&self, vertex_array: NonZeroU32, binding: u32, divisor: u32) {
        self.log(format!("divisor {vertex_array} {binding} {divisor}"));
    }

    fn bind_vertex_buffer(
        &self,
        vertex_array: NonZeroU32,
        binding: u32,
        buffer: Option<NonZeroU32>,
        offset: usize,
        stride: u32,
    ) {
        self.vertex_buffers.borrow_mut().push(VertexBufferRecord {
            vertex_array: vertex_array.get(),
            binding,
            buffer: buffer.map_or(0, NonZeroU32::get),
            offset,
            stride,
        });
    }

    fn buffer_storage(&self, buffer: NonZeroU32, _usage: BufferUsage, size: usize) {
        self.buffer_sizes.borrow_mut().insert(buffer.get(), size);
    }

    fn buffer_sub_data(&self, buffer: NonZeroU32, _usage: BufferUsage, offset: usize, data: &[u8]) {
        self.buffer_writes
            .borrow_mut()
            .push((buffer.get(), offset, data.to_vec()));
    }

    fn sampler_parameters(&self, sampler: NonZeroU32, state: SamplerState) {
        self.log(format!("sampler {sampler} {state:?}"));
    }

    fn bind_sampler(&self, unit: u32, sampler: Option<NonZeroU32>) {
        self.log(format!("bind_sampler {unit} {}", sampler.map_or(0, NonZeroU32::get)));
    }

    fn compile_shader(&self, shader: NonZeroU32, source: &str) -> Result<(), String> {
        self.compiles.set(self.compiles.get() + 1);
        self.log(format!("compile {shader}"));
        if source.contains("syntax error") {
            Err("0:1(1): error: syntax error, unexpected IDENTIFIER".to_owned())
        } else {
            Ok(())
        }
    }

    fn attach_shader(&self, program: NonZeroU32, shader: NonZeroU32) {
        let fresh = self
            .attachments
            .borrow_mut()
            .entry(program.get())
            .or_default()
            .insert(shader.get());
        if !fresh {
            self.double_attaches.set(self.double_attaches.get() + 1);
        }
    }

    fn detach_shader(&self, program: NonZeroU32, shader: NonZeroU32) {
        if let Some(set) = self.attachments.borrow_mut().get_mut(&program.get()) {
            set.remove(&shader.get());
        }
    }

    fn link_program(&self, program: NonZeroU32) -> Result<(), String> {
        self.log(format!("link {program}"));
        if self.fail_link.get() {
            Err("error: vertex shader output not consumed".to_owned())
        } else {
            Ok(())
        }
    }

    fn insert_fence(&self) -> Option<u64> {
        let fence = self.next_fence.get();
        self.next_fence.set(fence + 1);
        self.fences.borrow_mut().insert(fence);
        Some(fence)
    }

    fn fence_signaled(&self, fence: u64) -> bool {
        self.signaled.borrow().contains(&fence)
    }

    fn delete_fence(&self, fence: u64) {
        self.fences.borrow_mut().remove(&fence);
    }

    fn flush(&self) {
        self.log("flush");
    }

    fn finish(&self) {
        self.log("finish");
        let fences: Vec<u64> = self.fences.borrow().iter().copied().collect();
        self.signaled.borrow_mut().extend(fences);
    }
}

/// Serves resources from memory and counts how often each is opened.
#[derive(Default)]
pub struct MemoryLoader {
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
    opens: Mutex<HashMap<(String, String), usize>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, namespace: &str, path: &str, data: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap()
            .insert((namespace.to_owned(), path.to_owned()), data.into());
    }

    pub fn opens(&self, namespace: &str, path: &str) -> usize {
        self.opens
            .lock()
            .unwrap()
            .get(&(namespace.to_owned(), path.to_owned()))
            .copied()
            .unwrap_or(0)
    }
}

impl ResourceLoader for MemoryLoader {
    fn open(&self, namespace: &str, path: &str) -> Result<Vec<u8>, LoadError> {
        let key = (namespace.to_owned(), path.to_owned());
        *self.opens.lock().unwrap().entry(key.clone()).or_default() += 1;
        self.files
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| LoadError::NotFound {
                namespace: key.0,
                path: key.1,
            })
    }
}

/// Encodes a solid-color RGBA PNG.
pub fn png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("PNG encoding");
    bytes.into_inner()
}
