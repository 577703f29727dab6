//! Decoded image cache.
//!
//! Images are decoded on whichever thread asks for them. The upload is
//! posted to the render queue as one action, so a texture returned here has
//! no native object until the next [`RenderThread::flush`].

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use bitflags::bitflags;

use crate::caps::{RGBA, RGBA8, UNSIGNED_BYTE};
use crate::driver::{Driver, PixelUpload, TextureTarget};
use crate::error::TextureError;
use crate::loader::ResourceLoader;
use crate::render_thread::RenderThread;
use crate::texture::{Texture, CLAMP_TO_EDGE, MAX_DIMENSION};

bitflags! {
    /// How [`TextureManager::get_or_create`] treats a request.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TextureFlags: u32 {
        /// Keep the result, including a failure, until the next reload.
        const CACHE = 1;
        /// Allocate and generate the full mip chain.
        const MIPMAP = 1 << 1;
    }
}

/// Called after [`TextureManager::reload`] cleared the cache.
pub type TextureListener = Arc<dyn Fn(&TextureManager) + Send + Sync>;

/// Initialized by exactly one caller; `None` is a cached failure.
type Entry = Arc<OnceLock<Option<Arc<Texture>>>>;

type Entries = HashMap<String, HashMap<String, Entry>>;

struct Decoded {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// Loads image files into textures once per key.
pub struct TextureManager {
    render_thread: Arc<RenderThread>,
    loader: Arc<dyn ResourceLoader>,
    entries: Mutex<Entries>,
    /// Bumped by every [`close`](TextureManager::close), under the entries
    /// lock. Cached uploads from an older generation are closed unrun.
    generation: Arc<AtomicU64>,
    listeners: Mutex<Vec<TextureListener>>,
}

impl TextureManager {
    /// An empty cache reading files through `loader`.
    #[must_use]
    pub fn new(render_thread: Arc<RenderThread>, loader: Arc<dyn ResourceLoader>) -> Self {
        Self {
            render_thread,
            loader,
            entries: Mutex::new(HashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().expect("texture cache lock poisoned")
    }

    /// The texture for `namespace:path`, or `None` if the file can't be
    /// loaded or decoded. Callable from any thread.
    ///
    /// With [`TextureFlags::CACHE`], concurrent callers for the same key
    /// share one decode and receive the same texture. Without it every call
    /// decodes and uploads a new texture.
    pub fn get_or_create(&self, namespace: &str, path: &str, flags: TextureFlags) -> Option<Arc<Texture>> {
        if !flags.contains(TextureFlags::CACHE) {
            return self.create(namespace, path, flags, None);
        }
        let (entry, generation) = {
            let mut entries = self.entries();
            let entry = Arc::clone(
                entries
                    .entry(namespace.to_owned())
                    .or_default()
                    .entry(path.to_owned())
                    .or_default(),
            );
            (entry, self.generation.load(Ordering::Acquire))
        };
        // the map lock is released, other keys can load meanwhile
        entry
            .get_or_init(|| self.create(namespace, path, flags, Some(generation)))
            .clone()
    }

    /// Decodes now and posts the upload. A cached texture carries the cache
    /// generation it was requested in.
    fn create(
        &self,
        namespace: &str,
        path: &str,
        flags: TextureFlags,
        generation: Option<u64>,
    ) -> Option<Arc<Texture>> {
        let decoded = match self.decode(namespace, path) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::error!("{err}");
                return None;
            }
        };
        tracing::debug!(namespace, path, decoded.width, decoded.height, "decoded texture");

        let texture = Arc::new(Texture::new(Arc::clone(&self.render_thread), TextureTarget::Texture2D));
        texture.set_dimension(decoded.width, decoded.height, 1);
        let upload = Arc::clone(&texture);
        let mipmap = flags.contains(TextureFlags::MIPMAP);
        let current = Arc::clone(&self.generation);
        self.render_thread.post(move |driver| {
            if generation.is_some_and(|generation| generation != current.load(Ordering::Acquire)) {
                // its cache entry was dropped by a close while it decoded
                tracing::debug!("closing texture loaded across a reload");
                upload.close(driver);
                return;
            }
            upload_texture(driver, &upload, &decoded, mipmap);
        });
        Some(texture)
    }

    fn decode(&self, namespace: &str, path: &str) -> Result<Decoded, TextureError> {
        let bytes = self.loader.open(namespace, path)?;
        let image = image::load_from_memory(&bytes)
            .map_err(|source| TextureError::Decode {
                namespace: namespace.to_owned(),
                path: path.to_owned(),
                source,
            })?
            .to_rgba8();
        let (width, height) = image.dimensions();
        let range = 1..=MAX_DIMENSION;
        if !range.contains(&width) || !range.contains(&height) {
            return Err(TextureError::Size {
                namespace: namespace.to_owned(),
                path: path.to_owned(),
                width,
                height,
            });
        }
        Ok(Decoded {
            width,
            height,
            pixels: image.into_raw(),
        })
    }

    /// Runs `listener` after every [`reload`](Self::reload), after the ones
    /// already registered.
    pub fn add_listener(&self, listener: impl Fn(&Self) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .expect("texture listener lock poisoned")
            .push(Arc::new(listener));
    }

    /// Number of cached keys, failures and loads in progress included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().values().map(HashMap::len).sum()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deletes every cached texture, forgets cached failures and runs the
    /// listeners in registration order.
    ///
    /// A panicking listener is logged and the remaining ones still run.
    ///
    /// # Panics
    ///
    /// Panics if not called from the render thread.
    pub fn reload(&self, driver: &dyn Driver) {
        self.close(driver);
        let listeners = self
            .listeners
            .lock()
            .expect("texture listener lock poisoned")
            .clone();
        tracing::info!(listeners = listeners.len(), "reloading textures");
        for (index, listener) in listeners.iter().enumerate() {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(self))).is_err() {
                tracing::error!(index, "texture reload listener panicked");
            }
        }
    }

    /// Deletes every cached texture. Holders of a cached [`Arc<Texture>`]
    /// keep an inert handle.
    ///
    /// Loads still decoding on other threads are closed when their upload
    /// reaches the render queue.
    ///
    /// # Panics
    ///
    /// Panics if not called from the render thread.
    pub fn close(&self, driver: &dyn Driver) {
        self.render_thread.check_render_thread();
        let entries = {
            let mut entries = self.entries();
            self.generation.fetch_add(1, Ordering::AcqRel);
            std::mem::take(&mut *entries)
        };
        for entry in entries.into_values().flat_map(HashMap::into_values) {
            if let Some(Some(texture)) = entry.get() {
                texture.close(driver);
            }
        }
    }
}

impl std::fmt::Debug for TextureManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureManager")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

/// Allocate, upload, filter and mipmap in one render-thread action.
#[allow(clippy::cast_possible_wrap)]
fn upload_texture(driver: &dyn Driver, texture: &Texture, decoded: &Decoded, mipmap: bool) {
    if texture.is_closed() {
        return;
    }
    // both sizes are at most MAX_DIMENSION
    let (width, height) = (decoded.width as i32, decoded.height as i32);
    let max_level = if mipmap {
        31 - width.max(height).leading_zeros() as i32
    } else {
        0
    };
    texture.allocate_2d(driver, RGBA8, width, height, max_level);
    if !texture.is_created() {
        return;
    }
    texture.upload(driver, &PixelUpload::packed(width, height, RGBA, UNSIGNED_BYTE), &decoded.pixels);
    texture.set_wrap(driver, CLAMP_TO_EDGE, CLAMP_TO_EDGE);
    texture.set_filter(driver, true, mipmap);
    if mipmap {
        texture.generate_mipmap(driver);
    }
    tracing::debug!(id = texture.id(), width, height, max_level, "uploaded texture");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Barrier;

    use super::*;
    use crate::driver::ObjectKind;
    use crate::testing::{png, FakeDriver, MemoryLoader};

    /// Holds its first open until the test releases it.
    struct GatedLoader {
        files: MemoryLoader,
        armed: AtomicBool,
        entered: Barrier,
        release: Barrier,
    }

    impl ResourceLoader for GatedLoader {
        fn open(&self, namespace: &str, path: &str) -> Result<Vec<u8>, crate::LoadError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.wait();
                self.release.wait();
            }
            self.files.open(namespace, path)
        }
    }

    fn setup() -> (Arc<RenderThread>, FakeDriver, Arc<MemoryLoader>, TextureManager) {
        let rt = RenderThread::new();
        rt.bind_current();
        let loader = Arc::new(MemoryLoader::new());
        loader.insert("gui", "button.png", png(4, 2, [255, 0, 0, 255]));
        let manager = TextureManager::new(Arc::clone(&rt), Arc::clone(&loader) as Arc<dyn ResourceLoader>);
        (rt, FakeDriver::new(), loader, manager)
    }

    #[test]
    fn concurrent_requests_share_one_decode() {
        let (rt, driver, loader, manager) = setup();
        let barrier = Barrier::new(2);
        let (a, b) = std::thread::scope(|s| {
            let request = || {
                barrier.wait();
                manager.get_or_create("gui", "button.png", TextureFlags::CACHE)
            };
            let a = s.spawn(request);
            let b = s.spawn(request);
            (a.join().unwrap().unwrap(), b.join().unwrap().unwrap())
        });
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loader.opens("gui", "button.png"), 1);
        assert_eq!(rt.pending(), 1);

        rt.flush(&driver);
        assert_eq!(driver.created(ObjectKind::Texture), 1);
        assert_eq!(driver.uploads().len(), 1);
        assert_eq!((a.width(), a.height()), (4, 2));
        manager.close(&driver);
        assert_eq!(driver.live_total(), 0);
    }

    #[test]
    fn upload_happens_on_flush() {
        let (rt, driver, _loader, manager) = setup();
        let texture = manager
            .get_or_create("gui", "button.png", TextureFlags::CACHE)
            .unwrap();
        assert!(!texture.is_created());
        assert_eq!(driver.created(ObjectKind::Texture), 0);

        rt.flush(&driver);
        assert!(texture.is_created());
        let (id, upload, len) = driver.uploads()[0].clone();
        assert_eq!(id, texture.id());
        assert_eq!(upload, PixelUpload::packed(4, 2, RGBA, UNSIGNED_BYTE));
        assert_eq!(len, 4 * 2 * 4);
        assert_eq!(driver.count_calls("generate_mipmap"), 0);
        manager.close(&driver);
    }

    #[test]
    fn mipmap_flag_allocates_full_chain() {
        let (rt, driver, _loader, manager) = setup();
        let texture = manager
            .get_or_create("gui", "button.png", TextureFlags::CACHE | TextureFlags::MIPMAP)
            .unwrap();
        rt.flush(&driver);
        let id = texture.id();
        assert!(driver.calls().contains(&format!("tex_storage {id} 3 4x2")));
        assert_eq!(driver.count_calls("generate_mipmap"), 1);
        manager.close(&driver);
    }

    #[test]
    fn uncached_requests_decode_every_time() {
        let (rt, driver, loader, manager) = setup();
        let a = manager.get_or_create("gui", "button.png", TextureFlags::empty()).unwrap();
        let b = manager.get_or_create("gui", "button.png", TextureFlags::empty()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(loader.opens("gui", "button.png"), 2);
        assert!(manager.is_empty());
        rt.flush(&driver);
        assert_eq!(driver.created(ObjectKind::Texture), 2);
        drop((a, b));
        rt.flush(&driver);
        assert_eq!(driver.live_total(), 0);
    }

    #[test]
    fn failures_are_sticky_until_reload() {
        let (_rt, driver, loader, manager) = setup();
        loader.insert("gui", "bad.png", b"not an image".to_vec());
        assert!(manager.get_or_create("gui", "missing.png", TextureFlags::CACHE).is_none());
        assert!(manager.get_or_create("gui", "missing.png", TextureFlags::CACHE).is_none());
        assert!(manager.get_or_create("gui", "bad.png", TextureFlags::CACHE).is_none());
        assert_eq!(loader.opens("gui", "missing.png"), 1);

        loader.insert("gui", "missing.png", png(1, 1, [0; 4]));
        assert!(manager.get_or_create("gui", "missing.png", TextureFlags::CACHE).is_none());
        manager.reload(&driver);
        assert!(manager.get_or_create("gui", "missing.png", TextureFlags::CACHE).is_some());
        assert_eq!(loader.opens("gui", "missing.png"), 2);
    }

    #[test]
    fn closed_before_flush_skips_upload() {
        let (rt, driver, _loader, manager) = setup();
        let texture = manager
            .get_or_create("gui", "button.png", TextureFlags::CACHE)
            .unwrap();
        manager.close(&driver);
        rt.flush(&driver);
        assert!(texture.is_closed());
        assert_eq!(driver.created(ObjectKind::Texture), 0);
    }

    #[test]
    fn reload_replaces_textures_and_runs_listeners() {
        let (rt, driver, _loader, manager) = setup();
        let old = manager
            .get_or_create("gui", "button.png", TextureFlags::CACHE)
            .unwrap();
        rt.flush(&driver);
        let old_id = old.id();

        let ran = Arc::new(AtomicUsize::new(0));
        manager.add_listener(|_| panic!("listener bug"));
        let counter = Arc::clone(&ran);
        manager.add_listener(move |manager| {
            counter.fetch_add(1, Ordering::SeqCst);
            manager.get_or_create("gui", "button.png", TextureFlags::CACHE);
        });
        manager.reload(&driver);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!driver.is_live(old_id));
        assert!(old.is_closed());

        rt.flush(&driver);
        let new = manager
            .get_or_create("gui", "button.png", TextureFlags::CACHE)
            .unwrap();
        assert!(new.is_created());
        assert_ne!(new.id(), old_id);
        manager.close(&driver);
        assert!(rt.check_leaks());
    }

    #[test]
    fn load_in_flight_during_reload_is_closed_on_flush() {
        let rt = RenderThread::new();
        rt.bind_current();
        let driver = FakeDriver::new();
        let loader = Arc::new(GatedLoader {
            files: MemoryLoader::new(),
            armed: AtomicBool::new(true),
            entered: Barrier::new(2),
            release: Barrier::new(2),
        });
        loader.files.insert("gui", "button.png", png(4, 2, [255, 0, 0, 255]));
        let manager = TextureManager::new(Arc::clone(&rt), Arc::clone(&loader) as Arc<dyn ResourceLoader>);

        let stale = std::thread::scope(|s| {
            let request = s.spawn(|| manager.get_or_create("gui", "button.png", TextureFlags::CACHE));
            loader.entered.wait();
            manager.reload(&driver);
            loader.release.wait();
            request.join().unwrap().unwrap()
        });
        assert!(manager.is_empty());

        rt.flush(&driver);
        assert!(stale.is_closed());
        assert_eq!(driver.created(ObjectKind::Texture), 0);

        let fresh = manager
            .get_or_create("gui", "button.png", TextureFlags::CACHE)
            .unwrap();
        rt.flush(&driver);
        assert!(fresh.is_created());
        manager.close(&driver);
        assert_eq!(driver.live_total(), 0);
        assert!(rt.check_leaks());
    }
}
