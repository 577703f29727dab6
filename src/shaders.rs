//! Shader shard and program cache.
//!
//! A shard is one compiled shader stage, cached by `(namespace, path)`. A
//! failed compile is cached too, as id `0`, so a broken file costs one
//! compile per [`reload`](ShaderManager::reload) rather than one per frame.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::driver::{Driver, ObjectKind, ShaderStage};
use crate::error::ShaderError;
use crate::loader::ResourceLoader;
use crate::object::ObjectRef;
use crate::render_thread::RenderThread;

/// Called after [`ShaderManager::reload`] cleared the cache.
pub type ShaderListener = Arc<dyn Fn(&ShaderManager, &dyn Driver) + Send + Sync>;

/// `None` is a cached failure.
type Shards = HashMap<String, HashMap<String, Option<ObjectRef>>>;

/// A linked program, or the invalid program with id `0`.
#[derive(Debug, Default)]
pub struct Program {
    object: Option<ObjectRef>,
}

impl Program {
    /// The program every failed link returns.
    #[must_use]
    pub const fn invalid() -> Self {
        Self { object: None }
    }

    /// Native name, `0` if invalid.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.object.as_ref().map_or(0, ObjectRef::id)
    }

    /// Whether linking succeeded.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.object.is_some()
    }

    /// Deletes the program now.
    ///
    /// # Panics
    ///
    /// Panics if not called from the render thread.
    pub fn close(&mut self, driver: &dyn Driver) {
        if let Some(object) = self.object.take() {
            object.release(driver);
        }
    }
}

/// Compiles shaders once per key and links them into programs.
pub struct ShaderManager {
    render_thread: Arc<RenderThread>,
    loader: Arc<dyn ResourceLoader>,
    shards: Mutex<Shards>,
    listeners: Mutex<Vec<ShaderListener>>,
}

impl ShaderManager {
    /// An empty cache reading sources through `loader`.
    #[must_use]
    pub fn new(render_thread: Arc<RenderThread>, loader: Arc<dyn ResourceLoader>) -> Self {
        Self {
            render_thread,
            loader,
            shards: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn shards(&self) -> MutexGuard<'_, Shards> {
        self.shards.lock().expect("shader cache lock poisoned")
    }

    /// [`get_shard_with_stage`](Self::get_shard_with_stage) with the stage
    /// taken from the path suffix.
    pub fn get_shard(&self, driver: &dyn Driver, namespace: &str, path: &str) -> u32 {
        self.get_shard_with_stage(driver, namespace, path, None)
    }

    /// The compiled shader for `namespace:path`, or `0` if it can't be built.
    ///
    /// Both outcomes are cached until the next [`reload`](Self::reload).
    ///
    /// # Panics
    ///
    /// Panics if not called from the render thread.
    pub fn get_shard_with_stage(
        &self,
        driver: &dyn Driver,
        namespace: &str,
        path: &str,
        stage: Option<ShaderStage>,
    ) -> u32 {
        self.render_thread.check_render_thread();
        let mut shards = self.shards();
        if let Some(entry) = shards.get(namespace).and_then(|paths| paths.get(path)) {
            return entry.as_ref().map_or(0, ObjectRef::id);
        }

        let entry = match self.compile(driver, namespace, path, stage) {
            Ok(shader) => {
                tracing::debug!(namespace, path, id = shader.id(), "compiled shader");
                Some(shader)
            }
            Err(err) => {
                tracing::error!("{err}");
                None
            }
        };
        let id = entry.as_ref().map_or(0, ObjectRef::id);
        shards
            .entry(namespace.to_owned())
            .or_default()
            .insert(path.to_owned(), entry);
        id
    }

    fn compile(
        &self,
        driver: &dyn Driver,
        namespace: &str,
        path: &str,
        stage: Option<ShaderStage>,
    ) -> Result<ObjectRef, ShaderError> {
        let key = || (namespace.to_owned(), path.to_owned());
        let stage = stage
            .or_else(|| ShaderStage::from_path(path))
            .ok_or_else(|| {
                let (namespace, path) = key();
                ShaderError::UnknownStage { namespace, path }
            })?;
        let source = String::from_utf8(self.loader.open(namespace, path)?).map_err(|_| {
            let (namespace, path) = key();
            ShaderError::Encoding { namespace, path }
        })?;

        let kind = ObjectKind::Shader(stage);
        let id = driver.create_object(kind).ok_or_else(|| {
            let (namespace, path) = key();
            ShaderError::Create { namespace, path }
        })?;
        let shader = ObjectRef::new(Arc::clone(&self.render_thread), kind, id);
        match driver.compile_shader(id, &source) {
            Ok(()) => Ok(shader),
            Err(log) => {
                shader.release(driver);
                let (namespace, path) = key();
                Err(ShaderError::Compile { namespace, path, log })
            }
        }
    }

    /// Links `shards` into `existing` if given, otherwise into a new program.
    ///
    /// The shards are detached again after a successful link, so they can be
    /// linked into other programs. On failure the program is deleted and the
    /// invalid program returned. Zero ids in `shards` are skipped.
    ///
    /// # Panics
    ///
    /// Panics if not called from the render thread.
    pub fn create_program(&self, driver: &dyn Driver, existing: Option<Program>, shards: &[u32]) -> Program {
        self.render_thread.check_render_thread();
        let object = match existing.and_then(|program| program.object) {
            Some(object) => object,
            None => match driver.create_object(ObjectKind::Program) {
                Some(id) => ObjectRef::new(Arc::clone(&self.render_thread), ObjectKind::Program, id),
                None => {
                    tracing::error!("driver failed to create program");
                    return Program::invalid();
                }
            },
        };
        let Some(program) = NonZeroU32::new(object.id()) else {
            return Program::invalid();
        };

        let shards: Vec<NonZeroU32> = shards.iter().copied().filter_map(NonZeroU32::new).collect();
        for &shader in &shards {
            driver.attach_shader(program, shader);
        }
        if let Err(log) = driver.link_program(program) {
            tracing::error!(
                "{}",
                ShaderError::Link {
                    program: program.get(),
                    log
                }
            );
            // deleting the program detaches its shaders
            object.release(driver);
            return Program::invalid();
        }
        for &shader in &shards {
            driver.detach_shader(program, shader);
        }
        Program { object: Some(object) }
    }

    /// Runs `listener` after every [`reload`](Self::reload), after the ones
    /// already registered.
    pub fn add_listener(&self, listener: impl Fn(&Self, &dyn Driver) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .expect("shader listener lock poisoned")
            .push(Arc::new(listener));
    }

    /// Number of cached entries, failures included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards().values().map(HashMap::len).sum()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deletes every cached shader, forgets cached failures and runs the
    /// listeners so they can request their shaders again.
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
            .expect("shader listener lock poisoned")
            .clone();
        tracing::info!(listeners = listeners.len(), "reloading shaders");
        for (index, listener) in listeners.iter().enumerate() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener(self, driver)));
            if result.is_err() {
                tracing::error!(index, "shader reload listener panicked");
            }
        }
    }

    /// Deletes every cached shader.
    ///
    /// # Panics
    ///
    /// Panics if not called from the render thread.
    pub fn close(&self, driver: &dyn Driver) {
        self.render_thread.check_render_thread();
        let shards = std::mem::take(&mut *self.shards());
        for shader in shards.into_values().flat_map(HashMap::into_values).flatten() {
            shader.release(driver);
        }
    }
}

impl std::fmt::Debug for ShaderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderManager")
            .field("shards", &self.len())
            .finish_non_exhaustive()
    }
}
