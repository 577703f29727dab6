//! Lazily created native objects with render-thread-only deletion.
//!
//! A [`GpuObject`] starts empty and creates its native object on the first
//! [`get`](GpuObject::get). The native name lives in an [`ObjectRef`], which
//! deletes it exactly once: immediately through [`GpuObject::close`], or, when
//! dropped on any thread, by posting the deletion to the render queue.

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::driver::{Driver, ObjectKind};
use crate::render_thread::RenderThread;

/// Owner of one native object name.
///
/// Dropping it schedules the deletion on the render thread; [`release`]
/// deletes right away. Either way the driver sees exactly one delete.
///
/// [`release`]: ObjectRef::release
#[derive(Debug)]
pub struct ObjectRef {
    id: Option<NonZeroU32>,
    kind: ObjectKind,
    render_thread: Arc<RenderThread>,
    context: u64,
}

impl ObjectRef {
    /// Takes ownership of an already created native object.
    #[must_use]
    pub fn new(render_thread: Arc<RenderThread>, kind: ObjectKind, id: NonZeroU32) -> Self {
        render_thread.register_object();
        Self {
            id: Some(id),
            kind,
            context: render_thread.current_context(),
            render_thread,
        }
    }

    /// The native name.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id.map_or(0, NonZeroU32::get)
    }

    /// The object kind.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Deletes the native object now. An object from a lost context is only
    /// forgotten.
    ///
    /// # Panics
    ///
    /// Panics if not called from the render thread.
    pub fn release(mut self, driver: &dyn Driver) {
        self.render_thread.check_render_thread();
        if let Some(id) = self.id.take() {
            if self.render_thread.is_current_context(self.context) {
                tracing::debug!(kind = ?self.kind, id, "deleting GPU object");
                driver.delete_object(self.kind, id);
            }
            self.render_thread.unregister_object();
        }
    }

    /// Forgets the native object without deleting it. Only correct when the
    /// context that owns it is already gone.
    pub fn abandon(mut self) {
        if self.id.take().is_some() {
            self.render_thread.unregister_object();
        }
    }
}

impl Drop for ObjectRef {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.render_thread.post_delete(self.kind, id, self.context);
        }
    }
}

#[derive(Debug)]
enum Slot {
    Uncreated,
    Created(ObjectRef),
    Deleted,
}

/// A native GPU object that is created on first use.
///
/// `UNCREATED → CREATED → DELETED`, where `DELETED` is terminal. Queries are
/// valid from any thread; creation and explicit deletion are render-thread
/// only.
#[derive(Debug)]
pub struct GpuObject {
    kind: ObjectKind,
    render_thread: Arc<RenderThread>,
    slot: Mutex<Slot>,
}

impl GpuObject {
    /// An empty handle for an object of `kind`.
    #[must_use]
    pub fn new(render_thread: Arc<RenderThread>, kind: ObjectKind) -> Self {
        Self {
            kind,
            render_thread,
            slot: Mutex::new(Slot::Uncreated),
        }
    }

    /// Wraps an object that already exists.
    #[must_use]
    pub fn from_ref(object: ObjectRef) -> Self {
        Self {
            kind: object.kind,
            render_thread: Arc::clone(&object.render_thread),
            slot: Mutex::new(Slot::Created(object)),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().expect("GPU object slot poisoned")
    }

    /// The object kind.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// The render thread this object belongs to.
    #[must_use]
    pub fn render_thread(&self) -> &Arc<RenderThread> {
        &self.render_thread
    }

    /// Returns the native name, creating the object on first call.
    ///
    /// Returns `0` if the driver fails to create the object; the next call
    /// tries again.
    ///
    /// # Panics
    ///
    /// Panics if not called from the render thread, or after [`close`].
    ///
    /// [`close`]: GpuObject::close
    pub fn get(&self, driver: &dyn Driver) -> u32 {
        let kind = self.kind;
        self.get_or_create_with(driver, |driver| driver.create_object(kind))
    }

    /// Like [`get`](Self::get), with a custom creation step.
    ///
    /// # Panics
    ///
    /// Panics if not called from the render thread, or after [`close`].
    ///
    /// [`close`]: GpuObject::close
    pub fn get_or_create_with(
        &self,
        driver: &dyn Driver,
        create: impl FnOnce(&dyn Driver) -> Option<NonZeroU32>,
    ) -> u32 {
        self.render_thread.check_render_thread();
        let mut slot = self.slot();
        match &*slot {
            Slot::Created(object) => object.id(),
            Slot::Deleted => panic!("{:?} object used after close", self.kind),
            Slot::Uncreated => match create(driver) {
                Some(id) => {
                    tracing::debug!(kind = ?self.kind, id, "created GPU object");
                    *slot = Slot::Created(ObjectRef::new(
                        Arc::clone(&self.render_thread),
                        self.kind,
                        id,
                    ));
                    id.get()
                }
                None => {
                    tracing::warn!(kind = ?self.kind, "driver failed to create GPU object");
                    0
                }
            },
        }
    }

    /// [`get`](Self::get) as a [`NonZeroU32`], `None` when creation failed.
    pub fn name(&self, driver: &dyn Driver) -> Option<NonZeroU32> {
        NonZeroU32::new(self.get(driver))
    }

    /// Whether the native object currently exists. Any thread.
    #[must_use]
    pub fn is_created(&self) -> bool {
        matches!(&*self.slot(), Slot::Created(_))
    }

    /// Whether [`close`](Self::close) has been called. Any thread.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(&*self.slot(), Slot::Deleted)
    }

    /// The native name, or `0` if not created. Any thread.
    #[must_use]
    pub fn id(&self) -> u32 {
        match &*self.slot() {
            Slot::Created(object) => object.id(),
            _ => 0,
        }
    }

    /// Deletes the native object now and makes this handle inert. Calling it
    /// again does nothing.
    ///
    /// # Panics
    ///
    /// Panics if not called from the render thread.
    pub fn close(&self, driver: &dyn Driver) {
        self.render_thread.check_render_thread();
        let previous = std::mem::replace(&mut *self.slot(), Slot::Deleted);
        if let Slot::Created(object) = previous {
            object.release(driver);
        }
    }

    /// Detaches the current native object and hands its cleanup to the
    /// caller. The next [`get`](Self::get) creates a fresh object.
    ///
    /// Returns `None` if nothing was created, or after close.
    pub fn recycle(&self) -> Option<ObjectRef> {
        let mut slot = self.slot();
        if !matches!(&*slot, Slot::Created(_)) {
            return None;
        }
        match std::mem::replace(&mut *slot, Slot::Uncreated) {
            Slot::Created(object) => Some(object),
            _ => None,
        }
    }

    /// Forgets the native object without any driver call and makes this
    /// handle inert. For lost contexts.
    pub fn abandon(&self) {
        let previous = std::mem::replace(&mut *self.slot(), Slot::Deleted);
        if let Slot::Created(object) = previous {
            object.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDriver;
    use std::thread;

    fn setup() -> (Arc<RenderThread>, FakeDriver) {
        let rt = RenderThread::new();
        rt.bind_current();
        (rt, FakeDriver::new())
    }

    #[test]
    fn never_accessed_object_is_never_created() {
        let (rt, driver) = setup();
        let object = GpuObject::new(Arc::clone(&rt), ObjectKind::Buffer);
        assert!(!object.is_created());
        assert_eq!(object.id(), 0);
        drop(object);
        rt.flush(&driver);
        assert_eq!(driver.created(ObjectKind::Buffer), 0);
        assert_eq!(rt.live_objects(), 0);
    }

    #[test]
    fn get_creates_once() {
        let (rt, driver) = setup();
        let object = GpuObject::new(Arc::clone(&rt), ObjectKind::Buffer);
        let first = object.get(&driver);
        assert_ne!(first, 0);
        assert_eq!(object.get(&driver), first);
        assert!(object.is_created());
        assert_eq!(driver.created(ObjectKind::Buffer), 1);
        assert_eq!(rt.live_objects(), 1);
        object.close(&driver);
    }

    #[test]
    fn close_twice_deletes_once() {
        let (rt, driver) = setup();
        let object = GpuObject::new(Arc::clone(&rt), ObjectKind::Texture);
        object.get(&driver);
        object.close(&driver);
        object.close(&driver);
        drop(object);
        rt.flush(&driver);
        assert_eq!(driver.deleted(ObjectKind::Texture), 1);
        assert_eq!(driver.live(ObjectKind::Texture), 0);
        assert!(rt.check_leaks());
    }

    #[test]
    fn drop_on_another_thread_deletes_on_render_thread() {
        let (rt, driver) = setup();
        let object = GpuObject::new(Arc::clone(&rt), ObjectKind::Texture);
        let id = object.get(&driver);

        thread::spawn(move || drop(object)).join().unwrap();
        assert_eq!(driver.deleted(ObjectKind::Texture), 0);
        assert_eq!(rt.pending(), 1);

        rt.flush(&driver);
        assert_eq!(driver.deleted(ObjectKind::Texture), 1);
        assert_eq!(driver.deleted_ids(), vec![id]);
        assert!(driver.all_deletes_on(thread::current().id()));
        assert!(rt.check_leaks());
    }

    #[test]
    #[should_panic(expected = "used after close")]
    fn get_after_close_panics() {
        let (rt, driver) = setup();
        let object = GpuObject::new(rt, ObjectKind::Buffer);
        object.get(&driver);
        object.close(&driver);
        object.get(&driver);
    }

    #[test]
    fn get_off_render_thread_panics() {
        let (rt, _driver) = setup();
        let object = Arc::new(GpuObject::new(rt, ObjectKind::Buffer));
        let other = Arc::clone(&object);
        let result = thread::spawn(move || {
            let driver = FakeDriver::new();
            other.get(&driver)
        })
        .join();
        assert!(result.is_err());
        assert!(!object.is_created());
    }

    #[test]
    fn recycle_hands_over_cleanup() {
        let (rt, driver) = setup();
        let object = GpuObject::new(Arc::clone(&rt), ObjectKind::Texture);
        let first = object.get(&driver);
        let old = object.recycle().expect("created object recycles");
        assert_eq!(old.id(), first);
        assert!(!object.is_created());

        let second = object.get(&driver);
        assert_ne!(first, second);
        old.release(&driver);
        assert_eq!(driver.deleted_ids(), vec![first]);
        object.close(&driver);
        assert!(rt.check_leaks());
    }

    #[test]
    fn failed_creation_returns_zero_and_retries() {
        let (rt, driver) = setup();
        let object = GpuObject::new(Arc::clone(&rt), ObjectKind::Framebuffer);
        driver.fail_creation(ObjectKind::Framebuffer, true);
        assert_eq!(object.get(&driver), 0);
        assert!(!object.is_created());
        driver.fail_creation(ObjectKind::Framebuffer, false);
        assert_ne!(object.get(&driver), 0);
        object.close(&driver);
    }

    #[test]
    fn abandon_skips_driver() {
        let (rt, driver) = setup();
        let object = GpuObject::new(Arc::clone(&rt), ObjectKind::Buffer);
        object.get(&driver);
        object.abandon();
        drop(object);
        rt.flush(&driver);
        assert_eq!(driver.deleted(ObjectKind::Buffer), 0);
        assert_eq!(rt.live_objects(), 0);
    }

    #[test]
    fn lost_context_forgets_queued_and_later_deletions() {
        let (rt, driver) = setup();
        let queued = GpuObject::new(Arc::clone(&rt), ObjectKind::Texture);
        let dropped_later = GpuObject::new(Arc::clone(&rt), ObjectKind::Texture);
        let closed_later = GpuObject::new(Arc::clone(&rt), ObjectKind::Buffer);
        queued.get(&driver);
        dropped_later.get(&driver);
        closed_later.get(&driver);
        thread::spawn(move || drop(queued)).join().unwrap();
        assert_eq!(rt.live_objects(), 3);

        assert_eq!(rt.abandon_context(), 1);
        assert_eq!(rt.live_objects(), 2);

        drop(dropped_later);
        rt.flush(&driver);
        closed_later.close(&driver);
        assert_eq!(driver.deleted(ObjectKind::Texture), 0);
        assert_eq!(driver.deleted(ObjectKind::Buffer), 0);
        assert!(rt.check_leaks());

        let fresh = GpuObject::new(Arc::clone(&rt), ObjectKind::Buffer);
        fresh.get(&driver);
        fresh.close(&driver);
        assert_eq!(driver.deleted(ObjectKind::Buffer), 1);
    }
}
