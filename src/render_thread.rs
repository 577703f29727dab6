//! The rendering thread and its deferred work queue.
//!
//! Exactly one OS thread may issue driver calls for a context. Every other
//! thread talks to it by posting closures onto a FIFO queue that the render
//! thread drains once per frame with [`RenderThread::flush`].
//!
//! Object deletions travel on the same queue as typed entries rather than
//! closures, so the live-object count stays exact even when the queue is
//! dropped for a lost context.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, ThreadId};

use crate::driver::{Driver, ObjectKind};

/// A deferred action, executed on the render thread with the driver.
pub type RenderCall = Box<dyn FnOnce(&dyn Driver) + Send>;

enum Queued {
    Call(RenderCall),
    Delete {
        kind: ObjectKind,
        id: NonZeroU32,
        context: u64,
    },
}

/// Identity of the rendering thread plus the queue of calls waiting for it.
///
/// Shared via [`Arc`] by every object that may need to defer work, so it
/// outlives them regardless of which thread drops them last.
pub struct RenderThread {
    thread: OnceLock<ThreadId>,
    calls: Mutex<VecDeque<Queued>>,
    /// Native objects created and not yet deleted or abandoned.
    live_objects: AtomicUsize,
    /// Bumped every time the context is lost. Names from an older context
    /// are never passed to the driver.
    context: AtomicU64,
}

impl RenderThread {
    /// Creates an unbound render thread handle.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            thread: OnceLock::new(),
            calls: Mutex::new(VecDeque::new()),
            live_objects: AtomicUsize::new(0),
            context: AtomicU64::new(0),
        })
    }

    /// Designates the calling thread as the render thread.
    ///
    /// Calling this again from the same thread is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if another thread was already designated.
    pub fn bind_current(&self) {
        let current = thread::current().id();
        let bound = *self.thread.get_or_init(|| current);
        assert!(
            bound == current,
            "render thread is already bound to {bound:?}, current {current:?}"
        );
    }

    /// Whether the render thread has been designated.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.thread.get().is_some()
    }

    /// Whether the calling thread is the render thread.
    #[must_use]
    pub fn is_on_render_thread(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    /// Fails fast unless called from the render thread.
    ///
    /// # Panics
    ///
    /// Panics if the render thread is not bound, or is a different thread.
    #[track_caller]
    pub fn check_render_thread(&self) {
        match self.thread.get() {
            None => panic!("the render thread has not been initialized yet"),
            Some(id) if *id != thread::current().id() => panic!(
                "not called from the render thread {id:?}, current {:?}",
                thread::current().id()
            ),
            Some(_) => {}
        }
    }

    /// Queues `action` for the next [`flush`](Self::flush). Callable from any
    /// thread.
    ///
    /// # Panics
    ///
    /// Panics if the queue lock is poisoned.
    pub fn post(&self, action: impl FnOnce(&dyn Driver) + Send + 'static) {
        self.calls
            .lock()
            .expect("render call queue poisoned")
            .push_back(Queued::Call(Box::new(action)));
    }

    /// Queues the deletion of a native object created under `context`.
    pub(crate) fn post_delete(&self, kind: ObjectKind, id: NonZeroU32, context: u64) {
        self.calls
            .lock()
            .expect("render call queue poisoned")
            .push_back(Queued::Delete { kind, id, context });
    }

    /// Runs `action` immediately when called on the render thread, otherwise
    /// queues it.
    pub fn execute(&self, driver: &dyn Driver, action: impl FnOnce(&dyn Driver) + Send + 'static) {
        if self.is_on_render_thread() {
            action(driver);
        } else {
            self.post(action);
        }
    }

    /// Drains the queue in FIFO order. Actions posted while draining run in
    /// the same flush.
    ///
    /// Returns the number of actions executed.
    ///
    /// # Panics
    ///
    /// Panics if not called from the render thread, or if the queue lock is
    /// poisoned.
    pub fn flush(&self, driver: &dyn Driver) -> usize {
        self.check_render_thread();
        let mut executed = 0;
        loop {
            // The lock must not be held while the action runs, it may post.
            let next = self
                .calls
                .lock()
                .expect("render call queue poisoned")
                .pop_front();
            let Some(next) = next else { break };
            match next {
                Queued::Call(action) => action(driver),
                Queued::Delete { kind, id, context } => {
                    if self.is_current_context(context) {
                        tracing::debug!(?kind, id, "deleting dropped GPU object");
                        driver.delete_object(kind, id);
                    }
                    self.unregister_object();
                }
            }
            executed += 1;
        }
        executed
    }

    /// Number of actions waiting for the next flush.
    ///
    /// # Panics
    ///
    /// Panics if the queue lock is poisoned.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.calls.lock().expect("render call queue poisoned").len()
    }

    /// Drops every queued action without running it. Used when the context
    /// is gone and driver calls are no longer valid. Queued deletions still
    /// take their objects off the live count.
    ///
    /// Returns the number of entries dropped.
    ///
    /// # Panics
    ///
    /// Panics if the queue lock is poisoned.
    pub fn discard_pending(&self) -> usize {
        let drained: Vec<Queued> = self
            .calls
            .lock()
            .expect("render call queue poisoned")
            .drain(..)
            .collect();
        for entry in &drained {
            if matches!(entry, Queued::Delete { .. }) {
                self.unregister_object();
            }
        }
        drained.len()
    }

    /// Marks the current context as lost and drops the queue.
    ///
    /// Objects created before this call that are dropped or released later
    /// are only forgotten; their names are never handed to the driver,
    /// which may already reuse them in a new context.
    ///
    /// # Panics
    ///
    /// Panics if the queue lock is poisoned.
    pub fn abandon_context(&self) -> usize {
        self.context.fetch_add(1, Ordering::AcqRel);
        self.discard_pending()
    }

    /// Identifies the context that objects created now belong to.
    pub(crate) fn current_context(&self) -> u64 {
        self.context.load(Ordering::Acquire)
    }

    pub(crate) fn is_current_context(&self, context: u64) -> bool {
        self.current_context() == context
    }

    /// Native objects currently alive.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.live_objects.load(Ordering::Acquire)
    }

    /// Reports native objects that were never released. Call at shutdown,
    /// after the final flush.
    ///
    /// Returns `true` if nothing leaked.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if any object leaked.
    pub fn check_leaks(&self) -> bool {
        let live = self.live_objects();
        if live != 0 {
            tracing::error!(live, "GPU objects still alive at shutdown");
            debug_assert!(live == 0, "{live} GPU objects leaked");
            return false;
        }
        true
    }

    pub(crate) fn register_object(&self) {
        self.live_objects.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unregister_object(&self) {
        let previous = self.live_objects.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "live object count underflow");
    }
}

impl std::fmt::Debug for RenderThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderThread")
            .field("thread", &self.thread.get())
            .field("live_objects", &self.live_objects())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDriver;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn binding_twice_from_same_thread_is_fine() {
        let rt = RenderThread::new();
        assert!(!rt.is_on_render_thread());
        rt.bind_current();
        rt.bind_current();
        assert!(rt.is_on_render_thread());
    }

    #[test]
    #[should_panic(expected = "has not been initialized")]
    fn check_before_binding_panics() {
        RenderThread::new().check_render_thread();
    }

    #[test]
    fn check_from_other_thread_panics() {
        let rt = RenderThread::new();
        rt.bind_current();
        let other = Arc::clone(&rt);
        let result = thread::spawn(move || other.check_render_thread()).join();
        assert!(result.is_err());
    }

    #[test]
    fn flush_runs_calls_in_post_order() {
        let rt = RenderThread::new();
        rt.bind_current();
        let driver = FakeDriver::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            rt.post(move |_| order.lock().unwrap().push(i));
        }
        let poster = Arc::clone(&rt);
        let order2 = Arc::clone(&order);
        thread::spawn(move || poster.post(move |_| order2.lock().unwrap().push(3)))
            .join()
            .unwrap();

        assert_eq!(rt.pending(), 4);
        assert_eq!(rt.flush(&driver), 4);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(rt.pending(), 0);
    }

    #[test]
    fn calls_posted_while_flushing_run_in_same_flush() {
        let rt = RenderThread::new();
        rt.bind_current();
        let driver = FakeDriver::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let inner_rt = Arc::clone(&rt);
        let inner_hits = Arc::clone(&hits);
        rt.post(move |_| {
            inner_hits.fetch_add(1, Ordering::SeqCst);
            let again = Arc::clone(&inner_hits);
            inner_rt.post(move |_| {
                again.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(rt.flush(&driver), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn execute_runs_inline_on_render_thread() {
        let rt = RenderThread::new();
        rt.bind_current();
        let driver = FakeDriver::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        rt.execute(&driver, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(rt.pending(), 0);
    }

    #[test]
    fn discard_drops_without_running() {
        let rt = RenderThread::new();
        rt.bind_current();
        let driver = FakeDriver::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        rt.post(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(rt.discard_pending(), 1);
        assert_eq!(rt.flush(&driver), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn discarded_deletions_leave_the_live_count() {
        let rt = RenderThread::new();
        rt.bind_current();
        let driver = FakeDriver::new();
        let id = driver.create_object(ObjectKind::Texture).unwrap();
        rt.register_object();
        rt.post_delete(ObjectKind::Texture, id, rt.current_context());
        rt.post(|_| {});

        assert_eq!(rt.discard_pending(), 2);
        assert_eq!(rt.live_objects(), 0);
        assert!(driver.is_live(id.get()));
        assert!(rt.check_leaks());
    }

    #[test]
    fn deletions_from_an_older_context_skip_the_driver() {
        let rt = RenderThread::new();
        rt.bind_current();
        let driver = FakeDriver::new();
        let id = driver.create_object(ObjectKind::Buffer).unwrap();
        rt.register_object();
        let context = rt.current_context();
        rt.abandon_context();

        rt.post_delete(ObjectKind::Buffer, id, context);
        assert_eq!(rt.flush(&driver), 1);
        assert!(driver.is_live(id.get()));
        assert_eq!(rt.live_objects(), 0);
    }
}
