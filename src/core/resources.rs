//! Cascaded teardown for everything that owns an OS resource.
//!
//! Engines register their live sessions here; a single root `close_all`
//! cascades through nested managers so shutdown cannot leak PTYs, SSH
//! handles or watcher threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::error::{CoreError, CoreResult};

/// Anything that can be torn down. Implementations use interior
/// mutability; `close` must tolerate being reached after the underlying
/// resource already died.
pub trait Closeable: Send + Sync {
    fn close(&self) -> CoreResult<()>;
}

/// Blanket impl so plain closures can be registered.
impl<F> Closeable for F
where
    F: Fn() -> CoreResult<()> + Send + Sync,
{
    fn close(&self) -> CoreResult<()> {
        self()
    }
}

/// Tracks registered closeables and tears them down exactly once.
///
/// Nested managers compose: a child registers itself on its parent so a
/// single root teardown cascades the whole tree.
pub struct ResourceManager {
    name: &'static str,
    closers: Mutex<Vec<Box<dyn Closeable>>>,
    closed: AtomicBool,
}

impl ResourceManager {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            closers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Registers a value for teardown. Registrations after `close_all`
    /// are closed immediately.
    pub fn register(&self, closer: Box<dyn Closeable>) {
        if self.closed.load(Ordering::Acquire) {
            if let Err(e) = closer.close() {
                log::warn!("{}: late registration close failed: {e}", self.name);
            }
            return;
        }
        match self.closers.lock() {
            Ok(mut closers) => closers.push(closer),
            Err(e) => log::warn!("{}: closer list poisoned: {e}", self.name),
        }
    }

    /// Creates a nested manager whose teardown is driven by this one.
    pub fn child(self: &Arc<Self>, name: &'static str) -> Arc<ResourceManager> {
        let child = ResourceManager::new(name);
        let registered = child.clone();
        self.register(Box::new(move || registered.close_all()));
        child
    }

    /// Invokes every registered closer. Errors are logged individually
    /// and aggregated; the last one is returned. Idempotent: the second
    /// and later calls are no-ops.
    pub fn close_all(&self) -> CoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let closers = match self.closers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(e) => {
                return Err(CoreError::state(format!(
                    "{}: closer list poisoned: {e}",
                    self.name
                )))
            }
        };
        let mut last_err = None;
        for closer in closers {
            if let Err(e) = closer.close() {
                log::warn!("{}: close failed: {e}", self.name);
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        if !self.is_closed() {
            let _ = self.close_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct Counter(Arc<AtomicU32>);

    impl Closeable for Counter {
        fn close(&self) -> CoreResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn close_all_is_idempotent() {
        let count = Arc::new(AtomicU32::new(0));
        let mgr = ResourceManager::new("test");
        mgr.register(Box::new(Counter(count.clone())));
        mgr.close_all().unwrap();
        mgr.close_all().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn errors_aggregate_and_last_is_returned() {
        let mgr = ResourceManager::new("test");
        mgr.register(Box::new(|| -> CoreResult<()> {
            Err(CoreError::state("first"))
        }));
        mgr.register(Box::new(|| -> CoreResult<()> { Ok(()) }));
        mgr.register(Box::new(|| -> CoreResult<()> {
            Err(CoreError::state("second"))
        }));
        let err = mgr.close_all().unwrap_err();
        assert_eq!(err.to_string(), "second");
    }

    #[test]
    fn child_managers_cascade_from_root() {
        let count = Arc::new(AtomicU32::new(0));
        let root = ResourceManager::new("root");
        let child = root.child("child");
        let grandchild = child.child("grandchild");
        grandchild.register(Box::new(Counter(count.clone())));
        root.close_all().unwrap();
        assert!(grandchild.is_closed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_registration_closes_immediately() {
        let count = Arc::new(AtomicU32::new(0));
        let mgr = ResourceManager::new("test");
        mgr.close_all().unwrap();
        mgr.register(Box::new(Counter(count.clone())));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
