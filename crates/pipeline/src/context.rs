//! Per-pipeline mutable state. `Context` is
//! shared by every filter in one pipeline instance and passed as an
//! explicit parameter rather than carried on a thread-local — filters that
//! need it take it at construction or at `bind()` time. Since the whole
//! engine runs single-threaded (see `reactor`), this is `Rc<RefCell<_>>`
//! rather than `Arc<Mutex<_>>` — there is never a second thread to
//! synchronize against.

use crate::event::StreamEnd;
use crate::reactor::Reactor;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Default)]
struct ContextInner {
    data: HashMap<TypeId, Box<dyn Any>>,
    error: Option<StreamEnd>,
}

/// Shared, per-pipeline state: arbitrary typed user data plus an error flag.
/// Not shared across pipelines unless a sub-pipeline is instantiated with
/// `clone_context = true`, in which case `duplicate()` snapshots the error
/// flag into an independent `Context`.
#[derive(Clone)]
pub struct Context {
    inner: Rc<RefCell<ContextInner>>,
}

impl Context {
    pub fn new() -> Self {
        Context {
            inner: Rc::new(RefCell::new(ContextInner::default())),
        }
    }

    pub fn set<T: Any>(&self, value: T) {
        self.inner
            .borrow_mut()
            .data
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.inner
            .borrow()
            .data
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref::<T>())
            .cloned()
    }

    pub fn set_error(&self, end: StreamEnd) {
        self.inner.borrow_mut().error = Some(end);
    }

    pub fn error(&self) -> Option<StreamEnd> {
        self.inner.borrow().error.clone()
    }

    pub fn has_error(&self) -> bool {
        self.inner.borrow().error.is_some()
    }

    /// A fresh context carrying a copy of the current error flag, for a
    /// sub-pipeline instantiated with independent error state (e.g. a
    /// detached tunnel that must not poison its parent's context).
    pub fn duplicate(&self) -> Context {
        let error = self.inner.borrow().error.clone();
        let dup = Context::new();
        if let Some(e) = error {
            dup.set_error(e);
        }
        dup
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

/// A scoped token active while a burst of synchronous event emissions is
/// in progress. Acquired at external entry points (I/O completion
/// callbacks) and released when the callback returns; batches
/// `auto_release` decisions so a pipeline dropped mid-burst is destroyed
/// only once the outermost callback returns.
pub struct InputContext<'r> {
    reactor: &'r Reactor,
}

impl<'r> InputContext<'r> {
    pub fn enter(reactor: &'r Reactor) -> Self {
        reactor.enter_burst();
        InputContext { reactor }
    }
}

impl<'r> Drop for InputContext<'r> {
    fn drop(&mut self) {
        self.reactor.exit_burst();
    }
}
