//! A settable forwarding target — the tie-the-knot helper needed wherever
//! two halves of a proxied connection must each point at the other, but
//! only one of them can be constructed first.

use pipeline::event::Event;
use pipeline::filter::EventTarget;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Default)]
pub struct Forward {
    target: RefCell<Option<Rc<dyn EventTarget>>>,
}

impl Forward {
    pub fn new() -> Rc<Forward> {
        Rc::new(Forward::default())
    }

    pub fn set(&self, target: Rc<dyn EventTarget>) {
        *self.target.borrow_mut() = Some(target);
    }
}

impl EventTarget for Forward {
    fn input(&self, event: Event) {
        if let Some(target) = self.target.borrow().clone() {
            target.input(event);
        }
    }
}

/// Forwards every event to `inner`, then wakes `notify` once a
/// `StreamEnd` passes through. A `Pipeline`'s `Drop` runs `shutdown()` on
/// every filter unconditionally, which for a live upstream connection
/// means closing its socket — so the task that instantiated the pipeline
/// must hold it until the connection has actually finished, not drop it
/// as soon as the accept handler returns. This is the signal that tells
/// it when that point has arrived.
pub struct Terminator {
    inner: Rc<dyn EventTarget>,
    notify: Rc<tokio::sync::Notify>,
}

impl Terminator {
    pub fn new(inner: Rc<dyn EventTarget>, notify: Rc<tokio::sync::Notify>) -> Rc<Terminator> {
        Rc::new(Terminator { inner, notify })
    }
}

impl EventTarget for Terminator {
    fn input(&self, event: Event) {
        let is_end = event.is_stream_end();
        self.inner.input(event);
        if is_end {
            self.notify.notify_one();
        }
    }
}
