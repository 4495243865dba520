//! Single-threaded cooperative dispatcher. One task runs to
//! completion before another begins; all filter `process` calls happen on
//! the reactor thread. The I/O completion queue and timer wheel are
//! realized with a `tokio` current-thread runtime driving a `LocalSet` —
//! the idiomatic Rust equivalent of a hand-rolled epoll/kqueue loop, and
//! what lets stream adapters and the TLS filter use ordinary `async fn`
//! for their pump loops while still running single-threaded.
//!
//! `Reactor` is deliberately `!Send`: tasks are scheduled with
//! `spawn_local`, never across worker threads — no shared-memory
//! concurrency within a worker.

use crate::pipeline::Pipeline;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::LocalSet;

type Microtask = Box<dyn FnOnce()>;

pub struct Reactor {
    burst_depth: RefCell<usize>,
    microtasks: RefCell<VecDeque<Microtask>>,
    local: LocalSet,
}

pub type ReactorHandle = Rc<Reactor>;

impl Reactor {
    pub fn new() -> ReactorHandle {
        Rc::new(Reactor {
            burst_depth: RefCell::new(0),
            microtasks: RefCell::new(VecDeque::new()),
            local: LocalSet::new(),
        })
    }

    /// Acquired by `InputContext::enter` at the top of every I/O callback.
    pub fn enter_burst(&self) {
        *self.burst_depth.borrow_mut() += 1;
    }

    /// Released when the callback returns. Draining the microtask queue
    /// only at depth zero means a pipeline dropped by an inner callback
    /// (e.g. a sub-pipeline's own completion handler) survives until the
    /// outermost burst finishes.
    pub fn exit_burst(&self) {
        let hit_zero = {
            let mut depth = self.burst_depth.borrow_mut();
            *depth = depth.saturating_sub(1);
            *depth == 0
        };
        if hit_zero {
            self.drain_microtasks();
        }
    }

    fn drain_microtasks(&self) {
        loop {
            let next = self.microtasks.borrow_mut().pop_front();
            match next {
                Some(task) => task(),
                None => break,
            }
        }
    }

    /// Defers destruction of `pipeline` to the end of the current input
    /// burst if one is in progress; otherwise drops it immediately. This
    /// is the `auto_release` discipline: a `Pipeline` reference
    /// acquired mid-burst is guaranteed to outlive the burst that acquired
    /// it, even on an error path.
    pub fn auto_release(&self, pipeline: Pipeline) {
        if *self.burst_depth.borrow() > 0 {
            self.microtasks
                .borrow_mut()
                .push_back(Box::new(move || drop(pipeline)));
        } else {
            drop(pipeline);
        }
    }

    /// Schedules a task onto this reactor's single local task set.
    pub fn spawn_local<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + 'static,
    {
        self.local.spawn_local(fut);
    }

    /// The reactor's timer facility: runs `fut` after `dur` elapses, still
    /// on the reactor thread.
    pub fn spawn_after<F>(&self, dur: Duration, fut: F)
    where
        F: std::future::Future<Output = ()> + 'static,
    {
        self.spawn_local(async move {
            tokio::time::sleep(dur).await;
            fut.await;
        });
    }

    /// Drives the reactor's local task set until `fut` completes. Callers
    /// (the proxy's main loop) build a `tokio::runtime::Builder::new_current_thread`
    /// runtime and call this once at the top.
    pub async fn run_until<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.local.run_until(fut).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InputContext;

    #[test]
    fn burst_depth_nests_and_drains_at_zero() {
        let reactor = Reactor::new();
        {
            let _outer = InputContext::enter(&reactor);
            assert_eq!(*reactor.burst_depth.borrow(), 1);
            {
                let _inner = InputContext::enter(&reactor);
                assert_eq!(*reactor.burst_depth.borrow(), 2);
            }
            assert_eq!(*reactor.burst_depth.borrow(), 1);
        }
        assert_eq!(*reactor.burst_depth.borrow(), 0);
    }

    #[test]
    fn microtask_runs_after_burst_exits() {
        let reactor = Reactor::new();
        let ran = Rc::new(RefCell::new(false));
        {
            let _burst = InputContext::enter(&reactor);
            let ran = ran.clone();
            reactor
                .microtasks
                .borrow_mut()
                .push_back(Box::new(move || *ran.borrow_mut() = true));
            assert!(!*ran.borrow());
        }
        assert!(*ran.borrow());
    }
}
