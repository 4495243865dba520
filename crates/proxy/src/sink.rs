//! Bridges a TLS server's decrypted backend sub-pipeline to a real upstream
//! TCP connection. One `UpstreamForward` is instantiated exactly once per
//! accepted connection (wrapped in its own `PipelineDef`), so `clone_filter`
//! only ever needs to hand back a second reference to the same shared,
//! already-connected socket — not produce an independent copy.

use net_stream::NetStream;
use pipeline::context::Context;
use pipeline::error::PipelineResult;
use pipeline::event::Event;
use pipeline::filter::{EventTarget, Filter, Namespace};
use pipeline::reactor::ReactorHandle;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::net::TcpStream;

pub struct UpstreamForward {
    stream: Rc<RefCell<Option<TcpStream>>>,
    reactor: ReactorHandle,
    upstream: RefCell<Option<Rc<NetStream<TcpStream>>>>,
}

impl UpstreamForward {
    pub fn new(stream: TcpStream, reactor: ReactorHandle) -> Self {
        UpstreamForward {
            stream: Rc::new(RefCell::new(Some(stream))),
            reactor,
            upstream: RefCell::new(None),
        }
    }
}

impl Filter for UpstreamForward {
    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(UpstreamForward {
            stream: self.stream.clone(),
            reactor: self.reactor.clone(),
            upstream: RefCell::new(None),
        })
    }

    fn bind(&mut self, _namespace: &dyn Namespace) -> PipelineResult<()> {
        Ok(())
    }

    /// Connects the upstream socket's own event stream directly to
    /// `target` — bytes the upstream sends back flow straight to whatever
    /// this filter was chained to, without another hop through `process`.
    fn chain(&mut self, target: Rc<dyn EventTarget>) {
        let stream = self
            .stream
            .borrow_mut()
            .take()
            .expect("upstream connects exactly once per accepted connection");
        let upstream = NetStream::new(stream, target, self.reactor.clone());
        *self.upstream.borrow_mut() = Some(upstream);
    }

    fn process(&mut self, _ctx: &Context, event: Event) {
        if let Some(upstream) = self.upstream.borrow().as_ref() {
            upstream.input(event);
        }
    }

    fn shutdown(&mut self) {
        if let Some(upstream) = self.upstream.borrow().as_ref() {
            upstream.close(None);
        }
    }

    fn dump(&self) -> String {
        "proxy.UpstreamForward".to_string()
    }
}
