//! `Client`/`Server` filters. Sit on the plaintext side of
//! the chain; slot 0 is the ciphertext sub-pipeline (client: the outbound
//! transport; server: the raw transport the filter itself is fed from, and
//! whose decrypted output is handed to slot 0's backend pipeline — see the
//! session module doc comment for the exact per-role routing).

use crate::context::TLSContext;
use crate::session::TLSSession;
use pipeline::context::Context;
use pipeline::error::PipelineResult;
use pipeline::event::Event;
use pipeline::filter::{EventTarget, Filter, FilterIo, Namespace};
use pipeline::pipeline::{Pipeline, PipelineDef};
use std::rc::Rc;

/// Bridges a `Pipeline`'s input into an `EventTarget` the session can hold
/// onto, and lets the session push the sub-pipeline's own events back into
/// the session via `on_receive_peer`.
struct PeerBridge {
    session: std::rc::Weak<TLSSession>,
}

impl EventTarget for PeerBridge {
    fn input(&self, event: Event) {
        if let Some(session) = self.session.upgrade() {
            session.on_receive_peer(event);
        }
    }
}

enum Lazy {
    Unbound,
    Ready {
        session: Rc<TLSSession>,
        #[allow(dead_code)]
        sub_pipeline: Pipeline,
    },
}

/// `TLS::Client` — encrypts outer (plaintext) input, decrypts ciphertext
/// coming back from the sub-pipeline (the transport connection).
pub struct Client {
    io: FilterIo,
    ctx: Rc<TLSContext>,
    sni: Option<Rc<str>>,
    state: Lazy,
}

impl Client {
    pub fn new(ctx: Rc<TLSContext>, transport: Rc<PipelineDef>, sni: Option<String>) -> Self {
        let mut io = FilterIo::new();
        io.add_sub_pipeline_def(transport);
        Client {
            io,
            ctx,
            sni: sni.map(|s| Rc::from(s.as_str())),
            state: Lazy::Unbound,
        }
    }
}

impl Filter for Client {
    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Client {
            io: self.io.clone(),
            ctx: self.ctx.clone(),
            sni: self.sni.clone(),
            state: Lazy::Unbound,
        })
    }

    fn bind(&mut self, namespace: &dyn Namespace) -> PipelineResult<()> {
        self.io.bind(namespace)
    }

    fn chain(&mut self, target: Rc<dyn EventTarget>) {
        self.io.chain(target);
    }

    fn process(&mut self, ctx: &Context, event: Event) {
        if self.io.sub_pipeline_def(0).is_none() {
            return;
        }
        let session = self.ensure_session(ctx);
        session.on_event(event);
    }

    fn reset(&mut self) {
        self.state = Lazy::Unbound;
    }

    fn dump(&self) -> String {
        "tls.Client".to_string()
    }
}

impl Client {
    fn ensure_session(&mut self, ctx: &Context) -> Rc<TLSSession> {
        if let Lazy::Ready { session, .. } = &self.state {
            return session.clone();
        }
        let def = self
            .io
            .sub_pipeline_def(0)
            .expect("transport sub-pipeline configured");
        let session = TLSSession::new_client_with_sni(&self.ctx, self.sni.as_deref())
            .expect("tls client session");
        let peer = Rc::new(PeerBridge {
            session: Rc::downgrade(&session),
        });
        let sub_pipeline = def
            .instantiate(ctx.duplicate(), &pipeline::pipeline::StaticNamespace::new())
            .expect("transport sub-pipeline instantiates");
        sub_pipeline.chain_output(peer);
        session.set_peer_output(sub_pipeline.input());
        if let Some(output) = self.io.output_target() {
            session.set_outer_output(output);
        }
        session.start();
        self.state = Lazy::Ready { session: session.clone(), sub_pipeline };
        session
    }
}

/// `TLS::Server` — decrypts outer (ciphertext, fresh off the listening
/// socket) input, forwards the decrypted plaintext to the sub-pipeline
/// (the backend/application pipeline), and encrypts whatever that
/// sub-pipeline writes back.
pub struct Server {
    io: FilterIo,
    ctx: Rc<TLSContext>,
    state: Lazy,
}

impl Server {
    pub fn new(ctx: Rc<TLSContext>, backend: Rc<PipelineDef>) -> Self {
        let mut io = FilterIo::new();
        io.add_sub_pipeline_def(backend);
        Server {
            io,
            ctx,
            state: Lazy::Unbound,
        }
    }
}

impl Filter for Server {
    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Server {
            io: self.io.clone(),
            ctx: self.ctx.clone(),
            state: Lazy::Unbound,
        })
    }

    fn bind(&mut self, namespace: &dyn Namespace) -> PipelineResult<()> {
        self.io.bind(namespace)
    }

    fn chain(&mut self, target: Rc<dyn EventTarget>) {
        self.io.chain(target);
    }

    fn process(&mut self, ctx: &Context, event: Event) {
        if self.io.sub_pipeline_def(0).is_none() {
            return;
        }
        let session = self.ensure_session(ctx);
        session.on_event(event);
    }

    fn reset(&mut self) {
        self.state = Lazy::Unbound;
    }

    fn dump(&self) -> String {
        "tls.Server".to_string()
    }
}

impl Server {
    fn ensure_session(&mut self, ctx: &Context) -> Rc<TLSSession> {
        if let Lazy::Ready { session, .. } = &self.state {
            return session.clone();
        }
        let def = self
            .io
            .sub_pipeline_def(0)
            .expect("backend sub-pipeline configured");
        let session = TLSSession::new_server(&self.ctx).expect("tls server session");
        let peer = Rc::new(PeerBridge {
            session: Rc::downgrade(&session),
        });
        let sub_pipeline = def
            .instantiate(ctx.duplicate(), &pipeline::pipeline::StaticNamespace::new())
            .expect("backend sub-pipeline instantiates");
        sub_pipeline.chain_output(peer);
        session.set_peer_output(sub_pipeline.input());
        if let Some(output) = self.io.output_target() {
            session.set_outer_output(output);
        }
        session.start();
        self.state = Lazy::Ready { session: session.clone(), sub_pipeline };
        session
    }
}
