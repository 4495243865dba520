//! Per-connection TLS engine. Drives the handshake, then interleaves
//! `SSL_read`/`SSL_write` with draining/filling the in-memory BIO, routing
//! plaintext and ciphertext according to each role's direction table.

use crate::context::TLSContext;
use crate::memory_bio::{BioStream, MemoryBio};
use openssl::ssl::{HandshakeError, MidHandshakeSslStream, Ssl, SslStream};
use pipeline::data::{Chunk, Data};
use pipeline::error::{ErrorKind, PipelineError};
use pipeline::event::{Event, StreamEnd};
use pipeline::filter::EventTarget;
use std::cell::{Cell, RefCell};
use std::io::{self, Read, Write};
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

enum Engine {
    Handshaking(MidHandshakeSslStream<BioStream>),
    Established(SslStream<BioStream>),
}

enum HandshakeProgress {
    Established,
    InProgress,
    Failed,
}

/// Routes plaintext/ciphertext between the outer (filter-chained) target
/// and the sub-pipeline (slot 0) target, per role's direction table.
/// Owns no I/O itself — every byte passes through the `MemoryBio`.
pub struct TLSSession {
    role: Role,
    bio: Rc<MemoryBio>,
    engine: RefCell<Option<Engine>>,
    /// Plaintext awaiting `SSL_write`, buffered until the handshake
    /// finishes (client: app data pushed before connect completes; server:
    /// the backend's response pushed before the client finishes its half).
    buffer_send: RefCell<Data>,
    outer_output: RefCell<Option<Rc<dyn EventTarget>>>,
    peer_output: RefCell<Option<Rc<dyn EventTarget>>>,
    closed: Cell<bool>,
}

impl TLSSession {
    pub fn new_client(ctx: &TLSContext) -> Result<Rc<TLSSession>, PipelineError> {
        Self::new(Role::Client, ctx, None)
    }

    pub fn new_client_with_sni(
        ctx: &TLSContext,
        sni: Option<&str>,
    ) -> Result<Rc<TLSSession>, PipelineError> {
        Self::new(Role::Client, ctx, sni)
    }

    pub fn new_server(ctx: &TLSContext) -> Result<Rc<TLSSession>, PipelineError> {
        Self::new(Role::Server, ctx, None)
    }

    fn new(role: Role, ctx: &TLSContext, sni: Option<&str>) -> Result<Rc<TLSSession>, PipelineError> {
        let bio = MemoryBio::new();
        let stream = BioStream(bio.clone());
        let mut ssl = Ssl::new(&ctx.ssl_context).map_err(config_error)?;
        if let (Role::Client, Some(name)) = (role, sni) {
            ssl.set_hostname(name).map_err(config_error)?;
        }

        let engine = match role {
            Role::Client => match ssl.connect(stream) {
                Ok(s) => Engine::Established(s),
                Err(HandshakeError::WouldBlock(mid)) => Engine::Handshaking(mid),
                Err(e) => return Err(handshake_error(e)),
            },
            Role::Server => match ssl.accept(stream) {
                Ok(s) => Engine::Established(s),
                Err(HandshakeError::WouldBlock(mid)) => Engine::Handshaking(mid),
                Err(e) => return Err(handshake_error(e)),
            },
        };

        Ok(Rc::new(TLSSession {
            role,
            bio,
            engine: RefCell::new(Some(engine)),
            buffer_send: RefCell::new(Data::new()),
            outer_output: RefCell::new(None),
            peer_output: RefCell::new(None),
            closed: Cell::new(false),
        }))
    }

    pub fn set_outer_output(&self, target: Rc<dyn EventTarget>) {
        *self.outer_output.borrow_mut() = Some(target);
    }

    pub fn set_peer_output(&self, target: Rc<dyn EventTarget>) {
        *self.peer_output.borrow_mut() = Some(target);
    }

    /// Flushes anything the SSL engine produced during construction (e.g.
    /// a client's initial `ClientHello`). Must be called once both outputs
    /// are wired.
    pub fn start(&self) {
        self.pump_send();
    }

    pub fn is_established(&self) -> bool {
        matches!(self.engine.borrow().as_ref(), Some(Engine::Established(_)))
    }

    /// An event arriving on the filter's own (outer) input.
    pub fn on_event(&self, event: Event) {
        if self.closed.get() {
            return;
        }
        match event {
            Event::Data(mut data) => {
                match self.role {
                    Role::Client => self.buffer_send.borrow_mut().push(&mut data),
                    Role::Server => self.bio.feed_inbound(data),
                }
                self.advance();
            }
            Event::StreamEnd(end) => self.close(Some(end)),
            Event::MessageStart | Event::MessageEnd | Event::Flush => {}
        }
    }

    /// An event arriving from the sub-pipeline's output (the peer).
    pub fn on_receive_peer(&self, event: Event) {
        if self.closed.get() {
            return;
        }
        match event {
            Event::Data(mut data) => {
                match self.role {
                    Role::Client => self.bio.feed_inbound(data),
                    Role::Server => self.buffer_send.borrow_mut().push(&mut data),
                }
                self.advance();
            }
            Event::StreamEnd(end) => self.close(Some(end)),
            Event::MessageStart | Event::MessageEnd | Event::Flush => {}
        }
    }

    fn advance(&self) {
        match self.drive_handshake() {
            HandshakeProgress::Failed => self.fail(),
            HandshakeProgress::Established | HandshakeProgress::InProgress => {
                match self.role {
                    Role::Client => self.pump_write(),
                    Role::Server => self.pump_read(),
                }
            }
        }
    }

    /// Handshake loop. Each call either reaches the
    /// established state, makes one round of progress and keeps going, or
    /// parks (returns `InProgress`) once a round produces nothing further
    /// to send — it never spins waiting for bytes that haven't arrived.
    fn drive_handshake(&self) -> HandshakeProgress {
        loop {
            let current = self.engine.borrow_mut().take();
            match current {
                Some(Engine::Established(stream)) => {
                    *self.engine.borrow_mut() = Some(Engine::Established(stream));
                    return HandshakeProgress::Established;
                }
                Some(Engine::Handshaking(mid)) => match mid.handshake() {
                    Ok(stream) => {
                        *self.engine.borrow_mut() = Some(Engine::Established(stream));
                        self.pump_send();
                        return HandshakeProgress::Established;
                    }
                    Err(HandshakeError::WouldBlock(mid2)) => {
                        *self.engine.borrow_mut() = Some(Engine::Handshaking(mid2));
                        if self.pump_send() {
                            continue;
                        }
                        return HandshakeProgress::InProgress;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "tls handshake failed");
                        return HandshakeProgress::Failed;
                    }
                },
                None => return HandshakeProgress::Failed,
            }
        }
    }

    /// Drains the BIO's outbound (ciphertext) queue to whichever target is
    /// the "outgoing" direction for this role. Returns whether anything was
    /// sent.
    fn pump_send(&self) -> bool {
        let out = self.bio.take_outbound();
        if out.is_empty() {
            return false;
        }
        if let Some(target) = self.write_direction_target() {
            target.input(Event::Data(out));
        }
        true
    }

    /// Drains `buffer_send` into `SSL_write`, once the handshake has
    /// finished; partial writes resume from the exact remaining offset.
    fn pump_write(&self) {
        loop {
            if !self.is_established() {
                return;
            }
            let pending = self.buffer_send.borrow().to_vec();
            if pending.is_empty() {
                return;
            }
            let write_result = {
                let mut engine = self.engine.borrow_mut();
                match engine.as_mut() {
                    Some(Engine::Established(stream)) => stream.write(&pending),
                    _ => return,
                }
            };
            match write_result {
                Ok(0) => return,
                Ok(n) => {
                    self.buffer_send.borrow_mut().shift(n);
                    self.pump_send();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.pump_send();
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "tls ssl_write failed");
                    self.fail();
                    return;
                }
            }
        }
    }

    /// Reads decrypted plaintext until the engine reports `WANT_READ` with
    /// nothing left in the inbound BIO. Explicit per-iteration progress
    /// flag so an adversarial peer can never make this spin: each loop
    /// either consumes bytes or breaks.
    fn pump_read(&self) {
        if !self.is_established() {
            return;
        }
        let mut collected = Data::new();
        loop {
            let mut buf = [0u8; pipeline::data::RECEIVE_BUFFER_SIZE];
            let progress;
            {
                let mut engine = self.engine.borrow_mut();
                let stream = match engine.as_mut() {
                    Some(Engine::Established(stream)) => stream,
                    _ => break,
                };
                match stream.read(&mut buf) {
                    Ok(0) => {
                        progress = false;
                    }
                    Ok(n) => {
                        collected.push_chunk(Chunk::from_vec(buf[..n].to_vec()));
                        progress = true;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        progress = false;
                    }
                    Err(e) => {
                        drop(engine);
                        tracing::warn!(error = %e, "tls ssl_read failed");
                        self.fail();
                        return;
                    }
                }
            }
            if !progress {
                break;
            }
        }
        if !collected.is_empty() {
            if let Some(target) = self.read_direction_target() {
                target.input(Event::Data(collected));
            }
        }
    }

    fn write_direction_target(&self) -> Option<Rc<dyn EventTarget>> {
        match self.role {
            Role::Client => self.peer_output.borrow().clone(),
            Role::Server => self.outer_output.borrow().clone(),
        }
    }

    fn read_direction_target(&self) -> Option<Rc<dyn EventTarget>> {
        match self.role {
            Role::Client => self.outer_output.borrow().clone(),
            Role::Server => self.peer_output.borrow().clone(),
        }
    }

    fn fail(&self) {
        self.close(Some(StreamEnd::new(ErrorKind::Unauthorized)));
    }

    /// At most one `StreamEnd` ever reaches the outer output, regardless
    /// of which side triggered the close.
    pub fn close(&self, end: Option<StreamEnd>) {
        if self.closed.get() {
            return;
        }
        self.closed.set(true);
        let end = end.unwrap_or_else(StreamEnd::no_error);
        if let Some(target) = self.outer_output.borrow().clone() {
            target.input(Event::StreamEnd(end));
        }
    }
}

fn handshake_error(e: HandshakeError<BioStream>) -> PipelineError {
    match e {
        HandshakeError::SetupFailure(stack) => PipelineError::InvalidConfiguration {
            message: stack.to_string(),
        },
        HandshakeError::Failure(mid) => PipelineError::Internal {
            message: format!("tls handshake rejected: {}", mid.error()),
        },
        HandshakeError::WouldBlock(_) => unreachable!("handled by caller"),
    }
}

fn config_error(stack: openssl::error::ErrorStack) -> PipelineError {
    PipelineError::InvalidConfiguration {
        message: stack.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CertificateAndKey, FnCertificateSource, TLSContext};
    use openssl::asn1::Asn1Time;
    use openssl::bn::{BigNum, MsbOption};
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::ssl::SslMethod;
    use openssl::x509::extension::SubjectAlternativeName;
    use openssl::x509::{X509Name, X509};
    use std::cell::RefCell;

    fn self_signed(cn: &str) -> CertificateAndKey {
        let rsa = Rsa::generate(2048).unwrap();
        let key = PKey::from_rsa(rsa).unwrap();

        let mut name = X509Name::builder().unwrap();
        name.append_entry_by_text("CN", cn).unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let mut serial = BigNum::new().unwrap();
        serial.rand(128, MsbOption::MAYBE_ZERO, false).unwrap();
        builder
            .set_serial_number(&serial.to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(7).unwrap())
            .unwrap();
        let san = SubjectAlternativeName::new()
            .dns(cn)
            .build(&builder.x509v3_context(None, None))
            .unwrap();
        builder.append_extension(san).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        CertificateAndKey::new(builder.build(), key)
    }

    #[derive(Default)]
    struct Collector {
        events: RefCell<Vec<Event>>,
    }

    impl EventTarget for Collector {
        fn input(&self, event: Event) {
            self.events.borrow_mut().push(event);
        }
    }

    impl Collector {
        fn drain(&self) -> Vec<Event> {
            self.events.borrow_mut().drain(..).collect()
        }

        fn plaintext(&self) -> Vec<u8> {
            self.events
                .borrow()
                .iter()
                .filter_map(|e| e.as_data())
                .flat_map(|d| d.to_vec())
                .collect()
        }
    }

    fn server_context(cert_and_key: &CertificateAndKey) -> TLSContext {
        let mut builder = TLSContext::builder(SslMethod::tls_server()).unwrap();
        builder.set_certificate(cert_and_key).unwrap();
        builder.build()
    }

    fn client_context() -> TLSContext {
        TLSContext::builder(SslMethod::tls_client()).unwrap().build()
    }

    /// Shuttles ciphertext between the two sessions' "wire" collectors
    /// until neither side has anything further to move — the test's stand-in
    /// for a connected socket pair.
    fn pump_wire(
        client: &Rc<TLSSession>,
        client_to_server: &Collector,
        server: &Rc<TLSSession>,
        server_to_client: &Collector,
    ) {
        loop {
            let mut moved = false;
            for event in client_to_server.drain() {
                server.on_event(event);
                moved = true;
            }
            for event in server_to_client.drain() {
                client.on_receive_peer(event);
                moved = true;
            }
            if !moved {
                break;
            }
        }
    }

    #[test]
    fn tls_loopback_round_trips_plaintext() {
        let cert_and_key = self_signed("test.local");
        let server_ctx = server_context(&cert_and_key);
        let client_ctx = client_context();

        let client = TLSSession::new_client(&client_ctx).unwrap();
        let server = TLSSession::new_server(&server_ctx).unwrap();

        let client_to_server = Rc::new(Collector::default());
        let client_plain_in = Rc::new(Collector::default());
        let server_to_client = Rc::new(Collector::default());
        let server_plain_out = Rc::new(Collector::default());

        client.set_peer_output(client_to_server.clone());
        client.set_outer_output(client_plain_in.clone());
        server.set_outer_output(server_to_client.clone());
        server.set_peer_output(server_plain_out.clone());

        client.start();
        server.start();
        pump_wire(&client, &client_to_server, &server, &server_to_client);
        assert!(client.is_established());
        assert!(server.is_established());

        client.on_event(Event::Data(Data::from_bytes(b"PING".to_vec())));
        pump_wire(&client, &client_to_server, &server, &server_to_client);
        assert_eq!(server_plain_out.plaintext(), b"PING");

        server.on_receive_peer(Event::Data(Data::from_bytes(b"PONG".to_vec())));
        pump_wire(&client, &client_to_server, &server, &server_to_client);
        assert_eq!(client_plain_in.plaintext(), b"PONG");
    }

    #[test]
    fn sni_dispatch_selects_certificate_per_host_name() {
        let cert_a = self_signed("a.test");
        let cert_b = self_signed("b.test");

        let mut builder = TLSContext::builder(SslMethod::tls_server()).unwrap();
        let source = FnCertificateSource(move |sni: Option<&str>| match sni {
            Some("a.test") => Some(cert_a.clone()),
            Some("b.test") => Some(cert_b.clone()),
            _ => None,
        });
        builder.set_certificate_source(std::sync::Arc::new(source));
        let server_ctx = builder.build();

        for host in ["a.test", "b.test"] {
            let client_ctx = client_context();
            let client = TLSSession::new_client_with_sni(&client_ctx, Some(host)).unwrap();
            let server = TLSSession::new_server(&server_ctx).unwrap();

            let client_to_server = Rc::new(Collector::default());
            let client_plain_in = Rc::new(Collector::default());
            let server_to_client = Rc::new(Collector::default());
            let server_plain_out = Rc::new(Collector::default());

            client.set_peer_output(client_to_server.clone());
            client.set_outer_output(client_plain_in.clone());
            server.set_outer_output(server_to_client.clone());
            server.set_peer_output(server_plain_out.clone());

            client.start();
            server.start();
            pump_wire(&client, &client_to_server, &server, &server_to_client);
            assert!(client.is_established(), "handshake for {host} should succeed");
        }
    }
}
