//! TCP/TLS proxy binary: accepts inbound connections on `--listen`,
//! optionally terminates TLS, and forwards the plaintext to `--upstream`.
//! Every connection gets its own `Context`; the filter chain for it is
//! instantiated fresh so a crash or `StreamEnd` on one connection never
//! touches another's state.

mod config;
mod forward;
mod sink;

use anyhow::Result;
use clap::Parser;
use config::Cli;
use forward::{Forward, Terminator};
use pipeline::context::Context;
use pipeline::filter::EventTarget;
use pipeline::pipeline::{PipelineDef, StaticNamespace};
use pipeline::reactor::{Reactor, ReactorHandle};
use sink::UpstreamForward;
use std::rc::Rc;
use tls_filter::context::TLSContext;
use tls_filter::{CertificateAndKey, Server as TlsServer};
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "proxy=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let tls_material = cli.tls_material()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let reactor = Reactor::new();
    runtime.block_on(reactor.run_until(serve(cli, tls_material, reactor.clone())))
}

async fn serve(cli: Cli, tls_material: Option<CertificateAndKey>, reactor: ReactorHandle) -> Result<()> {
    let listener = TcpListener::bind(cli.listen).await?;
    tracing::info!(
        listen = %cli.listen,
        upstream = %cli.upstream,
        tls = tls_material.is_some(),
        "proxy listening"
    );

    let tls_context = match tls_material {
        Some(cert_and_key) => {
            let mut builder = TLSContext::builder(openssl::ssl::SslMethod::tls_server())?;
            builder.set_certificate(&cert_and_key)?;
            Some(Rc::new(builder.build()))
        }
        None => None,
    };

    loop {
        let (client_socket, peer_addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received, draining");
                return Ok(());
            }
        };
        tracing::debug!(peer = %peer_addr, "accepted connection");

        let upstream_addr = cli.upstream;
        let tls_context = tls_context.clone();
        let reactor_for_task = reactor.clone();
        reactor.clone().spawn_local(async move {
            if let Err(err) =
                handle_connection(client_socket, upstream_addr, tls_context, reactor_for_task).await
            {
                tracing::warn!(peer = %peer_addr, error = %err, "connection setup failed");
            }
        });
    }
}

async fn handle_connection(
    client_socket: TcpStream,
    upstream_addr: std::net::SocketAddr,
    tls_context: Option<Rc<TLSContext>>,
    reactor: ReactorHandle,
) -> Result<()> {
    let upstream_socket = TcpStream::connect(upstream_addr).await?;

    match tls_context {
        None => {
            let client_forward = Forward::new();
            let upstream_forward = Forward::new();
            let client_stream = net_stream::NetStream::new(
                client_socket,
                client_forward.clone() as Rc<dyn EventTarget>,
                reactor.clone(),
            );
            let upstream_stream = net_stream::NetStream::new(
                upstream_socket,
                upstream_forward.clone() as Rc<dyn EventTarget>,
                reactor,
            );
            client_forward.set(upstream_stream);
            upstream_forward.set(client_stream);
        }
        Some(ctx) => {
            let backend = PipelineDef::new(
                "backend",
                vec![Box::new(UpstreamForward::new(upstream_socket, reactor.clone()))],
            );
            let tls_pipeline_def =
                PipelineDef::new("tls-server", vec![Box::new(TlsServer::new(ctx, backend))]);
            let namespace = StaticNamespace::new();
            let pipeline = tls_pipeline_def.instantiate(Context::new(), &namespace)?;

            let client_forward = Forward::new();
            let client_stream = net_stream::NetStream::new(
                client_socket,
                client_forward.clone() as Rc<dyn EventTarget>,
                reactor,
            );
            let done = Rc::new(tokio::sync::Notify::new());
            let terminator = Terminator::new(client_stream, done.clone());
            pipeline.chain_output(terminator);
            client_forward.set(pipeline.input());

            // `Pipeline::drop` runs `shutdown()` on every filter, which for
            // `UpstreamForward` closes the upstream socket. Holding `pipeline`
            // on this task's stack until the connection actually ends (the
            // `StreamEnd` the `Terminator` above watches for) keeps the
            // connection alive instead of tearing it down the moment this
            // function would otherwise return.
            done.notified().await;
        }
    }

    Ok(())
}
