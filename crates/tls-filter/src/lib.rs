//! TLS termination for the plaintext side of a pipeline.
//! `Client` dials out through a ciphertext sub-pipeline; `Server` decrypts
//! inbound ciphertext and feeds a plaintext backend sub-pipeline. Both are
//! thin `pipeline::Filter` wrappers around a `TLSSession`, which in turn
//! drives an `openssl` `SslStream` bridged to the pipeline's `Data` buffers
//! through an in-memory BIO (`memory_bio`).

pub mod context;
pub mod filter;
pub mod memory_bio;
pub mod session;

pub use context::{CertificateAndKey, CertificateSource, FnCertificateSource, TLSContext, TLSContextBuilder};
pub use filter::{Client, Server};
pub use session::{Role, TLSSession};
