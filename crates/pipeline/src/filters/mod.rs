//! Built-in filters and the registry that maps configuration `type` strings
//! to filter factories. This module intentionally stays small;
//! `PassThrough` exists for tests and as the
//! minimal example of the `Filter` contract, TLS is registered from the
//! `tls-filter` crate, and everything transport-facing is registered from
//! the `net-stream` crate).

pub mod pass_through;
pub mod registry;

pub use pass_through::PassThrough;
pub use registry::{FilterFactory, FilterRegistry};
