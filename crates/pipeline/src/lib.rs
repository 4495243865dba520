//! Streaming event pipeline engine: filter composition, event dispatch,
//! sub-pipeline instantiation, and the single-threaded cooperative reactor
//! that drives it all.

pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod event;
pub mod filter;
pub mod filters;
pub mod pipeline;
pub mod reactor;
pub mod tap;

pub use context::{Context, InputContext};
pub use data::{Chunk, Data, Producer};
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use event::{Event, StreamEnd};
pub use filter::{EventTarget, Filter, Namespace, SubPipelineSlot};
pub use pipeline::{Pipeline, PipelineDef, StaticNamespace};
pub use reactor::{Reactor, ReactorHandle};
pub use tap::Tap;
