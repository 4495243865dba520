//! The tagged union that flows through every pipeline.

use crate::data::Data;
use crate::error::ErrorKind;
use std::sync::Arc;

/// Terminal marker carrying an error kind. At most one is emitted per
/// direction per session, and nothing follows it.
#[derive(Clone, Debug)]
pub struct StreamEnd {
    pub kind: ErrorKind,
    pub message: Option<Arc<str>>,
}

impl StreamEnd {
    pub fn new(kind: ErrorKind) -> Self {
        StreamEnd { kind, message: None }
    }

    pub fn with_message(kind: ErrorKind, message: impl Into<Arc<str>>) -> Self {
        StreamEnd {
            kind,
            message: Some(message.into()),
        }
    }

    pub fn no_error() -> Self {
        StreamEnd::new(ErrorKind::NoError)
    }
}

/// One unit flowing through a pipeline: a data chunk sequence, a message
/// boundary marker, the terminal marker, or a flush hint.
#[derive(Clone, Debug)]
pub enum Event {
    Data(Data),
    MessageStart,
    MessageEnd,
    /// A hint that buffered output should be transmitted now. Not a
    /// delimiter — it carries no data and does not terminate the stream.
    Flush,
    StreamEnd(StreamEnd),
}

impl Event {
    pub fn is_stream_end(&self) -> bool {
        matches!(self, Event::StreamEnd(_))
    }

    pub fn as_data(&self) -> Option<&Data> {
        match self {
            Event::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<Data> {
        match self {
            Event::Data(d) => Some(d),
            _ => None,
        }
    }
}
