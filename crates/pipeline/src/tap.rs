//! Flow-control back-channel. Every event target exposes a tap;
//! downstream closes it to signal "stop sending", opens it to resume. The
//! trait is the propagation point only — the actual Receiving/Pausing/Paused
//! state machine lives with whatever upstream source owns in-flight I/O
//! (see the stream adapter crate).

/// Implemented by an upstream event source that can be asked to pause.
pub trait Tap {
    /// Downstream is full; stop producing new data after the current
    /// in-flight operation completes.
    fn on_tap_close(&self);

    /// Downstream can accept data again; resume producing.
    fn on_tap_open(&self);
}

/// A tap that does nothing — the default for filters with no internal
/// buffering to pause, so backpressure simply has no effect on them.
pub struct NullTap;

impl Tap for NullTap {
    fn on_tap_close(&self) {}
    fn on_tap_open(&self) {}
}
