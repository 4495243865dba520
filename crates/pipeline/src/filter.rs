//! Filter base. Modeled as a capability set — a trait, not an inheritance
//! hierarchy — since `clone` is the only place that needs runtime
//! polymorphism; everything else is a plain virtual call through
//! `Box<dyn Filter>`.

use crate::context::Context;
use crate::error::PipelineResult;
use crate::event::Event;
use crate::pipeline::PipelineDef;
use std::rc::Rc;

/// A one-way event sink. Chaining sets the target of one event function's
/// output to another's input.
pub trait EventTarget {
    fn input(&self, event: Event);
}

/// Resolves a named sub-pipeline reference at bind time.
pub trait Namespace {
    fn resolve(&self, name: &str) -> Option<Rc<PipelineDef>>;
}

/// A sub-pipeline slot declared at configuration time: either an anonymous
/// inline definition, or a named reference resolved by `bind()`.
pub enum SubPipelineSlot {
    Anonymous(Rc<PipelineDef>),
    Named {
        name: String,
        def: Option<Rc<PipelineDef>>,
    },
}

impl SubPipelineSlot {
    pub fn named(name: impl Into<String>) -> Self {
        SubPipelineSlot::Named {
            name: name.into(),
            def: None,
        }
    }

    pub fn def(&self) -> Option<&Rc<PipelineDef>> {
        match self {
            SubPipelineSlot::Anonymous(d) => Some(d),
            SubPipelineSlot::Named { def, .. } => def.as_ref(),
        }
    }

    fn resolve(&mut self, namespace: &dyn Namespace) -> PipelineResult<()> {
        if let SubPipelineSlot::Named { name, def } = self {
            if def.is_none() {
                *def = namespace.resolve(name);
                if def.is_none() {
                    return Err(crate::error::PipelineError::UnresolvedSubPipeline {
                        filter: String::new(),
                        slot: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Helper embedded by concrete filters to hold their chained output and
/// sub-pipeline slot table — the Rust stand-in for the protected members of
/// an inheritance-based filter base class.
#[derive(Default)]
pub struct FilterIo {
    output: Option<Rc<dyn EventTarget>>,
    slots: Vec<SubPipelineSlot>,
}

impl FilterIo {
    pub fn new() -> Self {
        FilterIo::default()
    }

    pub fn add_sub_pipeline_def(&mut self, def: Rc<PipelineDef>) -> usize {
        self.slots.push(SubPipelineSlot::Anonymous(def));
        self.slots.len() - 1
    }

    pub fn add_sub_pipeline_named(&mut self, name: impl Into<String>) -> usize {
        self.slots.push(SubPipelineSlot::named(name));
        self.slots.len() - 1
    }

    pub fn num_sub_pipelines(&self) -> usize {
        self.slots.len()
    }

    pub fn sub_pipeline_def(&self, index: usize) -> Option<&Rc<PipelineDef>> {
        self.slots.get(index).and_then(|s| s.def())
    }

    pub fn bind(&mut self, namespace: &dyn Namespace) -> PipelineResult<()> {
        for slot in &mut self.slots {
            slot.resolve(namespace)?;
        }
        Ok(())
    }

    pub fn chain(&mut self, target: Rc<dyn EventTarget>) {
        self.output = Some(target);
    }

    pub fn is_chained(&self) -> bool {
        self.output.is_some()
    }

    /// The chained output target itself, for filters (such as TLS) that
    /// need to hand it to some other owned object rather than calling
    /// `output()` directly.
    pub fn output_target(&self) -> Option<Rc<dyn EventTarget>> {
        self.output.clone()
    }

    /// Delivers to the chained downstream target.
    pub fn output(&self, event: Event) {
        if let Some(target) = &self.output {
            target.input(event);
        }
    }

    /// Delivers to an explicit target, bypassing the chained output (used
    /// by routing filters such as TLS to address either the outer chain or
    /// the ciphertext sub-pipeline).
    pub fn output_to(&self, event: Event, target: &dyn EventTarget) {
        target.input(event);
    }
}

impl Clone for FilterIo {
    /// `clone()` must produce a filter with the same configuration but no
    /// runtime state: the chained output is dropped, slot definitions
    /// (the configuration) are kept.
    fn clone(&self) -> Self {
        FilterIo {
            output: None,
            slots: self
                .slots
                .iter()
                .map(|s| match s {
                    SubPipelineSlot::Anonymous(d) => SubPipelineSlot::Anonymous(d.clone()),
                    SubPipelineSlot::Named { name, def } => SubPipelineSlot::Named {
                        name: name.clone(),
                        def: def.clone(),
                    },
                })
                .collect(),
        }
    }
}

/// The filter lifecycle contract.
pub trait Filter {
    /// Deep-enough copy for configuration; shares immutable config (e.g. a
    /// parsed TLS context) but carries no runtime state.
    fn clone_filter(&self) -> Box<dyn Filter>;

    /// Resolves named sub-pipeline references against `namespace`. Errors
    /// here are configuration errors, surfaced synchronously at bind time.
    fn bind(&mut self, _namespace: &dyn Namespace) -> PipelineResult<()> {
        Ok(())
    }

    /// Wires this filter's output to `target`. Called once per pipeline
    /// instance, in pipeline declaration order.
    fn chain(&mut self, target: Rc<dyn EventTarget>);

    /// Consumes one event; may emit zero or more events via the chained
    /// output; may construct sub-pipelines lazily.
    fn process(&mut self, ctx: &Context, event: Event);

    /// Restores a filter to its post-clone state. Called when the
    /// pipeline is returned to a pool. Must be idempotent.
    fn reset(&mut self) {}

    /// Releases external resources (sockets, SSL, file handles). Called
    /// before destruction.
    fn shutdown(&mut self) {}

    /// Human-readable name for diagnostics.
    fn dump(&self) -> String {
        "filter".to_string()
    }
}
