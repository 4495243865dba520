//! Pipeline definition & instance.

use crate::context::Context;
use crate::error::PipelineResult;
use crate::event::Event;
use crate::filter::{EventTarget, Filter, Namespace};
use std::collections::HashMap;
use std::cell::RefCell;
use std::rc::Rc;

struct FilterNode {
    filter: RefCell<Box<dyn Filter>>,
    context: Context,
}

impl EventTarget for FilterNode {
    fn input(&self, event: Event) {
        let mut guard = self.filter.borrow_mut();
        guard.process(&self.context, event);
    }
}

/// Immutable template: an ordered list of filter prototypes plus a name.
/// Never mutated after the filters it names have been bound once.
pub struct PipelineDef {
    pub name: String,
    prototypes: Vec<Box<dyn Filter>>,
}

impl PipelineDef {
    pub fn new(name: impl Into<String>, prototypes: Vec<Box<dyn Filter>>) -> Rc<PipelineDef> {
        Rc::new(PipelineDef {
            name: name.into(),
            prototypes,
        })
    }

    /// Clones every filter prototype in order, binds each against
    /// `namespace`, then chains filter *i*'s output into filter *i+1*'s
    /// input. The last filter's output is left unchained — it becomes the
    /// pipeline's own output, wired by the caller via `chain_output`.
    pub fn instantiate(
        self: &Rc<Self>,
        context: Context,
        namespace: &dyn Namespace,
    ) -> PipelineResult<Pipeline> {
        let mut nodes: Vec<Rc<FilterNode>> = Vec::with_capacity(self.prototypes.len());
        for proto in &self.prototypes {
            let mut filter = proto.clone_filter();
            filter.bind(namespace)?;
            nodes.push(Rc::new(FilterNode {
                filter: RefCell::new(filter),
                context: context.clone(),
            }));
        }
        for i in 0..nodes.len().saturating_sub(1) {
            let downstream: Rc<dyn EventTarget> = nodes[i + 1].clone();
            nodes[i].filter.borrow_mut().chain(downstream);
        }
        Ok(Pipeline {
            def: self.clone(),
            context,
            nodes,
        })
    }
}

/// A live pipeline instance, belonging to exactly one owner. Dropping it
/// runs `shutdown()` on every filter; callers that want the drop deferred
/// to the end of the current input burst should hand it to
/// `Reactor::auto_release` instead of dropping it directly.
pub struct Pipeline {
    def: Rc<PipelineDef>,
    context: Context,
    nodes: Vec<Rc<FilterNode>>,
}

impl Pipeline {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The pipeline's head input: the external entry point that feeds the
    /// first filter.
    pub fn input(&self) -> Rc<dyn EventTarget> {
        self.nodes[0].clone()
    }

    /// Wires the tail filter's output to an external target.
    pub fn chain_output(&self, target: Rc<dyn EventTarget>) {
        if let Some(last) = self.nodes.last() {
            last.filter.borrow_mut().chain(target);
        }
    }

    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.filter.borrow_mut().shutdown();
        }
    }

    pub fn reset(&self) {
        for node in &self.nodes {
            node.filter.borrow_mut().reset();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A simple, immutable namespace mapping sub-pipeline names to their
/// definitions — built once at configuration time.
#[derive(Default)]
pub struct StaticNamespace {
    defs: HashMap<String, Rc<PipelineDef>>,
}

impl StaticNamespace {
    pub fn new() -> Self {
        StaticNamespace::default()
    }

    pub fn insert(&mut self, def: Rc<PipelineDef>) {
        self.defs.insert(def.name.clone(), def);
    }
}

impl Namespace for StaticNamespace {
    fn resolve(&self, name: &str) -> Option<Rc<PipelineDef>> {
        self.defs.get(name).cloned()
    }
}
