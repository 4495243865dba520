//! Maps a configuration `type` string to a constructor for the
//! corresponding `Filter`. Mirrors the stage-factory/registry split this
//! codebase otherwise uses for config-driven construction, scoped down to
//! the small, fixed filter catalog this engine actually ships.

use crate::error::{PipelineError, PipelineResult};
use crate::filter::Filter;
use std::collections::HashMap;

pub trait FilterFactory {
    fn create(&self, params: &serde_json::Value) -> PipelineResult<Box<dyn Filter>>;
}

impl<F> FilterFactory for F
where
    F: Fn(&serde_json::Value) -> PipelineResult<Box<dyn Filter>>,
{
    fn create(&self, params: &serde_json::Value) -> PipelineResult<Box<dyn Filter>> {
        (self)(params)
    }
}

#[derive(Default)]
pub struct FilterRegistry {
    factories: HashMap<String, Box<dyn FilterFactory>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        let mut registry = FilterRegistry::default();
        registry.register("pass-through", |_params| {
            Ok(Box::new(crate::filters::PassThrough::new()) as Box<dyn Filter>)
        });
        registry
    }

    pub fn register(&mut self, filter_type: impl Into<String>, factory: impl FilterFactory + 'static) {
        self.factories.insert(filter_type.into(), Box::new(factory));
    }

    pub fn create(
        &self,
        filter_type: &str,
        params: &serde_json::Value,
    ) -> PipelineResult<Box<dyn Filter>> {
        let factory = self
            .factories
            .get(filter_type)
            .ok_or_else(|| PipelineError::UnknownFilterType {
                filter_type: filter_type.to_string(),
            })?;
        factory.create(params)
    }
}
