use crate::context::Context;
use crate::event::Event;
use crate::filter::{EventTarget, Filter};
use std::rc::Rc;

/// Forwards every event unchanged. The minimal filter: no state, no
/// sub-pipelines, used by the engine's own tests and as a
/// template for new filter authors.
#[derive(Default)]
pub struct PassThrough {
    output: Option<Rc<dyn EventTarget>>,
}

impl PassThrough {
    pub fn new() -> Self {
        PassThrough::default()
    }
}

impl Filter for PassThrough {
    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(PassThrough::default())
    }

    fn chain(&mut self, target: Rc<dyn EventTarget>) {
        self.output = Some(target);
    }

    fn process(&mut self, _ctx: &Context, event: Event) {
        if let Some(target) = &self.output {
            target.input(event);
        }
    }

    fn dump(&self) -> String {
        "PassThrough".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Data;
    use std::cell::RefCell;

    struct Collector(RefCell<Vec<Event>>);

    impl EventTarget for Collector {
        fn input(&self, event: Event) {
            self.0.borrow_mut().push(event);
        }
    }

    #[test]
    fn forwards_events_unchanged_in_order() {
        let collector = Rc::new(Collector(RefCell::new(Vec::new())));
        let mut filter = PassThrough::new();
        filter.chain(collector.clone());
        let ctx = Context::new();

        filter.process(&ctx, Event::Data(Data::from_bytes(b"hello".to_vec())));
        filter.process(&ctx, Event::Data(Data::from_bytes(b" world".to_vec())));
        filter.process(&ctx, Event::StreamEnd(crate::event::StreamEnd::no_error()));

        let events = collector.0.borrow();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].as_data().unwrap().to_vec(), b"hello");
        assert_eq!(events[1].as_data().unwrap().to_vec(), b" world");
        assert!(events[2].is_stream_end());
    }
}
