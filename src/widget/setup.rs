//! Binding declarations collected during `in_setup`

use crate::key::{Key, KeyId, KeyValue};
use crate::processor::{DataProcessor, ValueSink};
use std::sync::Arc;

/// Collects the bindings a widget declares
///
/// Nothing is bound until `in_setup` returns; the model then binds every
/// declaration in order.
#[derive(Default)]
pub struct SetupContext {
    bindings: Vec<(KeyId, Arc<dyn ValueSink>)>,
}

impl SetupContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a fresh processor starting at `default`
    pub fn bind<T: KeyValue>(&mut self, key: &Key<T>, default: T) -> DataProcessor<T> {
        let processor = DataProcessor::new(default);
        self.bind_processor(key, &processor);
        processor
    }

    /// Bind an existing processor
    pub fn bind_processor<T: KeyValue>(&mut self, key: &Key<T>, processor: &DataProcessor<T>) {
        self.bindings
            .push((key.id().clone(), Arc::new(processor.clone())));
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub(crate) fn into_bindings(self) -> Vec<(KeyId, Arc<dyn ValueSink>)> {
        self.bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_in_order() {
        let mut ctx = SetupContext::new();
        let limit = ctx.bind(&Key::<i32>::new("FlightController", "HeightLimit"), 0);
        let existing = DataProcessor::new(false);
        ctx.bind_processor(&Key::new("FlightController", "IsFlying"), &existing);

        let bindings = ctx.into_bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].0.parameter(), "HeightLimit");
        assert_eq!(bindings[0].1.id(), limit.id());
        assert_eq!(bindings[1].1.id(), existing.id());
    }
}
