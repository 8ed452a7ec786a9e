//! Caches one strategy instance per [`ProcessingMode`] so repeated
//! resolution doesn't reallocate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{
    AdaptiveStrategy, EnsembleStrategy, ParallelStrategy, ProcessingMode, ProcessingStrategy,
    SequentialStrategy, SingleStrategy,
};

pub struct StrategyFactory {
    consensus_threshold: f32,
    cache: Mutex<HashMap<ProcessingMode, Arc<dyn ProcessingStrategy>>>,
}

impl StrategyFactory {
    pub fn new(consensus_threshold: f32) -> Self {
        Self {
            consensus_threshold,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, mode: ProcessingMode) -> Arc<dyn ProcessingStrategy> {
        let mut cache = self.cache.lock().expect("strategy cache poisoned");
        if let Some(strategy) = cache.get(&mode) {
            return strategy.clone();
        }

        let strategy: Arc<dyn ProcessingStrategy> = match mode {
            ProcessingMode::Single => Arc::new(SingleStrategy),
            ProcessingMode::Parallel => Arc::new(ParallelStrategy),
            ProcessingMode::Sequential => Arc::new(SequentialStrategy),
            ProcessingMode::Ensemble => Arc::new(EnsembleStrategy::new(self.consensus_threshold)),
            ProcessingMode::Adaptive => Arc::new(AdaptiveStrategy::new(self.consensus_threshold)),
        };

        cache.insert(mode, strategy.clone());
        strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_lookups_return_the_same_cached_instance() {
        let factory = StrategyFactory::new(0.5);
        let a = factory.get(ProcessingMode::Parallel);
        let b = factory.get(ProcessingMode::Parallel);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn distinct_modes_are_distinct_instances() {
        let factory = StrategyFactory::new(0.5);
        let single = factory.get(ProcessingMode::Single);
        let ensemble = factory.get(ProcessingMode::Ensemble);
        assert!(!Arc::ptr_eq(&single, &ensemble));
    }
}
