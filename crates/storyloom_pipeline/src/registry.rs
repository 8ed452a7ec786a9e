//! Name-keyed processor registry, mirroring the original
//! `ProcessorRegistry`/`ProcessorConfig` pair: per-processor config is kept
//! separate from the processor instance itself so reloading config never
//! requires re-loading a model.

use std::collections::HashMap;
use std::sync::Arc;

use crate::processor::Processor;

/// Per-processor tuning, normally loaded from `storyloom_db` at startup.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    pub enabled: bool,
    pub weight: f32,
    pub threshold: f32,
    pub priority_rank: u8,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 1.0,
            threshold: 0.3,
            priority_rank: 0,
        }
    }
}

struct Entry {
    processor: Arc<dyn Processor>,
    config: ProcessorConfig,
}

/// Holds every registered processor plus its config. Falls back to
/// [`ProcessorConfig::default`] for any processor whose config failed to
/// load, rather than refusing to start.
#[derive(Default)]
pub struct ProcessorRegistry {
    entries: HashMap<String, Entry>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, processor: Arc<dyn Processor>, config: Option<ProcessorConfig>) {
        let name = processor.name().to_string();
        let config = config.unwrap_or_default();
        self.entries.insert(name, Entry { processor, config });
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.entries.get(name).map(|e| e.processor.clone())
    }

    pub fn config(&self, name: &str) -> ProcessorConfig {
        self.entries
            .get(name)
            .map(|e| e.config)
            .unwrap_or_default()
    }

    pub fn set_config(&mut self, name: &str, config: ProcessorConfig) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.config = config;
        }
    }

    /// Enabled processors, in `priority_rank` order (lowest rank first).
    pub fn enabled(&self) -> Vec<(Arc<dyn Processor>, ProcessorConfig)> {
        let mut out: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.config.enabled && e.processor.is_available())
            .map(|e| (e.processor.clone(), e.config))
            .collect();
        out.sort_by_key(|(_, cfg)| cfg.priority_rank);
        out
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Names of processors that are configured on but currently failing
    /// `is_available` ("processor A is reported unavailable in
    /// job stats"), for inclusion in the job receipt.
    pub fn unavailable(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.config.enabled && !e.processor.is_available())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{ProcessorError, RawDescription};
    use async_trait::async_trait;

    struct StubProcessor {
        name: &'static str,
        available: bool,
    }

    #[async_trait]
    impl Processor for StubProcessor {
        fn name(&self) -> &str {
            self.name
        }
        fn is_available(&self) -> bool {
            self.available
        }
        async fn load(&self) -> Result<(), ProcessorError> {
            Ok(())
        }
        async fn extract(
            &self,
            _chapter_id: &str,
            _text: &str,
        ) -> Result<Vec<RawDescription>, ProcessorError> {
            Ok(vec![])
        }
    }

    #[test]
    fn enabled_excludes_unavailable_and_disabled() {
        let mut registry = ProcessorRegistry::new();
        registry.register(
            Arc::new(StubProcessor {
                name: "a",
                available: true,
            }),
            Some(ProcessorConfig {
                priority_rank: 1,
                ..Default::default()
            }),
        );
        registry.register(
            Arc::new(StubProcessor {
                name: "b",
                available: false,
            }),
            None,
        );
        registry.register(
            Arc::new(StubProcessor {
                name: "c",
                available: true,
            }),
            Some(ProcessorConfig {
                enabled: false,
                ..Default::default()
            }),
        );

        let enabled = registry.enabled();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].0.name(), "a");
    }

    #[test]
    fn missing_config_falls_back_to_default() {
        let registry = ProcessorRegistry::new();
        let cfg = registry.config("nonexistent");
        assert_eq!(cfg.threshold, 0.3);
    }
}
