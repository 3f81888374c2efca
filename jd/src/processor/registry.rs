//! ProcessorRegistry - maps job types to processors

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use super::builtin::{EchoProcessor, FailProcessor, SleepProcessor};
use super::{FnProcessor, JobContext, Processor, ProcessorError};

/// Job type -> processor lookup
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `echo`, `sleep` and `fail`
    pub fn with_builtins() -> Self {
        debug!("ProcessorRegistry::with_builtins: called");
        let mut registry = Self::new();
        registry.register("echo", EchoProcessor);
        registry.register("sleep", SleepProcessor);
        registry.register("fail", FailProcessor);
        registry
    }

    /// Register a processor, returning the one it replaced
    pub fn register(
        &mut self,
        job_type: impl Into<String>,
        processor: impl Processor + 'static,
    ) -> Option<Arc<dyn Processor>> {
        self.register_arc(job_type, Arc::new(processor))
    }

    pub fn register_arc(
        &mut self,
        job_type: impl Into<String>,
        processor: Arc<dyn Processor>,
    ) -> Option<Arc<dyn Processor>> {
        let job_type = job_type.into();
        let replaced = self.processors.insert(job_type.clone(), processor);
        if replaced.is_some() {
            info!(%job_type, "Replaced processor");
        } else {
            debug!(%job_type, "ProcessorRegistry::register: added");
        }
        replaced
    }

    /// Register a closure as a processor
    pub fn register_fn<F, Fut>(&mut self, job_type: impl Into<String>, f: F) -> Option<Arc<dyn Processor>>
    where
        F: Fn(Value, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ProcessorError>> + Send + 'static,
    {
        self.register(job_type, FnProcessor::new(f))
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.processors.contains_key(job_type)
    }

    /// Registered job types, sorted
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.processors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry").field("types", &self.types()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobId;
    use serde_json::json;

    #[test]
    fn test_builtins() {
        let registry = ProcessorRegistry::with_builtins();
        assert_eq!(registry.types(), vec!["echo", "fail", "sleep"]);
        assert!(registry.contains("echo"));
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn test_register_fn_and_replace() {
        let mut registry = ProcessorRegistry::new();
        assert!(registry.is_empty());
        assert!(
            registry
                .register_fn("const", |_payload, _ctx| async { Ok(json!(1)) })
                .is_none()
        );
        assert!(
            registry
                .register_fn("const", |_payload, _ctx| async { Ok(json!(2)) })
                .is_some()
        );
        assert_eq!(registry.len(), 1);

        let processor = registry.get("const").unwrap();
        let result = processor
            .process(Value::Null, JobContext::detached(JobId::from("j")))
            .await
            .unwrap();
        assert_eq!(result, json!(2));
    }
}
