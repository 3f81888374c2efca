//! Processor trait definition

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;

use super::context::JobContext;
use super::error::ProcessorError;

/// Executes jobs of one type
#[async_trait]
pub trait Processor: Send + Sync {
    /// Run one attempt; the returned value becomes the job result
    async fn process(&self, payload: Value, ctx: JobContext) -> Result<Value, ProcessorError>;
}

/// Adapter for closures returning futures
pub struct FnProcessor<F> {
    f: F,
}

impl<F> FnProcessor<F> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(Value, JobContext) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Value, ProcessorError>> + Send + 'static,
    {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(Value, JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ProcessorError>> + Send + 'static,
{
    async fn process(&self, payload: Value, ctx: JobContext) -> Result<Value, ProcessorError> {
        (self.f)(payload, ctx).await
    }
}
