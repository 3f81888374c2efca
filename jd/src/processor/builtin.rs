//! Builtin processors used by `jd run`

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use super::{JobContext, Processor, ProcessorError};
use crate::domain::LogLevel;

/// Returns its payload unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoProcessor;

#[async_trait]
impl Processor for EchoProcessor {
    async fn process(&self, payload: Value, ctx: JobContext) -> Result<Value, ProcessorError> {
        debug!(job_id = %ctx.job_id(), "EchoProcessor::process: called");
        Ok(payload)
    }
}

#[derive(Debug, Deserialize)]
struct SleepPayload {
    ms: u64,
    #[serde(default = "default_steps")]
    steps: u32,
}

fn default_steps() -> u32 {
    10
}

/// Sleeps `payload.ms` in `payload.steps` slices, reporting progress after each
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepProcessor;

#[async_trait]
impl Processor for SleepProcessor {
    async fn process(&self, payload: Value, ctx: JobContext) -> Result<Value, ProcessorError> {
        let SleepPayload { ms, steps } = serde_json::from_value(payload)?;
        let steps = steps.max(1);
        debug!(job_id = %ctx.job_id(), ms, steps, "SleepProcessor::process: called");

        let slice = Duration::from_millis(ms / u64::from(steps));
        for step in 1..=steps {
            tokio::select! {
                _ = ctx.cancelled() => {
                    ctx.log(format!("Interrupted at step {}/{}", step, steps), LogLevel::Warn).await;
                    return Err(ProcessorError::fatal("cancelled"));
                }
                _ = tokio::time::sleep(slice) => {}
            }
            ctx.update_progress(step_percent(step, steps), format!("step {}/{}", step, steps)).await;
        }
        Ok(json!({ "slept_ms": ms }))
    }
}

/// Percent done after `step` of `steps`, without overflowing large step counts
fn step_percent(step: u32, steps: u32) -> u8 {
    (u64::from(step) * 100 / u64::from(steps.max(1))).min(100) as u8
}

#[derive(Debug, Deserialize)]
struct FailPayload {
    #[serde(default)]
    retryable: bool,
    #[serde(default = "default_fail_message")]
    message: String,
}

fn default_fail_message() -> String {
    "failed on request".to_string()
}

/// Always fails; `{"retryable": true}` exercises the retry path
#[derive(Debug, Default, Clone, Copy)]
pub struct FailProcessor;

#[async_trait]
impl Processor for FailProcessor {
    async fn process(&self, payload: Value, ctx: JobContext) -> Result<Value, ProcessorError> {
        let payload = if payload.is_null() { json!({}) } else { payload };
        let FailPayload { retryable, message } = serde_json::from_value(payload)?;
        debug!(job_id = %ctx.job_id(), retryable, "FailProcessor::process: called");
        if retryable {
            Err(ProcessorError::Retryable(message))
        } else {
            Err(ProcessorError::Fatal(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobId;

    fn ctx() -> JobContext {
        JobContext::detached(JobId::from("builtin"))
    }

    #[tokio::test]
    async fn test_echo() {
        let payload = json!({"a": [1, 2, 3]});
        assert_eq!(EchoProcessor.process(payload.clone(), ctx()).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_sleep_completes() {
        let result = SleepProcessor
            .process(json!({"ms": 20, "steps": 4}), ctx())
            .await
            .unwrap();
        assert_eq!(result, json!({"slept_ms": 20}));
    }

    #[test]
    fn test_step_percent_large_step_counts() {
        assert_eq!(step_percent(1, 4), 25);
        assert_eq!(step_percent(4, 4), 100);
        assert_eq!(step_percent(50_000_000, 100_000_000), 50);
        assert_eq!(step_percent(u32::MAX, u32::MAX), 100);
    }

    #[tokio::test]
    async fn test_sleep_honors_cancellation() {
        let ctx = ctx();
        ctx.cancellation_token().cancel();
        let err = SleepProcessor
            .process(json!({"ms": 60_000}), ctx)
            .await
            .unwrap_err();
        assert_eq!(err, ProcessorError::fatal("cancelled"));
    }

    #[tokio::test]
    async fn test_sleep_bad_payload_is_fatal() {
        let err = SleepProcessor.process(json!({"ms": "soon"}), ctx()).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_fail() {
        let err = FailProcessor.process(Value::Null, ctx()).await.unwrap_err();
        assert_eq!(err, ProcessorError::fatal("failed on request"));

        let err = FailProcessor
            .process(json!({"retryable": true, "message": "flaky"}), ctx())
            .await
            .unwrap_err();
        assert_eq!(err, ProcessorError::retryable("flaky"));
    }
}
