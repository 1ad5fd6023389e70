//! Individual Step Execution
//!
//! Pass and Task steps. Both are pure with respect to the context: they
//! return the next context and leave the current one untouched, so a failure
//! never corrupts the caller's state.

use log::{debug, warn};
use serde_json::Value;

use crate::adapter::StepAdapter;
use crate::workflow::model::{PassStep, TaskStep};

use super::outcome::StepError;

/// Executes a Pass step.
///
/// Without parameters the context passes through unchanged.
pub fn run_pass(step: &PassStep, context: &Value) -> Result<Value, StepError> {
    match &step.parameters {
        Some(payload) => {
            let value = payload.resolve(context)?;
            Ok(step.result_path.apply(context, value)?)
        }
        None => Ok(context.clone()),
    }
}

/// Executes a Task step.
///
/// # Process
///
/// 1. Build the adapter input from `parameters`, or use the whole context
/// 2. Invoke the adapter, retrying only when a retry policy is configured
/// 3. Reshape the output with `result_selector`, if any
/// 4. Merge the result at `result_path`
pub async fn run_task(
    adapter: &dyn StepAdapter,
    step: &TaskStep,
    context: &Value,
) -> Result<Value, StepError> {
    let input = match &step.parameters {
        Some(payload) => payload.resolve(context)?,
        None => context.clone(),
    };

    let output = invoke(adapter, step, input).await?;

    let result = match &step.result_selector {
        Some(selector) => selector.resolve(&output)?,
        None => output,
    };

    Ok(step.result_path.apply(context, result)?)
}

async fn invoke(adapter: &dyn StepAdapter, step: &TaskStep, input: Value) -> Result<Value, StepError> {
    let max_attempts = step.retry.as_ref().map(|r| r.max_attempts.max(1)).unwrap_or(1);
    let mut attempt = 1;

    loop {
        match adapter.invoke(&step.adapter, input.clone()).await {
            Ok(output) => {
                debug!("Step '{}' adapter '{}' succeeded", step.name, step.adapter);
                return Ok(output);
            }
            Err(source) => {
                let retry = match &step.retry {
                    Some(retry) if attempt < max_attempts => retry,
                    _ => {
                        return Err(StepError::Adapter {
                            adapter: step.adapter.clone(),
                            source,
                        })
                    }
                };

                let delay = retry.delay_after(attempt);
                warn!(
                    "Step '{}' attempt {}/{} failed: {} (retrying in {} ms)",
                    step.name,
                    attempt,
                    max_attempts,
                    source,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
