//! Result printing. Exactly one JSON document goes to stdout per run.

use anyhow::Result;
use hwm_converge::{ConvergeError, FailureResult, ModuleResult};
use serde::Serialize;
use serde_json::Value;

/// What a successful run produced.
#[derive(Debug)]
pub enum Output {
    Single(ModuleResult),
    Batch(BatchOutput),
}

/// Combined result of a batch run; entries keep the input order.
#[derive(Debug, Serialize)]
pub struct BatchOutput {
    pub changed: bool,
    pub failed: bool,
    pub msg: String,
    pub results: Vec<Value>,
}

impl BatchOutput {
    pub fn new(results: Vec<Result<ModuleResult, ConvergeError>>) -> Self {
        let total = results.len();
        let changed = results
            .iter()
            .filter(|r| matches!(r, Ok(result) if result.changed))
            .count();
        let failed = results.iter().filter(|r| r.is_err()).count();

        let results = results
            .iter()
            .map(|result| match result {
                Ok(result) => serde_json::to_value(result),
                Err(e) => serde_json::to_value(FailureResult::from(e)),
            })
            .map(|value| value.unwrap_or(Value::Null))
            .collect();

        Self {
            changed: changed > 0,
            failed: failed > 0,
            msg: format!("{total} resources: {changed} changed, {failed} failed"),
            results,
        }
    }
}

/// Print a successful run's output. Returns false if any batch entry failed.
pub fn print(output: &Output) -> Result<bool> {
    let (line, ok) = match output {
        Output::Single(result) => (serde_json::to_string(result)?, true),
        Output::Batch(batch) => (serde_json::to_string(batch)?, !batch.failed),
    };
    println!("{line}");
    Ok(ok)
}

/// Failure document for an error that ended the run.
pub fn failure(err: &anyhow::Error) -> FailureResult {
    match err.downcast_ref::<ConvergeError>() {
        Some(e) => FailureResult::from(e),
        None => FailureResult {
            failed: true,
            msg: format!("{err:#}"),
            error: "invalid_arguments",
        },
    }
}

/// Print the failure document on stdout and a log line on stderr.
pub fn print_error(err: &anyhow::Error) {
    tracing::error!(error = %format!("{err:#}"), "Run failed");
    let failure = failure(err);
    match serde_json::to_string(&failure) {
        Ok(line) => println!("{line}"),
        Err(_) => println!(r#"{{"failed": true, "msg": "unprintable error"}}"#),
    }
}
