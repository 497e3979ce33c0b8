//! Traced multi-step operation narration
//!
//! An operation moves `Open -> {Completed, Failed}`; exactly one terminal
//! record is emitted. Terminal methods are idempotent: a repeat call logs a
//! WARN and returns the duration recorded the first time. Dropping an
//! operation that was never terminated logs a WARN so abandoned work is
//! visible in the stream.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};

use crate::logger::{generate_trace_id, StructuredLogger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationState {
    Open,
    Completed(u64),
    Failed(u64),
}

impl OperationState {
    fn duration(self) -> Option<u64> {
        match self {
            OperationState::Open => None,
            OperationState::Completed(ms) | OperationState::Failed(ms) => Some(ms),
        }
    }
}

pub struct OperationLogger {
    logger: Arc<StructuredLogger>,
    trace_id: String,
    module: String,
    operation: String,
    start: Instant,
    context: Map<String, Value>,
    state: OperationState,
}

impl OperationLogger {
    pub fn new(
        logger: Arc<StructuredLogger>,
        module: &str,
        operation: &str,
        context: Option<Value>,
    ) -> Self {
        let trace_id = generate_trace_id();
        let context = match context {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        let mut started = base_context(module, operation, &trace_id);
        merge(&mut started, &context);
        logger.info(&format!("{operation} started"), Some(Value::Object(started)));

        Self {
            logger,
            trace_id,
            module: module.to_string(),
            operation: operation.to_string(),
            start: Instant::now(),
            context,
            state: OperationState::Open,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Merge additional keys into the accumulator attached to the terminal
    /// record.
    pub fn add_context(&mut self, context: Value) {
        if let Value::Object(map) = context {
            merge(&mut self.context, &map);
        }
    }

    /// Narrate an intermediate step at INFO.
    pub fn log_step(&self, step: &str, data: Option<Value>) {
        let mut ctx = base_context(&self.module, &self.operation, &self.trace_id);
        ctx.insert("step".into(), json!(step));
        if let Some(data) = data {
            ctx.insert("data".into(), data);
        }
        self.logger.info(
            &format!("{} - {step}", self.operation),
            Some(Value::Object(ctx)),
        );
    }

    /// Emit the success terminal record; returns the elapsed milliseconds.
    pub fn complete(&mut self, result: Option<Value>) -> u64 {
        if let Some(ms) = self.already_terminated() {
            return ms;
        }

        let duration = self.start.elapsed().as_millis() as u64;
        let mut ctx = base_context(&self.module, &self.operation, &self.trace_id);
        ctx.insert("duration".into(), json!(duration));
        ctx.insert(
            "result".into(),
            json!(if result.is_some() { "success" } else { "done" }),
        );
        if let Some(result) = result {
            ctx.insert("data".into(), result);
        }
        merge(&mut ctx, &self.context);

        self.logger.info(
            &format!("{} completed", self.operation),
            Some(Value::Object(ctx)),
        );
        self.state = OperationState::Completed(duration);
        duration
    }

    /// Emit the failure terminal record; returns the elapsed milliseconds.
    pub fn fail(&mut self, error: &dyn std::fmt::Display) -> u64 {
        if let Some(ms) = self.already_terminated() {
            return ms;
        }

        let duration = self.start.elapsed().as_millis() as u64;
        let mut ctx = base_context(&self.module, &self.operation, &self.trace_id);
        ctx.insert("duration".into(), json!(duration));
        ctx.insert("error".into(), json!(error.to_string()));
        merge(&mut ctx, &self.context);

        self.logger.error(
            &format!("{} failed", self.operation),
            Some(Value::Object(ctx)),
        );
        self.state = OperationState::Failed(duration);
        duration
    }

    fn already_terminated(&self) -> Option<u64> {
        let ms = self.state.duration()?;
        self.logger.warn(
            "Operation already terminated",
            Some(Value::Object(base_context(
                &self.module,
                &self.operation,
                &self.trace_id,
            ))),
        );
        Some(ms)
    }
}

impl Drop for OperationLogger {
    fn drop(&mut self) {
        if self.state == OperationState::Open {
            self.logger.warn(
                "Operation never terminated",
                Some(Value::Object(base_context(
                    &self.module,
                    &self.operation,
                    &self.trace_id,
                ))),
            );
        }
    }
}

fn base_context(module: &str, operation: &str, trace_id: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("module".into(), json!(module));
    map.insert("operation".into(), json!(operation));
    map.insert("traceId".into(), json!(trace_id));
    map
}

fn merge(target: &mut Map<String, Value>, extra: &Map<String, Value>) {
    for (key, value) in extra {
        target.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;
    use std::time::Duration;

    fn quiet_logger() -> Arc<StructuredLogger> {
        Arc::new(StructuredLogger::with_settings(
            LogLevel::Fatal,
            "logs",
            false,
            false,
        ))
    }

    #[test]
    fn complete_reports_nonnegative_elapsed_duration() {
        let mut op = OperationLogger::new(quiet_logger(), "Orders", "create order", None);
        std::thread::sleep(Duration::from_millis(5));
        let duration = op.complete(Some(json!({"orderId": 7})));
        assert!(duration >= 5);
    }

    #[test]
    fn fail_reports_nonnegative_elapsed_duration() {
        let mut op = OperationLogger::new(quiet_logger(), "Orders", "create order", None);
        let duration = op.fail(&"disk full");
        assert!(duration < 1000);
    }

    #[test]
    fn termination_is_idempotent() {
        let mut op = OperationLogger::new(quiet_logger(), "Menu", "load menu", None);
        std::thread::sleep(Duration::from_millis(3));
        let first = op.complete(None);

        // A second terminal call must not re-measure or flip the outcome.
        let second = op.fail(&"late failure");
        assert_eq!(first, second);
        let third = op.complete(None);
        assert_eq!(first, third);
    }

    #[test]
    fn steps_and_context_do_not_terminate() {
        let mut op = OperationLogger::new(
            quiet_logger(),
            "Members",
            "update roster",
            Some(json!({"memberCount": 4})),
        );
        op.log_step("validated payload", Some(json!({"fields": 3})));
        op.add_context(json!({"updated": true}));
        let duration = op.complete(None);
        assert!(duration < 1000);
    }

    #[test]
    fn trace_id_is_stable_for_operation_lifetime() {
        let mut op = OperationLogger::new(quiet_logger(), "Menu", "load menu", None);
        let id = op.trace_id().to_string();
        op.log_step("step", None);
        op.complete(None);
        assert_eq!(op.trace_id(), id);
    }
}
