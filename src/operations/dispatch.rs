//! Traced inter-component dispatch
//!
//! Components that talk to each other through a request/response call
//! implement [`Dispatch`]. Wrapping one with [`OperationContext::traced`]
//! records every call as a sub-operation of the running operation; nothing is
//! swapped out at runtime, so there is nothing to restore afterwards.

use super::log::{OperationLog, SubOperationLog};
use crate::logging::spans::OperationSpan;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::fmt;

/// One request sent to a component
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub target: String,
    pub operation: String,
    pub params: Map<String, Value>,
}

impl DispatchRequest {
    pub fn new(target: &str, operation: &str) -> Self {
        Self {
            target: target.to_string(),
            operation: operation.to_string(),
            params: Map::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// Request/response entry point of a component
pub trait Dispatch {
    type Error: fmt::Display;

    fn dispatch(&self, request: DispatchRequest) -> Result<Value, Self::Error>;
}

impl<D: Dispatch + ?Sized> Dispatch for &D {
    type Error = D::Error;

    fn dispatch(&self, request: DispatchRequest) -> Result<Value, Self::Error> {
        (**self).dispatch(request)
    }
}

/// Kind of a response payload as shown in traces
pub fn response_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "none",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Failure reported inside an otherwise successful response
///
/// A response object with `"success": false` or a non-null `"error"` entry
/// counts as a failed step.
pub fn response_failure(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    match object.get("error") {
        Some(Value::Null) | None => {}
        Some(Value::String(text)) => return Some(text.clone()),
        Some(other) => return Some(other.to_string()),
    }
    if object.get("success") == Some(&Value::Bool(false)) {
        return Some("request reported failure".to_string());
    }
    None
}

pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Handle given to a running operation
pub struct OperationContext {
    log: RefCell<OperationLog>,
    span: OperationSpan,
}

impl OperationContext {
    pub(crate) fn new(log: OperationLog) -> Self {
        let span = OperationSpan::new(&log.operation_name, log.operation_id);
        Self {
            log: RefCell::new(log),
            span,
        }
    }

    pub(crate) fn span(&self) -> &OperationSpan {
        &self.span
    }

    pub(crate) fn into_parts(self) -> (OperationLog, OperationSpan) {
        (self.log.into_inner(), self.span)
    }

    pub fn operation_id(&self) -> uuid::Uuid {
        self.log.borrow().operation_id
    }

    pub fn operation_name(&self) -> String {
        self.log.borrow().operation_name.clone()
    }

    pub fn sub_operation_count(&self) -> usize {
        self.log.borrow().sub_operations.len()
    }

    /// Copy of the trace so far
    pub fn snapshot(&self) -> OperationLog {
        self.log.borrow().clone()
    }

    fn begin(&self, operation: &str, target: &str, params: Map<String, Value>) -> usize {
        self.log
            .borrow_mut()
            .add_sub_operation(SubOperationLog::new(operation, target, params))
    }

    fn finish(&self, index: usize, outcome: Result<&str, &str>) {
        let mut log = self.log.borrow_mut();
        let sub = &mut log.sub_operations[index];
        match outcome {
            Ok(response_type) => sub.mark_completed(response_type),
            Err(details) => sub.mark_error(details),
        }
        self.span
            .record_sub_operation(sub.step_number, &sub.operation_name, &sub.target, outcome.is_ok());
    }

    /// Send `request` to `component`, recording it as the next step
    pub fn dispatch<D: Dispatch + ?Sized>(&self, component: &D, request: DispatchRequest) -> Result<Value, D::Error> {
        let index = self.begin(&request.operation, &request.target, request.params.clone());
        let result = component.dispatch(request);
        match &result {
            Ok(value) => match response_failure(value) {
                Some(details) => self.finish(index, Err(details.as_str())),
                None => self.finish(index, Ok(response_type(value))),
            },
            Err(e) => self.finish(index, Err(e.to_string().as_str())),
        }
        result
    }

    /// Record an arbitrary fallible call as the next step
    pub fn step<T, E, F>(&self, target: &str, operation: &str, f: F) -> Result<T, E>
    where
        E: fmt::Display,
        F: FnOnce() -> Result<T, E>,
    {
        let index = self.begin(operation, target, Map::new());
        let result = f();
        match &result {
            Ok(_) => self.finish(index, Ok(short_type_name::<T>())),
            Err(e) => self.finish(index, Err(e.to_string().as_str())),
        }
        result
    }

    /// Wrap `component` so every dispatch through it is traced
    pub fn traced<'a, D: Dispatch + ?Sized>(&'a self, component: &'a D) -> TracedDispatch<'a, D> {
        TracedDispatch {
            context: self,
            inner: component,
        }
    }
}

/// A component whose dispatches are recorded in an [`OperationContext`]
pub struct TracedDispatch<'a, D: ?Sized> {
    context: &'a OperationContext,
    inner: &'a D,
}

impl<D: Dispatch + ?Sized> Dispatch for TracedDispatch<'_, D> {
    type Error = D::Error;

    fn dispatch(&self, request: DispatchRequest) -> Result<Value, Self::Error> {
        self.context.dispatch(self.inner, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::log::SubOperationStatus;
    use serde_json::json;
    use std::panic::Location;

    struct FileData;

    impl Dispatch for FileData {
        type Error = String;

        fn dispatch(&self, request: DispatchRequest) -> Result<Value, String> {
            match request.operation.as_str() {
                "load" => Ok(json!({ "rows": 3 })),
                "missing" => Ok(json!({ "success": false })),
                _ => Err(format!("unknown operation {}", request.operation)),
            }
        }
    }

    #[test]
    fn test_traced_dispatch_records_steps() {
        let context = OperationContext::new(OperationLog::new("import", Location::caller()));
        let traced = context.traced(&FileData);

        traced.dispatch(DispatchRequest::new("file_data", "load").param("path", "a.csv")).unwrap();
        traced.dispatch(DispatchRequest::new("file_data", "missing")).unwrap();
        assert!(traced.dispatch(DispatchRequest::new("file_data", "explode")).is_err());

        let log = context.snapshot();
        assert_eq!(log.sub_operations.len(), 3);
        assert_eq!(log.sub_operations[0].response_data_type.as_deref(), Some("dict"));
        assert_eq!(log.sub_operations[0].request_kwargs["path"], "a.csv");
        assert_eq!(log.sub_operations[1].status, SubOperationStatus::Error);
        assert_eq!(
            log.sub_operations[2].error_details.as_deref(),
            Some("unknown operation explode")
        );
    }

    #[test]
    fn test_step_records_type_name() {
        let context = OperationContext::new(OperationLog::new("compute", Location::caller()));
        let value: Result<Vec<f64>, String> = context.step("calculation", "fit", || Ok(vec![1.0]));
        assert!(value.is_ok());
        assert_eq!(context.snapshot().sub_operations[0].response_data_type.as_deref(), Some("Vec"));
    }

    #[test]
    fn test_response_failure_detection() {
        assert_eq!(response_failure(&json!({ "error": "boom" })).as_deref(), Some("boom"));
        assert!(response_failure(&json!({ "error": null, "success": true })).is_none());
        assert!(response_failure(&json!([1, 2])).is_none());
    }
}
