//! Operation tracing
//!
//! [`OperationLogger::run`] wraps a call in an [`OperationLog`]: caller
//! location, timing, outcome and every sub-operation dispatched through the
//! [`OperationContext`] it hands to the call. Errors and panics are recorded and
//! then passed back to the caller untouched. The finished log goes to an
//! [`OperationSink`].
//!
//! ```no_run
//! use aggregated_logging::operations::{MemoryOperationSink, OperationLogger};
//! use std::sync::Arc;
//!
//! let logger = OperationLogger::new(Arc::new(MemoryOperationSink::new()));
//! let rows: Result<usize, std::io::Error> = logger.run("load_file", |ctx| {
//!     ctx.step("file_data", "read", || std::fs::read_to_string("data.csv"))
//!         .map(|text| text.lines().count())
//! });
//! ```

pub mod dispatch;
pub mod log;
pub mod output;
pub mod registry;

pub use dispatch::{Dispatch, DispatchRequest, OperationContext, TracedDispatch};
pub use log::{OperationLog, OperationStatus, SubOperationLog, SubOperationStatus};
pub use output::{AggregatedOperationSink, MemoryOperationSink, OperationSink};
pub use registry::InstrumentationRegistry;

use crate::record::panic_detail;
use std::cell::Cell;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe, Location};
use std::sync::Arc;
use uuid::Uuid;

thread_local! {
    static CURRENT_OPERATION: Cell<Option<Uuid>> = const { Cell::new(None) };
}

/// Id of the operation running on this thread, if any
pub fn current_operation_id() -> Option<Uuid> {
    CURRENT_OPERATION.with(Cell::get)
}

/// Restores the previous operation id when dropped
struct CurrentOperationGuard {
    previous: Option<Uuid>,
}

impl CurrentOperationGuard {
    fn enter(operation_id: Uuid) -> Self {
        let previous = CURRENT_OPERATION.with(|current| current.replace(Some(operation_id)));
        Self { previous }
    }
}

impl Drop for CurrentOperationGuard {
    fn drop(&mut self) {
        CURRENT_OPERATION.with(|current| current.set(self.previous));
    }
}

/// `"<ErrorType>: <message>"`
pub fn describe_error<E: fmt::Display + ?Sized>(error: &E) -> String {
    format!("{}: {}", dispatch::short_type_name::<E>(), error)
}

/// Traces calls and hands the finished logs to a sink
#[derive(Clone)]
pub struct OperationLogger {
    sink: Arc<dyn OperationSink>,
    registry: Arc<InstrumentationRegistry>,
}

impl OperationLogger {
    pub fn new(sink: Arc<dyn OperationSink>) -> Self {
        Self {
            sink,
            registry: Arc::new(InstrumentationRegistry::new()),
        }
    }

    pub fn with_registry(mut self, registry: Arc<InstrumentationRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &InstrumentationRegistry {
        &self.registry
    }

    /// Run `f` as a traced operation named `operation_name`
    ///
    /// Operations started while another one runs on the same thread get their
    /// own independent log; the outer id is current again once they finish.
    #[track_caller]
    pub fn run<T, E, F>(&self, operation_name: &str, f: F) -> Result<T, E>
    where
        E: fmt::Display,
        F: FnOnce(&OperationContext) -> Result<T, E>,
    {
        let context = OperationContext::new(OperationLog::new(operation_name, Location::caller()));
        let outcome = {
            let _current = CurrentOperationGuard::enter(context.operation_id());
            let _entered = context.span().enter();
            catch_unwind(AssertUnwindSafe(|| f(&context)))
        };

        let (mut log, span) = context.into_parts();
        match &outcome {
            Ok(Ok(_)) => log.mark_success(),
            Ok(Err(e)) => log.mark_error(describe_error(e)),
            Err(payload) => log.mark_error(format!("panic: {}", panic_detail(payload.as_ref()))),
        }
        span.record_completion(log.status == OperationStatus::Success, log.sub_operations.len());
        self.sink.record_operation(&log);

        match outcome {
            Ok(result) => result,
            Err(payload) => resume_unwind(payload),
        }
    }

    /// Trace the call only if `(component, method)` is registered
    #[track_caller]
    pub fn instrument<T, E, F>(&self, component: &str, method: &str, f: F) -> Result<T, E>
    where
        E: fmt::Display,
        F: FnOnce(Option<&OperationContext>) -> Result<T, E>,
    {
        if self.registry.is_registered(component, method) {
            self.run(&format!("{component}.{method}"), |context| f(Some(context)))
        } else {
            f(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct ValueError(String);

    impl fmt::Display for ValueError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    fn logger() -> (Arc<MemoryOperationSink>, OperationLogger) {
        let sink = Arc::new(MemoryOperationSink::new());
        (sink.clone(), OperationLogger::new(sink))
    }

    #[test]
    fn test_success_is_recorded() {
        let (sink, logger) = logger();
        let value: Result<u32, ValueError> = logger.run("compute", |_| Ok(7));
        assert_eq!(value.unwrap(), 7);

        let logs = sink.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, OperationStatus::Success);
        assert!(logs[0].source_file.ends_with("mod.rs"));
        assert!(logs[0].end_time.is_some());
    }

    #[test]
    fn test_error_is_recorded_and_returned() {
        let (sink, logger) = logger();
        let result: Result<(), ValueError> = logger.run("compute", |_| Err(ValueError("x".to_string())));
        assert_eq!(result.unwrap_err().0, "x");

        let logs = sink.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, OperationStatus::Error);
        assert_eq!(logs[0].exception_info.as_deref(), Some("ValueError: x"));
    }

    #[test]
    fn test_panic_is_recorded_and_resumed() {
        let (sink, logger) = logger();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _: Result<(), ValueError> = logger.run("explode", |_| panic!("kaboom"));
        }));
        assert!(outcome.is_err());
        assert_eq!(sink.logs()[0].exception_info.as_deref(), Some("panic: kaboom"));
        assert_eq!(current_operation_id(), None);
    }

    #[test]
    fn test_current_operation_id_nests() {
        let (sink, logger) = logger();
        let result: Result<(), ValueError> = logger.run("outer", |outer| {
            assert_eq!(current_operation_id(), Some(outer.operation_id()));
            let inner: Result<(), ValueError> = logger.run("inner", |inner| {
                assert_eq!(current_operation_id(), Some(inner.operation_id()));
                Ok(())
            });
            inner?;
            assert_eq!(current_operation_id(), Some(outer.operation_id()));
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(current_operation_id(), None);

        let names: Vec<String> = sink.logs().into_iter().map(|log| log.operation_name).collect();
        assert_eq!(names, vec!["inner", "outer"]);
    }

    #[test]
    fn test_instrument_respects_registry() {
        let (sink, logger) = logger();
        logger.registry().register("FileData", "load_file");

        let traced: Result<bool, ValueError> = logger.instrument("FileData", "load_file", |ctx| Ok(ctx.is_some()));
        let untraced: Result<bool, ValueError> = logger.instrument("FileData", "save_file", |ctx| Ok(ctx.is_some()));
        assert!(traced.unwrap());
        assert!(!untraced.unwrap());

        let logs = sink.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].operation_name, "FileData.load_file");
    }

    #[test]
    fn test_describe_error_uses_short_type_name() {
        let error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(describe_error(&error), "Error: gone");
        assert_eq!(describe_error(&ValueError("x".to_string())), "ValueError: x");
    }
}
