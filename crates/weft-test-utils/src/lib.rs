//! Shared test utilities for weft crates: mock components and log capture.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

use weft_core::component::{from_async_fn, from_fn, input_f64};
use weft_core::{Component, ComponentError, ErrorCode, Inputs};

/// Counts component invocations. Clones share the count.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// A component returning `output` and counting its invocations.
pub fn counting_component<I, S>(counter: &CallCounter, required: I, output: Value) -> Arc<dyn Component>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let counter = counter.clone();
    from_fn(required, move |_inputs| {
        counter.hit();
        Ok(output.clone())
    })
}

/// Like [`counting_component`], but takes `delay` to produce its output.
pub fn sleeping_component(counter: &CallCounter, delay: Duration, output: Value) -> Arc<dyn Component> {
    let counter = counter.clone();
    from_async_fn(Vec::<String>::new(), move |_inputs: Inputs| {
        let counter = counter.clone();
        let output = output.clone();
        async move {
            counter.hit();
            tokio::time::sleep(delay).await;
            Ok(output)
        }
    })
}

/// No inputs; returns `{"a": 1.2, "b": 2.5}`.
pub fn provide_two_values() -> Arc<dyn Component> {
    from_fn(Vec::<String>::new(), |_| Ok(json!({"a": 1.2, "b": 2.5})))
}

/// Requires `c` and `d`; returns `{"sum": c + d}`.
pub fn sum_component() -> Arc<dyn Component> {
    from_fn(["c", "d"], |inputs| {
        Ok(json!({"sum": input_f64(&inputs, "c")? + input_f64(&inputs, "d")?}))
    })
}

/// Always raises a component error with `error_code`.
pub fn failing_component(message: &str, error_code: impl Into<ErrorCode>) -> Arc<dyn Component> {
    let message = message.to_string();
    let error_code = error_code.into();
    from_fn(Vec::<String>::new(), move |_| {
        Err(ComponentError::Raised {
            message: message.clone(),
            error_code: error_code.clone(),
            extra_information: None,
        })
    })
}

/// Panics with `message` when called.
pub fn panicking_component(message: &str) -> Arc<dyn Component> {
    let message = message.to_string();
    from_fn(Vec::<String>::new(), move |_| -> Result<Value, ComponentError> {
        panic!("{}", message)
    })
}

/// In-memory log sink filled by [`capture_logs`].
#[derive(Debug, Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Capture all log output of the current thread until the guard is dropped.
///
/// Works with `#[tokio::test]`, whose runtime runs every task on the test
/// thread.
pub fn capture_logs() -> (LogBuffer, DefaultGuard) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buffer, guard)
}
