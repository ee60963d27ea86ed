//! OutputCapture - scoped redirection of build diagnostics
//!
//! Two sinks are redirected for the duration of a build:
//!
//! - the raw text sink behind [`print`], which build backends use for compiler
//!   output they relay verbatim
//! - the thread's tracing dispatcher, so `info!`/`warn!`/`error!` events raised
//!   while building land in the same buffer, rendered message-only
//!
//! Both are restored by guards, so the previous sinks come back on every exit
//! path including unwinding.

use std::cell::RefCell;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tracing::debug;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;

thread_local! {
    static SINK: RefCell<Option<CaptureBuffer>> = const { RefCell::new(None) };
}

/// Write diagnostic text to the active capture, or stderr when nothing captures
pub fn print(text: &str) {
    let captured = SINK.with(|sink| match sink.borrow().as_ref() {
        Some(buffer) => {
            buffer.append(text.as_bytes());
            true
        }
        None => false,
    });

    if !captured {
        let mut stderr = io::stderr().lock();
        let _ = stderr.write_all(text.as_bytes());
        let _ = stderr.flush();
    }
}

/// Whether the current thread is inside [`OutputCapture::wrap`]
pub fn is_capturing() -> bool {
    SINK.with(|sink| sink.borrow().is_some())
}

/// Shared byte buffer that also acts as a tracing writer
#[derive(Clone, Default)]
struct CaptureBuffer(Arc<Mutex<Vec<u8>>>);

impl CaptureBuffer {
    fn append(&self, bytes: &[u8]) {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(bytes);
    }

    fn take_string(&self) -> String {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        let bytes = std::mem::take(&mut *buf);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.append(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CaptureBuffer {
    type Writer = CaptureBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Restores the previous raw sink when dropped
struct SinkGuard {
    previous: Option<CaptureBuffer>,
}

impl SinkGuard {
    fn install(buffer: CaptureBuffer) -> Self {
        let previous = SINK.with(|sink| sink.borrow_mut().replace(buffer));
        Self { previous }
    }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        SINK.with(|sink| *sink.borrow_mut() = previous);
    }
}

/// Redirects diagnostic output produced by a closure into a private buffer
pub struct OutputCapture;

impl OutputCapture {
    /// Run `f` with diagnostics captured, returning its value and the text
    pub fn wrap<F, T>(f: F) -> (T, String)
    where
        F: FnOnce() -> T,
    {
        debug!("OutputCapture::wrap: called");
        let buffer = CaptureBuffer::default();

        let subscriber = tracing_subscriber::fmt()
            .with_writer(buffer.clone())
            .with_ansi(false)
            .without_time()
            .with_level(false)
            .with_target(false)
            .with_max_level(LevelFilter::INFO)
            .finish();

        let value = {
            let _sink = SinkGuard::install(buffer.clone());
            tracing::subscriber::with_default(subscriber, f)
        };

        let text = buffer.take_string();
        debug!(captured_len = text.len(), "OutputCapture::wrap: restored sinks");
        (value, text)
    }
}
