//! # Logging
//!
//! Tracing subscriber driven by the device log verbosity mask.
//!
//! | Bit | Name    | Sink                                     |
//! |-----|---------|------------------------------------------|
//! | 1   | `TRACE` | formatted output on stderr               |
//! | 2   | `DEBUG` | `debug.log` in the storage root          |
//! | 4   | `UART`  | mirrored to the serial command console   |
//!
//! The mask is process-wide and can change at run time (`loglevel` command);
//! every sink consults it per event. `RUST_LOG` still sets the level filter.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;
use tracing::Metadata;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{dynamic_filter_fn, DynFilterFn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Console (stderr) output
pub const TRACE: u8 = 1;

/// Debug log file
pub const DEBUG: u8 = 2;

/// Serial console mirror
pub const UART: u8 = 4;

/// Every sink
pub const ALL: u8 = TRACE | DEBUG | UART;

/// Debug log file name in the storage root
pub const DEBUG_LOG_FILE: &str = "debug.log";

/// Boot on full logging until the device config is loaded
static LOG_MASK: AtomicU8 = AtomicU8::new(ALL);

/// Sets the active log sinks.
pub fn set_mask(mask: u8) {
    LOG_MASK.store(mask & ALL, Ordering::Relaxed);
}

/// Active log sinks.
pub fn mask() -> u8 {
    LOG_MASK.load(Ordering::Relaxed)
}

/// Keeps the debug log writer alive. Drop flushes pending lines.
pub struct LogGuard {
    _file: WorkerGuard,
}

/// Installs the global subscriber.
///
/// # Arguments
///
/// * `root` - Directory for `debug.log` (must exist)
/// * `console` - Serial console line sink, if the console is enabled
pub fn init(root: &Path, console: Option<mpsc::UnboundedSender<Vec<u8>>>) -> LogGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(mask_filter(&LOG_MASK, TRACE));

    let (file_writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(root, DEBUG_LOG_FILE));
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(mask_filter(&LOG_MASK, DEBUG));

    let uart_layer = console.map(|tx| uart_layer(tx, &LOG_MASK));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .with(uart_layer)
        .init();

    LogGuard { _file: guard }
}

/// Per-event filter on one mask bit. Dynamic so call sites never cache an
/// interest across `set_mask` calls.
fn mask_filter<S>(mask: &'static AtomicU8, bit: u8) -> DynFilterFn<S, impl Fn(&Metadata<'_>, &Context<'_, S>) -> bool> {
    dynamic_filter_fn(move |_, _| mask.load(Ordering::Relaxed) & bit != 0)
}

fn uart_layer<S>(tx: mpsc::UnboundedSender<Vec<u8>>, mask: &'static AtomicU8) -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .with_writer(UartWriter { tx })
        .with_filter(mask_filter(mask, UART))
}

/// Sends each formatted event to the serial console writer task.
#[derive(Clone)]
struct UartWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

struct UartLine {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl<'a> MakeWriter<'a> for UartWriter {
    type Writer = UartLine;

    fn make_writer(&'a self) -> Self::Writer {
        UartLine { tx: self.tx.clone() }
    }
}

impl io::Write for UartLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // A closed console just drops the line
        let _ = self.tx.send(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Escapes a string for single-line logging.
///
/// Newlines, tabs and other control characters are escaped and very long input
/// is truncated.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Dispatch;

    #[test]
    fn test_escape_log() {
        assert_eq!(escape_log("apn a\nb\r\tc"), "apn a\\nb\\r\\tc");
        assert_eq!(escape_log("x\u{1}"), "x\\x01");
        assert!(escape_log(&"a".repeat(400)).ends_with('…'));
    }

    #[test]
    fn test_set_mask_ignores_unknown_bits() {
        set_mask(0xFF);
        assert_eq!(mask(), ALL);
        set_mask(ALL);
    }

    #[test]
    fn test_uart_layer_follows_mask() {
        static TEST_MASK: AtomicU8 = AtomicU8::new(UART);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscriber = tracing_subscriber::registry().with(uart_layer(tx, &TEST_MASK));
        let dispatch = Dispatch::new(subscriber);

        // One call site for every line
        fn emit(n: u32) {
            tracing::info!("line {}", n);
        }

        tracing::dispatcher::with_default(&dispatch, || {
            emit(1);
            TEST_MASK.store(TRACE, Ordering::Relaxed);
            emit(2);
            TEST_MASK.store(UART, Ordering::Relaxed);
            emit(3);
        });

        let line = String::from_utf8(rx.try_recv().unwrap()).unwrap();
        assert!(line.contains("line 1"));
        assert!(line.ends_with('\n'));
        let line = String::from_utf8(rx.try_recv().unwrap()).unwrap();
        assert!(line.contains("line 3"));
        assert!(rx.try_recv().is_err());
    }
}
