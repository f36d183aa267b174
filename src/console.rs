//! Console output for the memory subsystem
//!
//! Kernel messages are kept in a bounded log buffer and forwarded to an
//! optional sink. A bare-metal build registers its UART or VGA writer as
//! the sink; hosted builds and tests just read the buffer back.

use core::fmt::{self, Write};
use heapless::String;
use spin::Mutex;

/// Bytes retained in the kernel log buffer
pub const LOG_CAPACITY: usize = 4096;

/// Output hook receiving every formatted fragment
pub type Sink = fn(&str);

/// Console writer interface
pub struct Console {
    buffer: String<LOG_CAPACITY>,
    sink: Option<Sink>,
}

impl Console {
    /// Create a new console instance
    pub const fn new() -> Self {
        Console {
            buffer: String::new(),
            sink: None,
        }
    }

    /// Route output to `sink` in addition to the log buffer
    pub fn set_sink(&mut self, sink: Option<Sink>) {
        self.sink = sink;
    }

    /// Write a string to the console
    pub fn write_str(&mut self, s: &str) {
        if let Some(sink) = self.sink {
            sink(s);
        }
        for ch in s.chars() {
            if self.buffer.push(ch).is_err() {
                // Buffer full: start over rather than block the kernel
                self.buffer.clear();
                let _ = self.buffer.push(ch);
            }
        }
    }

    /// Current log buffer contents
    pub fn contents(&self) -> &str {
        self.buffer.as_str()
    }

    /// Clear the log buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_str(s);
        Ok(())
    }
}

/// Global console instance
static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// Register the output sink for the global console
pub fn set_sink(sink: Option<Sink>) {
    CONSOLE.lock().set_sink(sink);
}

/// Run `f` over the global log buffer
pub fn with_log<R>(f: impl FnOnce(&str) -> R) -> R {
    f(CONSOLE.lock().contents())
}

/// Print formatted text to console
pub fn print(args: fmt::Arguments) {
    // Console writes cannot fail
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Print macro for kernel use
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::print(format_args!($($arg)*));
    };
}

/// Print with newline macro
#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n");
    };
    ($($arg:tt)*) => {
        $crate::console::print(format_args!("{}\n", format_args!($($arg)*)))
    };
}
