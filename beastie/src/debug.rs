//! Debug logging for boot image diagnostics.
//!
//! A process-wide flag set once at startup from `-d`/`-D`; the
//! [`dprintln!`] macro prints only when it is enabled.

use std::sync::atomic::{AtomicBool, Ordering};

/// Global debug flag, set once at startup.
static DEBUG: AtomicBool = AtomicBool::new(false);

/// Initialize the debug flag for the current process.
pub fn init(debug: bool) {
    DEBUG.store(debug, Ordering::Relaxed);
}

/// Returns `true` if debug output is enabled.
pub fn is_debug() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

/// Print a message only when debug mode is enabled.
///
/// Usage mirrors `println!`:
/// ```ignore
/// dprintln!("boot_howto={:#x}", howto);
/// ```
macro_rules! dprintln {
    ($($arg:tt)*) => {
        if $crate::debug::is_debug() {
            println!($($arg)*);
        }
    };
}

pub(crate) use dprintln;

/// Hexdump a buffer, eight bytes per line, under a heading.
pub fn print_buffer(bytes: &[u8], name: &str) {
    println!("[{name}]");
    for (i, chunk) in bytes.chunks(8).enumerate() {
        let mut line = format!("[{:016x}] ", i * 8);
        for (j, b) in chunk.iter().enumerate() {
            if j == 4 {
                line.push(' ');
            }
            line.push_str(&format!(" {b:02x}"));
        }
        println!("{line}");
    }
}
