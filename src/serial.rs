//! COM1 serial sink for memory-manager diagnostics.
//!
//! The port is brought up on first use. Writers mask interrupts while
//! holding the port lock so a fault handler that logs cannot spin on a
//! lock held by the context it interrupted.

use core::fmt::Write;
use lazy_static::lazy_static;
use spin::Mutex;
use uart_16550::SerialPort;

/// I/O base of COM1.
const COM1_BASE: u16 = 0x3F8;

lazy_static! {
    static ref COM1: Mutex<SerialPort> = {
        let mut port = unsafe { SerialPort::new(COM1_BASE) };
        port.init();
        Mutex::new(port)
    };
}

/// Force the port's lazy initialisation.
pub fn init() {
    let _ = COM1.lock();
}

/// Write formatted text to COM1. Output is best effort; a failing
/// write is dropped rather than escalated from inside a logger.
pub fn write(args: core::fmt::Arguments) {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let _ = COM1.lock().write_fmt(args);
    });
}

/// Print to COM1.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::serial::write(format_args!($($arg)*)));
}

/// Print to COM1 with newline.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
