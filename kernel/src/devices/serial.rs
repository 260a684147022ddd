//! COM1 output for log lines and debug prints.

use core::fmt::{self, Write};

use lazy_static::lazy_static;
use spin::Mutex;
use uart_16550::SerialPort;

use crate::constants::ports::SERIAL_PORT;

lazy_static! {
    /// COM1, initialized on first use.
    pub static ref SERIAL1: Mutex<SerialPort> = {
        let mut port = unsafe { SerialPort::new(SERIAL_PORT) };
        port.init();
        Mutex::new(port)
    };
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // an interrupt handler logging on this core would spin on the port lock
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    crate::interrupts::without_interrupts(&crate::interrupts::CpuInterrupts, || {
        let _ = SERIAL1.lock().write_fmt(args);
    });

    #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
    {
        let _ = SERIAL1.lock().write_fmt(args);
    }
}

/// Prints formatted text to COM1.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

/// Prints formatted text to COM1, followed by a newline.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}
