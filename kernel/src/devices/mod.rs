//! Devices the VM subsystem talks to directly: only the debug UART.

pub mod serial;
