//! Boot status report and sticky diagnostic flags.
//!
//! Nothing here acts on a failure. Failed tasks and sanity-check flags are
//! only collected for an operator to read on the debug console.

use heapless::Vec;
use ufmt::{uDisplay, uWrite, uwrite, Formatter};

use crate::config::MAX_TASKS;
use crate::drivers::uart::UartFlags;
use crate::os::{ApplicationFlags, System};
use crate::rtos::TaskId;

/// Which registered tasks failed to initialize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    registered: Vec<TaskId, MAX_TASKS>,
    failed: Vec<TaskId, MAX_TASKS>,
}

impl StatusReport {
    pub fn new(tasks: impl IntoIterator<Item = TaskId>, flags: ApplicationFlags) -> Self {
        let mut registered = Vec::new();
        let mut failed = Vec::new();
        for id in tasks {
            // Both hold at most MAX_TASKS, the scheduler's own limit
            let _ = registered.push(id);
            if !flags.is_ready(id) {
                let _ = failed.push(id);
            }
        }
        Self { registered, failed }
    }

    pub fn registered(&self) -> &[TaskId] {
        &self.registered
    }

    pub fn failed(&self) -> &[TaskId] {
        &self.failed
    }

    pub fn all_ready(&self) -> bool {
        self.failed.is_empty()
    }
}

impl uDisplay for StatusReport {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        f.write_str("\r\nInitialization complete. Failed tasks:\r\n")?;
        for id in self.failed.iter() {
            uwrite!(f, "  {}\r\n", id.name())?;
        }
        if self.all_ready() {
            f.write_str("No failed tasks.\r\n")?;
        }
        f.write_str("\r\n")
    }
}

/// Snapshot of every sticky fault flag in the system
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiagnosticFlags {
    pub clock_fault: bool,
    pub time_violation: bool,
    pub uart_counter_out_of_sync: bool,
    pub uart_too_many_active: bool,
    pub uart_manual_mode_timeout: bool,
}

impl DiagnosticFlags {
    pub fn collect(sys: &System, uart: UartFlags) -> Self {
        let flags = sys.flags();
        Self {
            clock_fault: flags.clock_fault,
            time_violation: flags.time_violation,
            uart_counter_out_of_sync: uart.counter_out_of_sync,
            uart_too_many_active: uart.too_many_active,
            uart_manual_mode_timeout: uart.manual_mode_timeout,
        }
    }

    pub fn any(&self) -> bool {
        self.labelled().iter().any(|(set, _)| *set)
    }

    fn labelled(&self) -> [(bool, &'static str); 5] {
        [
            (self.clock_fault, "clock fault"),
            (self.time_violation, "loop time violation"),
            (self.uart_counter_out_of_sync, "uart counter out of sync"),
            (self.uart_too_many_active, "uart too many active"),
            (self.uart_manual_mode_timeout, "uart manual mode timeout"),
        ]
    }
}

impl uDisplay for DiagnosticFlags {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        if !self.any() {
            return f.write_str("No faults.\r\n");
        }
        for (_, label) in self.labelled().iter().filter(|(set, _)| *set) {
            uwrite!(f, "FAULT: {}\r\n", *label)?;
        }
        Ok(())
    }
}
