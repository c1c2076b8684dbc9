//! Task contract for the cooperative super loop.
//!
//! A task is initialized once and then has its active state run exactly once
//! per loop pass. `run_active_state` must check-and-return: no blocking, and
//! well under `LOOP_BUDGET_MS / number of tasks`. State changes made during
//! a call take effect on the next pass.

use crate::os::System;

/// Every task known to the firmware. The discriminant is the task's bit in
/// the application flags and its position in the boot status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TaskId {
    Messaging = 0,
    Uart = 1,
    Debug = 2,
    Button = 3,
    Led = 4,
    UserApp = 5,
}

impl TaskId {
    pub const ALL: [TaskId; 6] = [
        TaskId::Messaging,
        TaskId::Uart,
        TaskId::Debug,
        TaskId::Button,
        TaskId::Led,
        TaskId::UserApp,
    ];

    #[inline]
    pub const fn mask(self) -> u16 {
        1 << (self as u8)
    }

    /// Short name used in the status report
    pub const fn name(self) -> &'static str {
        match self {
            TaskId::Messaging => "MESSAGING",
            TaskId::Uart => "UART",
            TaskId::Debug => "DEBUG",
            TaskId::Button => "BUTTON",
            TaskId::Led => "LED",
            TaskId::UserApp => "USERAPP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitError {
    /// A peripheral the task needs is owned by someone else
    ResourceUnavailable,
    /// Hardware did not respond as expected
    HardwareFault,
    /// Board configuration does not match the driver
    InvalidConfig,
}

pub trait Task {
    fn id(&self) -> TaskId;

    /// Tasks that must be initialized and run before this one
    fn dependencies(&self) -> &'static [TaskId] {
        &[]
    }

    /// One-time setup. On failure the task parks itself in its error state
    /// and its application flag stays clear.
    fn initialize(&self, sys: &System) -> Result<(), InitError>;

    /// Run one iteration of the current state.
    fn run_active_state(&self, sys: &System);
}
