//! Configuration constants for the ATmega128 super-loop firmware

/// CPU frequency in Hz
pub const CPU_FREQ_HZ: u32 = 16_000_000;

/// Period of the system tick interrupt in milliseconds
pub const TICK_PERIOD_MS: u32 = 1;

/// Budget for one full pass of the super loop. A pass that takes longer
/// raises the time-violation flag.
pub const LOOP_BUDGET_MS: u32 = 1;

/// Button debounce time in milliseconds
pub const BUTTON_DEBOUNCE_MS: u32 = 10;

/// How long the demo app waits before treating a press as a hold
pub const HOLD_TIME_MS: u32 = 1000;

/// Number of UART peripherals managed by the transport driver
pub const UART_COUNT: usize = 2;

/// UART baud rate
pub const UART_BAUD: u32 = 115_200;

/// Largest single message accepted by the message queue
pub const MESSAGE_MAX_SIZE: usize = 64;

/// Messages that may be queued on one peripheral at a time
pub const TX_QUEUE_DEPTH: usize = 8;

/// Token statuses tracked system-wide (outstanding + recently finished)
pub const STATUS_TABLE_SIZE: usize = 24;

/// How long a COMPLETE/ABANDONED status stays queryable
pub const STATUS_RETENTION_MS: u32 = 250;

/// Upper bound on a manual-mode drain during initialization
pub const MANUAL_MODE_TIMEOUT_MS: u32 = 500;

/// Upper bound on simultaneously active UART transfers
pub const MAX_ACTIVE_UARTS: u8 = UART_COUNT as u8;

/// Debug console receive buffer size in bytes
pub const DEBUG_RX_BUFFER_SIZE: usize = 64;

/// Maximum number of tasks the scheduler manages
pub const MAX_TASKS: usize = 8;

/// Counter polls allowed for the first tick at boot, well over 1 ms of spinning
pub const TICK_CHECK_SPINS: u32 = 50_000;

/// Watchdog timeout period in milliseconds
pub const WDT_TIMEOUT_MS: u16 = 1000;
