pub mod gpio;
pub mod power;
pub mod timer;
pub mod uart;
pub mod watchdog;

#[cfg(not(target_arch = "avr"))]
pub mod mock;

pub use gpio::{ActiveLevel, InterruptPin};
pub use power::Sleep;
pub use timer::TickDelay;
pub use uart::UartPort;
pub use watchdog::Feed;
