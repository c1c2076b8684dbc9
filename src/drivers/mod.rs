pub mod button_handler;
pub mod leds;
pub mod serial_console;
pub mod uart;

pub use button_handler::{Button, ButtonHandler, ButtonState};
pub use leds::{BlinkRate, Duty, Led, LedMode, Leds};
pub use serial_console::SerialConsole;
pub use uart::{Uart, UartConfig, UartError, UartHandle, UartId};
