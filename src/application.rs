//! Demo user task wired to the button, LED and console drivers.
//!
//! - Button 0: toggles LED 0 and prints the press time
//! - Button 1: held for `HOLD_TIME_MS` blinks LED 1 until released
//! - Button 2: steps LED 2 brightness up by 5 %, wrapping to off
//! - Button 3: prints the diagnostic flags

use core::cell::Cell;

use critical_section::Mutex;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::{InputPin, OutputPin};
use ufmt::uwrite;

use crate::config::HOLD_TIME_MS;
use crate::diagnostics::DiagnosticFlags;
use crate::drivers::button_handler::{Button, ButtonHandler};
use crate::drivers::leds::{BlinkRate, Duty, Led, Leds};
use crate::drivers::serial_console::SerialConsole;
use crate::hal::gpio::InterruptPin;
use crate::hal::uart::UartPort;
use crate::os::System;
use crate::rtos::{InitError, Task, TaskId};
use crate::{log_error, log_warn};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AppState {
    Idle,
    Error,
}

#[derive(Copy, Clone)]
struct AppInner {
    state: AppState,
    duty: Duty,
    blinking: bool,
}

pub struct UserApp<'a, B, L, P, D> {
    buttons: &'a ButtonHandler<B>,
    leds: &'a Leds<L>,
    console: &'a SerialConsole<'a, P, D>,
    inner: Mutex<Cell<AppInner>>,
}

impl<'a, B, L, P, D> UserApp<'a, B, L, P, D>
where
    B: InputPin + InterruptPin,
    L: OutputPin,
    P: UartPort,
    D: DelayMs<u8>,
{
    pub const fn new(buttons: &'a ButtonHandler<B>, leds: &'a Leds<L>, console: &'a SerialConsole<'a, P, D>) -> Self {
        Self {
            buttons,
            leds,
            console,
            inner: Mutex::new(Cell::new(AppInner {
                state: AppState::Idle,
                duty: Duty::OFF,
                blinking: false,
            })),
        }
    }

    fn get(&self) -> AppInner {
        critical_section::with(|cs| self.inner.borrow(cs).get())
    }

    fn set(&self, inner: AppInner) {
        critical_section::with(|cs| self.inner.borrow(cs).set(inner));
    }

    pub fn state(&self) -> AppState {
        self.get().state
    }

    fn idle(&self, sys: &System) {
        let mut app = self.get();

        if self.buttons.was_pressed(Button::Button0) {
            self.buttons.acknowledge(Button::Button0);
            self.leds.toggle(Led::Led0);
            let mut out = self.console.writer(sys);
            let printed = uwrite!(out, "[{}.{}s] Button 0 pressed\r\n", sys.now_s(), sys.now_ms() % 1000 / 100)
                .and_then(|_| out.finish());
            if let Err(e) = printed {
                log_warn!("app print: {:?}", e);
            }
        }

        if self.buttons.is_held(Button::Button1, HOLD_TIME_MS, sys) {
            if !app.blinking {
                self.leds.blink(Led::Led1, BlinkRate::Hz2);
                app.blinking = true;
            }
        } else if app.blinking {
            self.leds.off(Led::Led1);
            app.blinking = false;
        }
        // A short press on button 1 does nothing
        self.buttons.acknowledge(Button::Button1);

        if self.buttons.was_pressed(Button::Button2) {
            self.buttons.acknowledge(Button::Button2);
            app.duty = if app.duty == Duty::FULL { Duty::OFF } else { app.duty.step_up() };
            self.leds.pwm(Led::Led2, app.duty);
        }

        if self.buttons.was_pressed(Button::Button3) {
            self.buttons.acknowledge(Button::Button3);
            let flags = DiagnosticFlags::collect(sys, self.console.uart().flags());
            if let Err(e) = self.console.show(&flags, sys) {
                log_warn!("app print: {:?}", e);
            }
        }

        self.set(app);
    }
}

impl<'a, B, L, P, D> Task for UserApp<'a, B, L, P, D>
where
    B: InputPin + InterruptPin,
    L: OutputPin,
    P: UartPort,
    D: DelayMs<u8>,
{
    fn id(&self) -> TaskId {
        TaskId::UserApp
    }

    fn dependencies(&self) -> &'static [TaskId] {
        &[TaskId::Button, TaskId::Led, TaskId::Debug]
    }

    fn initialize(&self, sys: &System) -> Result<(), InitError> {
        let flags = sys.application_flags();
        let mut app = self.get();
        if !self.dependencies().iter().all(|&id| flags.is_ready(id)) {
            log_error!("user app: a driver it needs is not ready");
            app.state = AppState::Error;
            self.set(app);
            return Err(InitError::ResourceUnavailable);
        }

        app.state = AppState::Idle;
        self.set(app);
        if let Err(e) = self.console.print("User app ready\r\n", sys) {
            log_warn!("app print: {:?}", e);
        }
        Ok(())
    }

    fn run_active_state(&self, sys: &System) {
        match self.get().state {
            AppState::Idle => self.idle(sys),
            AppState::Error => {}
        }
    }
}
