//! Interrupt-started, timer-resolved button debounce.
//!
//! An edge interrupt only masks the pin and records when debouncing began.
//! The task samples the pin once `BUTTON_DEBOUNCE_MS` later, updates the
//! confirmed state and unmasks the pin again. A transition into `Pressed`
//! sets a one-shot latch that stays set until a consumer acknowledges it;
//! several presses between two polls collapse into one.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::digital::v2::InputPin;

use crate::config::BUTTON_DEBOUNCE_MS;
use crate::hal::gpio::board::BUTTON_COUNT;
use crate::hal::gpio::{InterruptPin, PinConfig, Port};
use crate::os::{is_time_up, System};
use crate::rtos::{InitError, Task, TaskId};
use crate::{log_debug, log_error};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Button {
    Button0 = 0,
    Button1 = 1,
    Button2 = 2,
    Button3 = 3,
}

impl Button {
    pub const ALL: [Button; BUTTON_COUNT] = [Button::Button0, Button::Button1, Button::Button2, Button::Button3];

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonState {
    Released,
    Pressed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DebounceState {
    /// Nothing debouncing
    Idle,
    /// At least one button debouncing
    ButtonActive,
    Error,
}

#[derive(Copy, Clone, Debug)]
struct ButtonStatus {
    current: ButtonState,
    new_press: bool,
    debounce_active: bool,
    debounce_start: u32,
    pressed_at: u32,
}

impl ButtonStatus {
    const RELEASED: Self = Self {
        current: ButtonState::Released,
        new_press: false,
        debounce_active: false,
        debounce_start: 0,
        pressed_at: 0,
    };
}

struct Inner<B> {
    pins: [B; BUTTON_COUNT],
    configs: [PinConfig; BUTTON_COUNT],
    status: [ButtonStatus; BUTTON_COUNT],
    state: DebounceState,
}

impl<B: InputPin + InterruptPin> Inner<B> {
    fn sample(&self, i: usize) -> ButtonState {
        // A failed read counts as released
        let high = self.pins[i].is_high().ok();
        match high {
            Some(high) if self.configs[i].level.is_active(high) => ButtonState::Pressed,
            _ => ButtonState::Released,
        }
    }

    fn any_debouncing(&self) -> bool {
        self.status.iter().any(|s| s.debounce_active)
    }

    fn resolve(&mut self, now: u32) {
        for i in 0..BUTTON_COUNT {
            let status = self.status[i];
            if !status.debounce_active || !is_time_up(status.debounce_start, now, BUTTON_DEBOUNCE_MS) {
                continue;
            }

            let sampled = self.sample(i);
            let status = &mut self.status[i];
            if sampled != status.current {
                status.current = sampled;
                if sampled == ButtonState::Pressed {
                    status.new_press = true;
                    status.pressed_at = now;
                }
                log_debug!("button {} {:?}", i, sampled);
            }
            status.debounce_active = false;
            self.pins[i].enable_interrupt();
        }
    }
}

pub struct ButtonHandler<B> {
    inner: Mutex<RefCell<Inner<B>>>,
}

impl<B: InputPin + InterruptPin> ButtonHandler<B> {
    /// `configs[i]` describes the line behind `pins[i]`
    pub const fn new(pins: [B; BUTTON_COUNT], configs: [PinConfig; BUTTON_COUNT]) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                pins,
                configs,
                status: [ButtonStatus::RELEASED; BUTTON_COUNT],
                state: DebounceState::Idle,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner<B>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    /// Edge interrupt entry. `mask` holds the pending bits of `port`.
    /// Returns false if no button is wired there.
    pub fn start_debounce(&self, port: Port, mask: u8, sys: &System) -> bool {
        let now = sys.now_ms();
        self.with(|inner| {
            let mut found = false;
            for i in 0..BUTTON_COUNT {
                let cfg = inner.configs[i];
                if cfg.port != port || cfg.mask() & mask == 0 {
                    continue;
                }
                found = true;
                inner.pins[i].disable_interrupt();
                let status = &mut inner.status[i];
                if !status.debounce_active {
                    status.debounce_active = true;
                    status.debounce_start = now;
                }
            }
            found
        })
    }

    /// Instantaneous confirmed state
    pub fn is_pressed(&self, button: Button) -> bool {
        self.with(|inner| inner.status[button.index()].current == ButtonState::Pressed)
    }

    /// True from a confirmed press until `acknowledge`
    pub fn was_pressed(&self, button: Button) -> bool {
        self.with(|inner| inner.status[button.index()].new_press)
    }

    pub fn acknowledge(&self, button: Button) {
        self.with(|inner| inner.status[button.index()].new_press = false);
    }

    /// Pressed, and for at least `duration_ms` since the press was confirmed
    pub fn is_held(&self, button: Button, duration_ms: u32, sys: &System) -> bool {
        let now = sys.now_ms();
        self.with(|inner| {
            let status = inner.status[button.index()];
            status.current == ButtonState::Pressed && is_time_up(status.pressed_at, now, duration_ms)
        })
    }

    pub fn state(&self) -> DebounceState {
        self.with(|inner| inner.state)
    }
}

impl<B: InputPin + InterruptPin> Task for ButtonHandler<B> {
    fn id(&self) -> TaskId {
        TaskId::Button
    }

    fn initialize(&self, _sys: &System) -> Result<(), InitError> {
        self.with(|inner| {
            let valid = inner.configs.iter().enumerate().all(|(i, a)| {
                a.bit < 8 && inner.configs[i + 1..].iter().all(|b| a.port != b.port || a.bit != b.bit)
            });
            if !valid {
                log_error!("button table has overlapping or invalid lines");
                inner.state = DebounceState::Error;
                return Err(InitError::InvalidConfig);
            }

            for i in 0..BUTTON_COUNT {
                // A button held through reset is pressed, but not a new press
                let current = inner.sample(i);
                inner.status[i] = ButtonStatus {
                    current,
                    ..ButtonStatus::RELEASED
                };
                inner.pins[i].enable_interrupt();
            }
            inner.state = DebounceState::Idle;
            Ok(())
        })
    }

    fn run_active_state(&self, sys: &System) {
        let now = sys.now_ms();
        self.with(|inner| match inner.state {
            DebounceState::Idle => {
                if inner.any_debouncing() {
                    inner.state = DebounceState::ButtonActive;
                }
            }
            DebounceState::ButtonActive => {
                inner.resolve(now);
                if !inner.any_debouncing() {
                    inner.state = DebounceState::Idle;
                }
            }
            DebounceState::Error => {}
        });
    }
}
