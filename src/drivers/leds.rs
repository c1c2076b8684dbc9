//! Discrete LEDs: immediate on/off/toggle plus blink and software PWM
//! advanced once per loop pass.
//!
//! `on`, `off` and `toggle` act at once and drop the LED back to normal
//! mode, so they work before the main loop runs. Blink and PWM timing is
//! counted in passes and therefore glitches if the loop overruns.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::digital::v2::OutputPin;

use crate::hal::gpio::board::LED_COUNT;
use crate::hal::gpio::PinConfig;
use crate::os::System;
use crate::rtos::{InitError, Task, TaskId};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Led {
    Led0 = 0,
    Led1 = 1,
    Led2 = 2,
    Led3 = 3,
}

impl Led {
    pub const ALL: [Led; LED_COUNT] = [Led::Led0, Led::Led1, Led::Led2, Led::Led3];

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

/// Blink frequency; the value is the toggle period in ms
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum BlinkRate {
    Hz0_5 = 1000,
    Hz1 = 500,
    Hz2 = 250,
    Hz4 = 125,
    Hz8 = 63,
}

impl BlinkRate {
    #[inline]
    pub const fn period_ms(self) -> u16 {
        self as u16
    }
}

/// PWM duty cycle in 5 % steps
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Duty(u8);

impl Duty {
    /// Steps in one PWM period
    pub const STEPS: u8 = 20;
    pub const OFF: Duty = Duty(0);
    pub const FULL: Duty = Duty(Self::STEPS);

    /// Rounds down to the nearest step; anything above 100 % is full
    pub const fn from_percent(percent: u8) -> Self {
        let step = percent / 5;
        if step > Self::STEPS {
            Self::FULL
        } else {
            Duty(step)
        }
    }

    pub const fn percent(self) -> u8 {
        self.0 * 5
    }

    pub const fn step_up(self) -> Self {
        if self.0 >= Self::STEPS {
            Self::FULL
        } else {
            Duty(self.0 + 1)
        }
    }

    pub const fn step_down(self) -> Self {
        Duty(self.0.saturating_sub(1))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedMode {
    Normal,
    Blink(BlinkRate),
    Pwm(Duty),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedState {
    Idle,
    Error,
}

#[derive(Copy, Clone)]
struct Control {
    mode: LedMode,
    lit: bool,
    /// Passes left in the current blink half-period or PWM phase
    count: u16,
}

impl Control {
    const OFF: Self = Self {
        mode: LedMode::Normal,
        lit: false,
        count: 0,
    };
}

struct Inner<L> {
    pins: [L; LED_COUNT],
    configs: [PinConfig; LED_COUNT],
    controls: [Control; LED_COUNT],
    state: LedState,
}

impl<L: OutputPin> Inner<L> {
    fn drive(&mut self, i: usize, on: bool) {
        let high = self.configs[i].level.is_active(true) == on;
        // Output errors leave the LED as it was; there is nothing to retry
        let _ = if high {
            self.pins[i].set_high()
        } else {
            self.pins[i].set_low()
        };
        self.controls[i].lit = on;
    }

    fn advance(&mut self, i: usize) {
        let control = self.controls[i];
        match control.mode {
            LedMode::Normal => {}
            LedMode::Blink(rate) => {
                let count = control.count.saturating_sub(1);
                if count == 0 {
                    self.drive(i, !control.lit);
                    self.controls[i].count = rate.period_ms();
                } else {
                    self.controls[i].count = count;
                }
            }
            LedMode::Pwm(duty) if duty == Duty::OFF => {
                if control.lit {
                    self.drive(i, false);
                }
            }
            LedMode::Pwm(duty) if duty == Duty::FULL => {
                if !control.lit {
                    self.drive(i, true);
                }
            }
            LedMode::Pwm(Duty(steps)) => {
                let count = control.count.saturating_sub(1);
                if count == 0 {
                    let on = !control.lit;
                    self.drive(i, on);
                    self.controls[i].count = u16::from(if on { steps } else { Duty::STEPS - steps });
                } else {
                    self.controls[i].count = count;
                }
            }
        }
    }
}

pub struct Leds<L> {
    inner: Mutex<RefCell<Inner<L>>>,
}

impl<L: OutputPin> Leds<L> {
    /// `configs[i]` describes the line behind `pins[i]`
    pub const fn new(pins: [L; LED_COUNT], configs: [PinConfig; LED_COUNT]) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                pins,
                configs,
                controls: [Control::OFF; LED_COUNT],
                state: LedState::Idle,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner<L>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    pub fn on(&self, led: Led) {
        self.with(|inner| {
            inner.drive(led.index(), true);
            inner.controls[led.index()].mode = LedMode::Normal;
        });
    }

    pub fn off(&self, led: Led) {
        self.with(|inner| {
            inner.drive(led.index(), false);
            inner.controls[led.index()].mode = LedMode::Normal;
        });
    }

    pub fn toggle(&self, led: Led) {
        self.with(|inner| {
            let lit = inner.controls[led.index()].lit;
            inner.drive(led.index(), !lit);
            inner.controls[led.index()].mode = LedMode::Normal;
        });
    }

    /// First toggle happens one period from now
    pub fn blink(&self, led: Led, rate: BlinkRate) {
        self.with(|inner| {
            let control = &mut inner.controls[led.index()];
            control.mode = LedMode::Blink(rate);
            control.count = rate.period_ms();
        });
    }

    /// Starts with the on phase
    pub fn pwm(&self, led: Led, duty: Duty) {
        self.with(|inner| {
            let i = led.index();
            inner.drive(i, duty != Duty::OFF);
            let control = &mut inner.controls[i];
            control.mode = LedMode::Pwm(duty);
            control.count = u16::from(duty.0);
        });
    }

    pub fn is_on(&self, led: Led) -> bool {
        self.with(|inner| inner.controls[led.index()].lit)
    }

    pub fn mode(&self, led: Led) -> LedMode {
        self.with(|inner| inner.controls[led.index()].mode)
    }

    pub fn state(&self) -> LedState {
        self.with(|inner| inner.state)
    }
}

impl<L: OutputPin> Task for Leds<L> {
    fn id(&self) -> TaskId {
        TaskId::Led
    }

    fn initialize(&self, _sys: &System) -> Result<(), InitError> {
        self.with(|inner| {
            if inner.configs.iter().any(|c| c.bit > 7) {
                inner.state = LedState::Error;
                return Err(InitError::InvalidConfig);
            }
            for i in 0..LED_COUNT {
                inner.controls[i] = Control::OFF;
                inner.drive(i, false);
            }
            inner.state = LedState::Idle;
            Ok(())
        })
    }

    fn run_active_state(&self, _sys: &System) {
        self.with(|inner| {
            if inner.state == LedState::Idle {
                for i in 0..LED_COUNT {
                    inner.advance(i);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::gpio::board::LEDS;
    use crate::hal::gpio::{ActiveLevel, Port};
    use crate::hal::mock::MockPin;

    fn setup() -> (System, Leds<MockPin>, [MockPin; LED_COUNT]) {
        let pins: [MockPin; LED_COUNT] = core::array::from_fn(|_| MockPin::new(false));
        let leds = Leds::new(pins.clone(), LEDS);
        let sys = System::new();
        leds.initialize(&sys).unwrap();
        (sys, leds, pins)
    }

    /// Pin level after each of `passes` passes
    fn trace(sys: &System, leds: &Leds<MockPin>, pin: &MockPin, passes: usize) -> std::vec::Vec<bool> {
        (0..passes)
            .map(|_| {
                leds.run_active_state(sys);
                pin.level()
            })
            .collect()
    }

    #[test]
    fn on_off_toggle_act_immediately() {
        let (_, leds, pins) = setup();
        leds.on(Led::Led1);
        assert!(pins[1].level());
        leds.toggle(Led::Led1);
        assert!(!pins[1].level());
        leds.toggle(Led::Led1);
        assert!(leds.is_on(Led::Led1));
        leds.off(Led::Led1);
        assert!(!pins[1].level());
    }

    #[test]
    fn active_low_led_is_inverted() {
        let pins: [MockPin; LED_COUNT] = core::array::from_fn(|_| MockPin::new(false));
        let mut table = LEDS;
        table[0] = PinConfig::new(Port::A, 0, ActiveLevel::Low);
        let leds = Leds::new(pins.clone(), table);
        leds.initialize(&System::new()).unwrap();
        assert!(pins[0].level());
        leds.on(Led::Led0);
        assert!(!pins[0].level());
    }

    #[test]
    fn blink_toggles_every_period() {
        let (sys, leds, pins) = setup();
        leds.blink(Led::Led2, BlinkRate::Hz8);
        let levels = trace(&sys, &leds, &pins[2], 63 * 4);
        let toggles: std::vec::Vec<usize> = (1..levels.len()).filter(|&i| levels[i] != levels[i - 1]).collect();
        assert_eq!(toggles, [62, 125, 188, 251]);
        assert!(levels[..62].iter().all(|&l| !l));
        assert!(levels[62]);
    }

    #[test]
    fn pwm_quarter_duty() {
        let (sys, leds, pins) = setup();
        leds.pwm(Led::Led0, Duty::from_percent(25));
        let levels = trace(&sys, &leds, &pins[0], 200);
        assert_eq!(levels.iter().filter(|&&l| l).count(), 50);
        // 5 on, 15 off
        assert_eq!(&levels[..20], &[
            true, true, true, true, false, false, false, false, false, false, false, false, false,
            false, false, false, false, false, false, true
        ]);
    }

    #[test]
    fn pwm_extremes_hold_steady() {
        let (sys, leds, pins) = setup();
        leds.pwm(Led::Led3, Duty::FULL);
        assert!(trace(&sys, &leds, &pins[3], 50).iter().all(|&l| l));
        leds.pwm(Led::Led3, Duty::OFF);
        assert!(trace(&sys, &leds, &pins[3], 50).iter().all(|&l| !l));
    }

    #[test]
    fn on_cancels_blink() {
        let (sys, leds, pins) = setup();
        leds.blink(Led::Led0, BlinkRate::Hz8);
        leds.on(Led::Led0);
        assert_eq!(leds.mode(Led::Led0), LedMode::Normal);
        assert!(trace(&sys, &leds, &pins[0], 200).iter().all(|&l| l));
    }

    #[test]
    fn duty_steps() {
        assert_eq!(Duty::from_percent(37).percent(), 35);
        assert_eq!(Duty::from_percent(250), Duty::FULL);
        assert_eq!(Duty::FULL.step_up(), Duty::FULL);
        assert_eq!(Duty::OFF.step_down(), Duty::OFF);
    }
}
