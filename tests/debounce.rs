//! Button debounce against scripted pin reads.

use std::cell::Cell;
use std::rc::Rc;

use embedded_hal::digital::v2::InputPin;
use embedded_hal_mock::pin::{Mock as PinMock, State, Transaction};
use superloop_firmware::config::BUTTON_DEBOUNCE_MS;
use superloop_firmware::drivers::button_handler::{Button, ButtonHandler, DebounceState};
use superloop_firmware::hal::gpio::board::{BUTTONS, BUTTON_COUNT};
use superloop_firmware::hal::gpio::InterruptPin;
use superloop_firmware::os::System;
use superloop_firmware::rtos::Task;

/// Scripted input line plus an observable interrupt mask
struct Line {
    pin: PinMock,
    armed: Rc<Cell<bool>>,
}

impl InputPin for Line {
    type Error = <PinMock as InputPin>::Error;

    fn is_high(&self) -> Result<bool, Self::Error> {
        self.pin.is_high()
    }

    fn is_low(&self) -> Result<bool, Self::Error> {
        self.pin.is_low()
    }
}

impl InterruptPin for Line {
    fn enable_interrupt(&mut self) {
        self.armed.set(true);
    }

    fn disable_interrupt(&mut self) {
        self.armed.set(false);
    }
}

struct Rig {
    sys: System,
    handler: ButtonHandler<Line>,
    pins: Vec<PinMock>,
    armed: Vec<Rc<Cell<bool>>>,
}

/// `reads[i]` is every level button `i` will be sampled at, in order
fn rig(reads: [&[State]; BUTTON_COUNT]) -> Rig {
    let pins: Vec<PinMock> = reads
        .iter()
        .map(|levels| {
            let script: Vec<Transaction> = levels.iter().map(|s| Transaction::get(s.clone())).collect();
            PinMock::new(&script)
        })
        .collect();
    let armed: Vec<Rc<Cell<bool>>> = (0..BUTTON_COUNT).map(|_| Rc::new(Cell::new(false))).collect();
    let lines = core::array::from_fn(|i| Line {
        pin: pins[i].clone(),
        armed: armed[i].clone(),
    });
    Rig {
        sys: System::new(),
        handler: ButtonHandler::new(lines, BUTTONS),
        pins,
        armed,
    }
}

impl Rig {
    fn edge(&self, index: usize) {
        if self.armed[index].get() {
            let cfg = BUTTONS[index];
            assert!(self.handler.start_debounce(cfg.port, cfg.mask(), &self.sys));
        }
    }

    fn run(&self, passes: u32) {
        for _ in 0..passes {
            self.handler.run_active_state(&self.sys);
            self.sys.tick();
        }
    }

    fn done(mut self) {
        for pin in self.pins.iter_mut() {
            pin.done();
        }
    }
}

const IDLE: &[State] = &[State::High];

#[test]
fn bouncing_press_is_sampled_once() {
    let rig = rig([&[State::High, State::Low], IDLE, IDLE, IDLE]);
    rig.handler.initialize(&rig.sys).unwrap();
    assert!(rig.armed.iter().all(|a| a.get()));

    // Contact bounce: only the first edge gets through the mask
    for _ in 0..5 {
        rig.edge(0);
        rig.run(1);
    }
    assert!(!rig.armed[0].get());
    assert_eq!(rig.handler.state(), DebounceState::ButtonActive);

    rig.run(BUTTON_DEBOUNCE_MS);
    assert!(rig.handler.was_pressed(Button::Button0));
    assert!(rig.handler.is_pressed(Button::Button0));
    assert!(rig.armed[0].get());
    rig.run(1);
    assert_eq!(rig.handler.state(), DebounceState::Idle);

    rig.done();
}

#[test]
fn hold_time_counts_from_the_confirmed_press() {
    let rig = rig([IDLE, IDLE, &[State::High, State::Low], IDLE]);
    rig.handler.initialize(&rig.sys).unwrap();

    rig.edge(2);
    rig.run(BUTTON_DEBOUNCE_MS + 1);
    assert!(rig.handler.is_pressed(Button::Button2));
    assert!(!rig.handler.is_held(Button::Button2, 100, &rig.sys));

    rig.run(98);
    assert!(!rig.handler.is_held(Button::Button2, 100, &rig.sys));
    rig.run(1);
    assert!(rig.handler.is_held(Button::Button2, 100, &rig.sys));

    rig.done();
}

#[test]
fn simultaneous_presses_each_latch() {
    let press: &[State] = &[State::High, State::Low];
    let rig = rig([press, press, IDLE, press]);
    rig.handler.initialize(&rig.sys).unwrap();

    rig.edge(0);
    rig.edge(1);
    rig.edge(3);
    rig.run(BUTTON_DEBOUNCE_MS + 2);

    for button in [Button::Button0, Button::Button1, Button::Button3] {
        assert!(rig.handler.was_pressed(button));
    }
    assert!(!rig.handler.was_pressed(Button::Button2));

    rig.done();
}

#[test]
fn presses_between_polls_collapse_into_one_latch() {
    let rig = rig([&[State::High, State::Low, State::High, State::Low, State::High], IDLE, IDLE, IDLE]);
    rig.handler.initialize(&rig.sys).unwrap();

    // press, release, press, release with no consumer poll in between
    for _ in 0..4 {
        rig.edge(0);
        rig.run(BUTTON_DEBOUNCE_MS + 1);
        assert!(rig.armed[0].get());
    }
    assert!(!rig.handler.is_pressed(Button::Button0));

    assert!(rig.handler.was_pressed(Button::Button0));
    rig.handler.acknowledge(Button::Button0);
    assert!(!rig.handler.was_pressed(Button::Button0));

    rig.done();
}
