//! Host-side fakes for the HAL traits.
//!
//! Handles are cheap clones sharing one state, so a test can hand a port or
//! pin to a driver and keep a clone to drive and inspect it.

extern crate std;

use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::{InputPin, OutputPin, ToggleableOutputPin};
use embedded_hal::serial;

use super::gpio::InterruptPin;
use super::power::Sleep;
use super::uart::{LineError, UartPort};
use super::watchdog::Feed;
use crate::os::System;

#[derive(Default)]
struct UartState {
    baud: Option<u32>,
    listening: bool,
    tx_blocked: bool,
    written: Vec<u8>,
    rx: VecDeque<Result<u8, LineError>>,
}

#[derive(Clone, Default)]
pub struct MockUart {
    state: Rc<RefCell<UartState>>,
}

impl MockUart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything transmitted so far
    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    pub fn clear_written(&self) {
        self.state.borrow_mut().written.clear();
    }

    /// Queue bytes on the receive line
    pub fn push_rx(&self, bytes: &[u8]) {
        self.state.borrow_mut().rx.extend(bytes.iter().map(|&b| Ok(b)));
    }

    pub fn push_rx_error(&self, error: LineError) {
        self.state.borrow_mut().rx.push_back(Err(error));
    }

    /// While blocked the transmit register never empties
    pub fn set_tx_blocked(&self, blocked: bool) {
        self.state.borrow_mut().tx_blocked = blocked;
    }

    pub fn baud(&self) -> Option<u32> {
        self.state.borrow().baud
    }

    pub fn is_enabled(&self) -> bool {
        self.state.borrow().baud.is_some()
    }
}

impl serial::Read<u8> for MockUart {
    type Error = LineError;

    fn read(&mut self) -> nb::Result<u8, LineError> {
        let mut state = self.state.borrow_mut();
        if state.baud.is_none() {
            return Err(nb::Error::WouldBlock);
        }
        match state.rx.pop_front() {
            Some(Ok(byte)) => Ok(byte),
            Some(Err(e)) => Err(nb::Error::Other(e)),
            None => Err(nb::Error::WouldBlock),
        }
    }
}

impl serial::Write<u8> for MockUart {
    type Error = LineError;

    fn write(&mut self, byte: u8) -> nb::Result<(), LineError> {
        let mut state = self.state.borrow_mut();
        if state.tx_blocked || state.baud.is_none() {
            return Err(nb::Error::WouldBlock);
        }
        state.written.push(byte);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), LineError> {
        Ok(())
    }
}

impl UartPort for MockUart {
    fn enable(&mut self, baud: u32) {
        self.state.borrow_mut().baud = Some(baud);
    }

    fn disable(&mut self) {
        let mut state = self.state.borrow_mut();
        state.baud = None;
        state.listening = false;
    }

    fn listen_tx(&mut self) {
        self.state.borrow_mut().listening = true;
    }

    fn unlisten_tx(&mut self) {
        self.state.borrow_mut().listening = false;
    }

    fn is_listening_tx(&self) -> bool {
        self.state.borrow().listening
    }
}

/// Digital line usable as input or output
#[derive(Clone, Default)]
pub struct MockPin {
    high: Rc<Cell<bool>>,
    interrupt: Rc<Cell<bool>>,
    samples: Rc<Cell<usize>>,
}

impl MockPin {
    pub fn new(high: bool) -> Self {
        let pin = Self::default();
        pin.high.set(high);
        pin
    }

    /// Force the line level from the outside
    pub fn drive(&self, high: bool) {
        self.high.set(high);
    }

    pub fn level(&self) -> bool {
        self.high.get()
    }

    pub fn interrupt_enabled(&self) -> bool {
        self.interrupt.get()
    }

    /// Number of times the line was read
    pub fn samples(&self) -> usize {
        self.samples.get()
    }
}

impl InputPin for MockPin {
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Infallible> {
        self.samples.set(self.samples.get() + 1);
        Ok(self.high.get())
    }

    fn is_low(&self) -> Result<bool, Infallible> {
        self.is_high().map(|h| !h)
    }
}

impl OutputPin for MockPin {
    type Error = Infallible;

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.high.set(true);
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Infallible> {
        self.high.set(false);
        Ok(())
    }
}

impl ToggleableOutputPin for MockPin {
    type Error = Infallible;

    fn toggle(&mut self) -> Result<(), Infallible> {
        self.high.set(!self.high.get());
        Ok(())
    }
}

impl InterruptPin for MockPin {
    fn enable_interrupt(&mut self) {
        self.interrupt.set(true);
    }

    fn disable_interrupt(&mut self) {
        self.interrupt.set(false);
    }
}

/// Advances the system clock instead of waiting
pub struct MockDelay<'a> {
    sys: &'a System,
    elapsed: u32,
}

impl<'a> MockDelay<'a> {
    pub fn new(sys: &'a System) -> Self {
        Self { sys, elapsed: 0 }
    }

    pub fn elapsed_ms(&self) -> u32 {
        self.elapsed
    }
}

impl DelayMs<u8> for MockDelay<'_> {
    fn delay_ms(&mut self, ms: u8) {
        for _ in 0..ms {
            self.sys.tick();
        }
        self.elapsed += u32::from(ms);
    }
}

/// Every sleep is woken by exactly one tick
#[derive(Default)]
pub struct MockSleep {
    sleeps: usize,
}

impl MockSleep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> usize {
        self.sleeps
    }
}

impl Sleep for MockSleep {
    fn sleep(&mut self, sys: &System) {
        self.sleeps += 1;
        sys.tick();
    }
}

#[derive(Default)]
pub struct MockWatchdog {
    feeds: usize,
}

impl MockWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feeds(&self) -> usize {
        self.feeds
    }
}

impl Feed for MockWatchdog {
    fn feed(&mut self) {
        self.feeds += 1;
    }
}
