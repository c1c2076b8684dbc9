//! Interrupt-driven UART transport.
//!
//! A caller requests a port and gets exclusive use of it until release.
//! Outgoing data is queued per port through [`Messaging`](crate::messaging::Messaging)
//! and tracked by token. The Idle state starts at most one transfer per
//! pass, visiting ports round-robin; the transmit interrupt clocks the bytes
//! out and finishes the message. Received bytes go straight into the
//! caller's circular buffer.
//!
//! While the system is initializing, writes pump the transport
//! synchronously ("manual mode") so boot output is on the wire before the
//! main loop starts. It is the only blocking path in the firmware.

use core::cell::{Cell, RefCell};

use critical_section::Mutex;
use embedded_hal::blocking::delay::DelayMs;

use crate::config::{MANUAL_MODE_TIMEOUT_MS, MAX_ACTIVE_UARTS, UART_COUNT};
use crate::hal::uart::{LineError, UartPort};
use crate::messaging::{Message, MessageList, MessageStatus, MessagingError, Token};
use crate::os::System;
use crate::rtos::{InitError, Task, TaskId};
use crate::{log_debug, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UartId {
    Usart0 = 0,
    Usart1 = 1,
}

impl UartId {
    pub const ALL: [UartId; UART_COUNT] = [UartId::Usart0, UartId::Usart1];

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UartError {
    /// Requested port is owned by someone else
    AlreadyAssigned,
    /// Port was never requested or has been released
    NotAssigned,
    /// Receive buffer shorter than two bytes
    InvalidConfig,
    /// Manual mode outside the initialization phase
    NotInitializing,
    Messaging(MessagingError),
}

impl From<MessagingError> for UartError {
    fn from(e: MessagingError) -> Self {
        UartError::Messaging(e)
    }
}

pub struct UartConfig {
    pub id: UartId,
    pub baud: u32,
    /// Circular receive buffer, owned by the driver until release
    pub rx_buffer: &'static mut [u8],
    /// Called after new bytes land in `rx_buffer`. Runs in interrupt
    /// context and must not call back into the driver.
    pub on_receive: Option<fn()>,
}

/// Proof of ownership returned by [`Uart::request`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartHandle {
    id: UartId,
}

impl UartHandle {
    pub fn id(&self) -> UartId {
        self.id
    }
}

/// Driver-wide sticky diagnostics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartFlags {
    /// Manual mode is pumping the transport
    pub manual_mode: bool,
    /// A transfer finished with no transfer counted as active
    pub counter_out_of_sync: bool,
    /// More transfers active than there are ports
    pub too_many_active: bool,
    /// Manual mode gave up before the queues drained
    pub manual_mode_timeout: bool,
}

/// Per-port sticky receive faults
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortErrors {
    pub overrun: bool,
    /// Framing or parity error
    pub line_error: bool,
    /// The consumer fell a full buffer behind; oldest bytes were dropped
    pub rx_overflow: bool,
}

struct RxRing {
    buffer: &'static mut [u8],
    next_write: usize,
    next_read: usize,
    on_receive: Option<fn()>,
}

impl RxRing {
    /// Returns true if the oldest unread byte was overwritten
    fn push(&mut self, byte: u8) -> bool {
        let len = self.buffer.len();
        self.buffer[self.next_write] = byte;
        self.next_write = (self.next_write + 1) % len;
        if self.next_write == self.next_read {
            self.next_read = (self.next_read + 1) % len;
            true
        } else {
            false
        }
    }

    fn pop(&mut self) -> Option<u8> {
        if self.next_read == self.next_write {
            return None;
        }
        let byte = self.buffer[self.next_read];
        self.next_read = (self.next_read + 1) % self.buffer.len();
        Some(byte)
    }

    fn available(&self) -> usize {
        let len = self.buffer.len();
        (self.next_write + len - self.next_read) % len
    }
}

struct Peripheral<P> {
    port: P,
    assigned: bool,
    transmitting: bool,
    tx_list: MessageList,
    tx_cursor: usize,
    rx: Option<RxRing>,
    errors: PortErrors,
    interrupts: u32,
}

impl<P: UartPort> Peripheral<P> {
    const fn new(port: P) -> Self {
        Self {
            port,
            assigned: false,
            transmitting: false,
            tx_list: MessageList::new(),
            tx_cursor: 0,
            rx: None,
            errors: PortErrors {
                overrun: false,
                line_error: false,
                rx_overflow: false,
            },
            interrupts: 0,
        }
    }

    /// Drain the receiver. Returns true if any byte was stored.
    fn receive(&mut self) -> bool {
        let mut stored = false;
        loop {
            match self.port.read() {
                Ok(byte) => {
                    if let Some(rx) = self.rx.as_mut() {
                        if rx.push(byte) {
                            self.errors.rx_overflow = true;
                        }
                        stored = true;
                    }
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(LineError::Overrun)) => self.errors.overrun = true,
                Err(nb::Error::Other(_)) => self.errors.line_error = true,
            }
        }
        stored
    }

    /// Feed the transmitter from the head message. Returns true once every
    /// byte has been handed to the hardware.
    fn transmit(&mut self) -> bool {
        let Some(head) = self.tx_list.head() else {
            return true;
        };
        let data = head.data();
        while self.tx_cursor < data.len() {
            match self.port.write(data[self.tx_cursor]) {
                Ok(()) => self.tx_cursor += 1,
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(_)) => {
                    self.errors.line_error = true;
                    break;
                }
            }
        }
        self.tx_cursor == data.len()
    }
}

struct Inner<P> {
    ports: [Peripheral<P>; UART_COUNT],
    /// Round-robin position of the Idle state
    current: usize,
    active: u8,
    flags: UartFlags,
}

impl<P: UartPort> Inner<P> {
    fn transfer_finished(&mut self) {
        match self.active.checked_sub(1) {
            Some(n) => self.active = n,
            None => self.flags.counter_out_of_sync = true,
        }
    }

    fn drained(&self) -> bool {
        self.active == 0 && self.ports.iter().all(|p| !p.assigned || p.tx_list.is_empty())
    }
}

pub struct Uart<P, D> {
    inner: Mutex<RefCell<Inner<P>>>,
    delay: Mutex<Cell<Option<D>>>,
    /// Called once per manual-mode iteration
    watchdog: Mutex<Cell<Option<fn()>>>,
}

impl<P: UartPort, D: DelayMs<u8>> Uart<P, D> {
    /// `delay` is only used by manual mode
    pub const fn new(usart0: P, usart1: P, delay: D) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                ports: [Peripheral::new(usart0), Peripheral::new(usart1)],
                current: 0,
                active: 0,
                flags: UartFlags {
                    manual_mode: false,
                    counter_out_of_sync: false,
                    too_many_active: false,
                    manual_mode_timeout: false,
                },
            })),
            delay: Mutex::new(Cell::new(Some(delay))),
            watchdog: Mutex::new(Cell::new(None)),
        }
    }

    /// Keep the watchdog fed while manual mode blocks the boot sequence
    pub fn set_watchdog_feed(&self, feed: fn()) {
        critical_section::with(|cs| self.watchdog.borrow(cs).set(Some(feed)));
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner<P>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    /// Take exclusive ownership of a port and start receiving into
    /// `config.rx_buffer`.
    pub fn request(&self, config: UartConfig) -> Result<UartHandle, UartError> {
        if config.rx_buffer.len() < 2 {
            return Err(UartError::InvalidConfig);
        }
        let id = config.id;
        self.with(|inner| {
            let periph = &mut inner.ports[id.index()];
            if periph.assigned {
                return Err(UartError::AlreadyAssigned);
            }
            periph.rx = Some(RxRing {
                buffer: config.rx_buffer,
                next_write: 0,
                next_read: 0,
                on_receive: config.on_receive,
            });
            periph.errors = PortErrors::default();
            periph.tx_cursor = 0;
            periph.transmitting = false;
            periph.assigned = true;
            periph.port.enable(config.baud);
            log_debug!("uart {} assigned", id.index());
            Ok(UartHandle { id })
        })
    }

    /// Give a port back. Every queued message, including one on the wire,
    /// is marked `Abandoned` and dropped. Returns the receive buffer on the
    /// first call; releasing again is a no-op.
    pub fn release(&self, handle: UartHandle, sys: &System) -> Option<&'static mut [u8]> {
        let messaging = sys.messaging();
        let now = sys.now_ms();
        self.with(|inner| {
            let was_transmitting = {
                let periph = &mut inner.ports[handle.id.index()];
                if !periph.assigned {
                    return None;
                }
                periph.port.unlisten_tx();
                periph.port.disable();
                core::mem::replace(&mut periph.transmitting, false)
            };
            if was_transmitting {
                inner.transfer_finished();
            }

            let periph = &mut inner.ports[handle.id.index()];
            while let Some(token) = periph.tx_list.head().map(Message::token) {
                if let Err(e) = messaging.update_message_status(token, MessageStatus::Abandoned, now) {
                    log_warn!("abandon {}: {:?}", token.get(), e);
                }
                if messaging.dequeue_message(&mut periph.tx_list).is_err() {
                    break;
                }
            }
            periph.tx_cursor = 0;
            periph.assigned = false;
            periph.rx.take().map(|rx| rx.buffer)
        })
    }

    pub fn write_byte(&self, handle: UartHandle, byte: u8, sys: &System) -> Result<Token, UartError> {
        self.write_data(handle, &[byte], sys)
    }

    /// Queue a copy of `data` for transmission. During initialization this
    /// also runs manual mode until the queues drain.
    pub fn write_data(&self, handle: UartHandle, data: &[u8], sys: &System) -> Result<Token, UartError> {
        let token = self.with(|inner| {
            let periph = &mut inner.ports[handle.id.index()];
            if !periph.assigned {
                return Err(UartError::NotAssigned);
            }
            Ok(sys.messaging().queue_message(&mut periph.tx_list, data, sys.now_ms())?)
        })?;

        if sys.is_initializing() {
            self.manual_mode(sys)?;
        }
        Ok(token)
    }

    /// Pump Idle state and both port interrupts once per millisecond until
    /// every queue is empty, bounded by `MANUAL_MODE_TIMEOUT_MS`.
    pub fn manual_mode(&self, sys: &System) -> Result<(), UartError> {
        if !sys.is_initializing() {
            return Err(UartError::NotInitializing);
        }

        let start = sys.now_ms();
        let feed = critical_section::with(|cs| self.watchdog.borrow(cs).get());
        self.with(|inner| inner.flags.manual_mode = true);
        loop {
            if let Some(feed) = feed {
                feed();
            }
            self.run_idle(sys);
            for id in UartId::ALL {
                self.handle_interrupt(id, sys);
            }
            if self.with(|inner| inner.drained()) {
                break;
            }
            if sys.is_time_up(start, MANUAL_MODE_TIMEOUT_MS) {
                log_warn!("uart manual mode timed out");
                self.with(|inner| inner.flags.manual_mode_timeout = true);
                break;
            }
            // Waiting must happen outside the critical section so the tick
            // keeps running.
            if let Some(mut delay) = critical_section::with(|cs| self.delay.borrow(cs).take()) {
                delay.delay_ms(1);
                critical_section::with(|cs| self.delay.borrow(cs).set(Some(delay)));
            }
        }
        self.with(|inner| inner.flags.manual_mode = false);
        Ok(())
    }

    /// Next unread received byte
    pub fn read_byte(&self, handle: UartHandle) -> Option<u8> {
        self.with(|inner| {
            let periph = &mut inner.ports[handle.id.index()];
            if !periph.assigned {
                return None;
            }
            periph.rx.as_mut().and_then(RxRing::pop)
        })
    }

    pub fn rx_available(&self, handle: UartHandle) -> usize {
        self.with(|inner| {
            let periph = &inner.ports[handle.id.index()];
            match (&periph.rx, periph.assigned) {
                (Some(rx), true) => rx.available(),
                _ => 0,
            }
        })
    }

    /// Interrupt body for one port: drain the receiver, then feed the
    /// transmitter and finish the head message once it is fully written.
    pub fn handle_interrupt(&self, id: UartId, sys: &System) {
        let callback = self.with(|inner| {
            let finished = {
                let periph = &mut inner.ports[id.index()];
                if !periph.assigned {
                    return None;
                }
                periph.interrupts = periph.interrupts.wrapping_add(1);
                let received = periph.receive();
                let callback = if received {
                    periph.rx.as_ref().and_then(|rx| rx.on_receive)
                } else {
                    None
                };

                if periph.transmitting && periph.port.is_listening_tx() && periph.transmit() {
                    let messaging = sys.messaging();
                    if let Some(token) = periph.tx_list.head().map(Message::token) {
                        if let Err(e) = messaging.update_message_status(token, MessageStatus::Complete, sys.now_ms()) {
                            log_warn!("complete {}: {:?}", token.get(), e);
                        }
                        if let Err(e) = messaging.dequeue_message(&mut periph.tx_list) {
                            log_warn!("dequeue {}: {:?}", token.get(), e);
                        }
                    }
                    periph.transmitting = false;
                    periph.tx_cursor = 0;
                    periph.port.unlisten_tx();
                    (true, callback)
                } else {
                    (false, callback)
                }
            };
            if finished.0 {
                inner.transfer_finished();
            }
            finished.1
        });

        if let Some(on_receive) = callback {
            on_receive();
        }
    }

    /// One Idle pass: look at the current port, start its head message if
    /// it is not already sending, then move on to the next port.
    fn run_idle(&self, sys: &System) {
        self.with(|inner| {
            let current = inner.current;
            inner.current = (current + 1) % UART_COUNT;

            let periph = &mut inner.ports[current];
            if !periph.assigned || periph.transmitting {
                return;
            }
            let Some(token) = periph.tx_list.head().map(Message::token) else {
                return;
            };
            if let Err(e) = sys
                .messaging()
                .update_message_status(token, MessageStatus::Sending, sys.now_ms())
            {
                log_warn!("start {}: {:?}", token.get(), e);
            }
            periph.tx_cursor = 0;
            periph.transmitting = true;
            periph.port.listen_tx();

            inner.active = inner.active.saturating_add(1);
            if inner.active > MAX_ACTIVE_UARTS {
                inner.flags.too_many_active = true;
            }
        });
    }

    pub fn flags(&self) -> UartFlags {
        self.with(|inner| inner.flags)
    }

    pub fn port_errors(&self, id: UartId) -> PortErrors {
        self.with(|inner| inner.ports[id.index()].errors)
    }

    pub fn active_transfers(&self) -> u8 {
        self.with(|inner| inner.active)
    }

    pub fn is_assigned(&self, id: UartId) -> bool {
        self.with(|inner| inner.ports[id.index()].assigned)
    }

    pub fn is_transmitting(&self, id: UartId) -> bool {
        self.with(|inner| inner.ports[id.index()].transmitting)
    }

    /// Messages waiting on a port, including the one being sent
    pub fn queued(&self, id: UartId) -> usize {
        self.with(|inner| inner.ports[id.index()].tx_list.len())
    }

    pub fn interrupt_count(&self, id: UartId) -> u32 {
        self.with(|inner| inner.ports[id.index()].interrupts)
    }
}

impl<P: UartPort, D: DelayMs<u8>> Task for Uart<P, D> {
    fn id(&self) -> TaskId {
        TaskId::Uart
    }

    fn dependencies(&self) -> &'static [TaskId] {
        &[TaskId::Messaging]
    }

    fn initialize(&self, _sys: &System) -> Result<(), InitError> {
        self.with(|inner| {
            for periph in inner.ports.iter_mut().filter(|p| !p.assigned) {
                periph.port.unlisten_tx();
                periph.port.disable();
            }
            inner.current = 0;
        });
        Ok(())
    }

    fn run_active_state(&self, sys: &System) {
        self.run_idle(sys);
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::hal::mock::{MockDelay, MockUart};

    fn rx_buffer(len: usize) -> &'static mut [u8] {
        std::boxed::Box::leak(std::vec![0u8; len].into_boxed_slice())
    }

    fn config(id: UartId) -> UartConfig {
        UartConfig {
            id,
            baud: 115_200,
            rx_buffer: rx_buffer(8),
            on_receive: None,
        }
    }

    fn setup(sys: &System) -> (Uart<MockUart, MockDelay<'_>>, MockUart, MockUart) {
        let (a, b) = (MockUart::new(), MockUart::new());
        let uart = Uart::new(a.clone(), b.clone(), MockDelay::new(sys));
        uart.initialize(sys).unwrap();
        (uart, a, b)
    }

    #[test]
    fn request_enables_port() {
        let sys = System::new();
        let (uart, port, _) = setup(&sys);
        uart.request(config(UartId::Usart0)).unwrap();
        assert_eq!(port.baud(), Some(115_200));
        assert!(uart.is_assigned(UartId::Usart0));
        assert!(!uart.is_assigned(UartId::Usart1));
    }

    #[test]
    fn tiny_rx_buffer_is_rejected() {
        let sys = System::new();
        let (uart, _, _) = setup(&sys);
        let cfg = UartConfig {
            rx_buffer: rx_buffer(1),
            ..config(UartId::Usart0)
        };
        assert_eq!(uart.request(cfg), Err(UartError::InvalidConfig));
    }

    #[test]
    fn writing_to_unassigned_port_fails() {
        let sys = System::new();
        let (uart, _, _) = setup(&sys);
        let handle = uart.request(config(UartId::Usart1)).unwrap();
        uart.release(handle, &sys);
        assert_eq!(uart.write_byte(handle, b'x', &sys), Err(UartError::NotAssigned));
    }

    #[test]
    fn release_is_idempotent_and_returns_buffer_once() {
        let sys = System::new();
        let (uart, port, _) = setup(&sys);
        let handle = uart.request(config(UartId::Usart0)).unwrap();
        assert_eq!(uart.release(handle, &sys).map(|b| b.len()), Some(8));
        assert!(uart.release(handle, &sys).is_none());
        assert!(!port.is_enabled());
        assert!(uart.request(config(UartId::Usart0)).is_ok());
    }

    #[test]
    fn fifo_with_one_message_in_flight() {
        let sys = System::new();
        let (uart, port, _) = setup(&sys);
        let handle = uart.request(config(UartId::Usart0)).unwrap();
        let a = uart.write_data(handle, b"AA", &sys).unwrap();
        let b = uart.write_data(handle, b"BBB", &sys).unwrap();
        let c = uart.write_data(handle, b"C", &sys).unwrap();
        let status = |t| sys.messaging().query_message_status(t);

        port.set_tx_blocked(true);
        uart.run_active_state(&sys);
        uart.run_active_state(&sys);
        uart.run_active_state(&sys);
        assert_eq!(
            [status(a), status(b), status(c)],
            [MessageStatus::Sending, MessageStatus::Queued, MessageStatus::Queued]
        );
        assert_eq!(uart.active_transfers(), 1);

        port.set_tx_blocked(false);
        for _ in 0..6 {
            uart.run_active_state(&sys);
            uart.handle_interrupt(UartId::Usart0, &sys);
            let sending = [a, b, c]
                .iter()
                .filter(|&&t| status(t) == MessageStatus::Sending)
                .count();
            assert!(sending <= 1);
        }
        assert_eq!(port.written(), b"AABBBC");
        assert_eq!(
            [status(a), status(b), status(c)],
            [MessageStatus::Complete; 3]
        );
        assert_eq!(uart.queued(UartId::Usart0), 0);
        assert_eq!(uart.active_transfers(), 0);
        assert!(!uart.flags().counter_out_of_sync);
    }

    #[test]
    fn partial_writes_resume_on_next_interrupt() {
        let sys = System::new();
        let (uart, port, _) = setup(&sys);
        let handle = uart.request(config(UartId::Usart0)).unwrap();
        let token = uart.write_data(handle, b"hello", &sys).unwrap();
        uart.run_active_state(&sys);

        port.set_tx_blocked(true);
        uart.handle_interrupt(UartId::Usart0, &sys);
        assert_eq!(sys.messaging().query_message_status(token), MessageStatus::Sending);

        port.set_tx_blocked(false);
        uart.handle_interrupt(UartId::Usart0, &sys);
        assert_eq!(sys.messaging().query_message_status(token), MessageStatus::Complete);
        assert_eq!(port.written(), b"hello");
        assert!(!uart.is_transmitting(UartId::Usart0));
    }

    static RECEIVED: AtomicUsize = AtomicUsize::new(0);

    fn on_receive() {
        RECEIVED.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn received_bytes_are_buffered_and_signalled() {
        let sys = System::new();
        let (uart, _, port) = setup(&sys);
        let handle = uart
            .request(UartConfig {
                on_receive: Some(on_receive),
                ..config(UartId::Usart1)
            })
            .unwrap();

        port.push_rx(b"ok");
        uart.handle_interrupt(UartId::Usart1, &sys);
        assert_eq!(RECEIVED.load(Ordering::Relaxed), 1);
        assert_eq!(uart.rx_available(handle), 2);
        assert_eq!(uart.read_byte(handle), Some(b'o'));
        assert_eq!(uart.read_byte(handle), Some(b'k'));
        assert_eq!(uart.read_byte(handle), None);
        assert_eq!(uart.interrupt_count(UartId::Usart1), 1);
    }

    #[test]
    fn rx_overflow_keeps_newest_bytes() {
        let sys = System::new();
        let (uart, port, _) = setup(&sys);
        let handle = uart
            .request(UartConfig {
                rx_buffer: rx_buffer(4),
                ..config(UartId::Usart0)
            })
            .unwrap();
        port.push_rx(b"abcde");
        uart.handle_interrupt(UartId::Usart0, &sys);
        assert!(uart.port_errors(UartId::Usart0).rx_overflow);
        assert_eq!(uart.rx_available(handle), 3);
        assert_eq!(uart.read_byte(handle), Some(b'c'));
    }

    #[test]
    fn line_errors_are_sticky() {
        let sys = System::new();
        let (uart, port, _) = setup(&sys);
        let handle = uart.request(config(UartId::Usart0)).unwrap();
        port.push_rx_error(LineError::Overrun);
        port.push_rx(b"z");
        port.push_rx_error(LineError::Framing);
        uart.handle_interrupt(UartId::Usart0, &sys);
        uart.handle_interrupt(UartId::Usart0, &sys);

        let errors = uart.port_errors(UartId::Usart0);
        assert!(errors.overrun);
        assert!(errors.line_error);
        assert_eq!(uart.read_byte(handle), Some(b'z'));
    }

    #[test]
    fn manual_mode_only_while_initializing() {
        let sys = System::new();
        let (uart, _, _) = setup(&sys);
        assert_eq!(uart.manual_mode(&sys), Err(UartError::NotInitializing));
    }

    #[test]
    fn manual_mode_gives_up_on_a_stuck_port() {
        let sys = System::new();
        let (uart, port, _) = setup(&sys);
        let handle = uart.request(config(UartId::Usart0)).unwrap();
        port.set_tx_blocked(true);

        sys.update_flags(|f| f.initializing = true);
        let token = uart.write_data(handle, b"stuck", &sys).unwrap();

        assert!(uart.flags().manual_mode_timeout);
        assert!(!uart.flags().manual_mode);
        assert_eq!(sys.messaging().query_message_status(token), MessageStatus::Sending);
        assert!(sys.now_ms() >= MANUAL_MODE_TIMEOUT_MS);
    }

    static FEEDS: AtomicUsize = AtomicUsize::new(0);

    fn count_feed() {
        FEEDS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn manual_mode_feeds_the_watchdog_every_millisecond() {
        let sys = System::new();
        let (uart, port, _) = setup(&sys);
        uart.set_watchdog_feed(count_feed);
        let handle = uart.request(config(UartId::Usart0)).unwrap();
        port.set_tx_blocked(true);

        sys.update_flags(|f| f.initializing = true);
        uart.write_data(handle, b"stuck", &sys).unwrap();

        assert!(uart.flags().manual_mode_timeout);
        // Never more than a millisecond between feeds
        assert!(FEEDS.load(Ordering::Relaxed) as u32 > MANUAL_MODE_TIMEOUT_MS);
    }
}
