//! Debug console on USART0.
//!
//! Text is queued on the UART in message-sized pieces, so a long print
//! takes several queue slots. Received bytes are echoed back; nothing is
//! parsed.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::blocking::delay::DelayMs;
use heapless::Vec;
use ufmt::{uDisplay, uWrite, uwrite};

use crate::config::{DEBUG_RX_BUFFER_SIZE, MESSAGE_MAX_SIZE, UART_BAUD};
use crate::drivers::uart::{Uart, UartConfig, UartError, UartHandle, UartId};
use crate::hal::uart::UartPort;
use crate::messaging::Token;
use crate::os::System;
use crate::rtos::{InitError, Task, TaskId};
use crate::{log_error, log_warn};

const BANNER: &str = "\r\n\r\n*** ATMEGA128 SUPERLOOP FIRMWARE ***\r\n";
const BACKSPACE: u8 = 0x08;
const CARRIAGE_RETURN: u8 = b'\r';

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConsoleState {
    /// Not initialized yet
    Waiting,
    Idle,
    Error,
}

struct Inner {
    rx_buffer: Option<&'static mut [u8]>,
    handle: Option<UartHandle>,
    state: ConsoleState,
    echo: bool,
    /// Prints lost to a full transmit queue
    dropped: u32,
}

pub struct SerialConsole<'a, P, D> {
    uart: &'a Uart<P, D>,
    inner: Mutex<RefCell<Inner>>,
}

impl<'a, P: UartPort, D: DelayMs<u8>> SerialConsole<'a, P, D> {
    pub const fn new(uart: &'a Uart<P, D>) -> Self {
        Self {
            uart,
            inner: Mutex::new(RefCell::new(Inner {
                rx_buffer: None,
                handle: None,
                state: ConsoleState::Waiting,
                echo: true,
                dropped: 0,
            })),
        }
    }

    /// Hand over the receive buffer. Must happen before initialization.
    pub fn attach_rx_buffer(&self, buffer: &'static mut [u8]) {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).rx_buffer = Some(buffer));
    }

    pub fn uart(&self) -> &'a Uart<P, D> {
        self.uart
    }

    fn handle(&self) -> Option<UartHandle> {
        critical_section::with(|cs| self.inner.borrow_ref(cs).handle)
    }

    /// Queue `text`, split into message-sized pieces. Returns the token of
    /// the last piece, or `None` for empty text.
    pub fn print(&self, text: &str, sys: &System) -> Result<Option<Token>, UartError> {
        self.write_bytes(text.as_bytes(), sys)
    }

    pub fn write_bytes(&self, bytes: &[u8], sys: &System) -> Result<Option<Token>, UartError> {
        let handle = self.handle().ok_or(UartError::NotAssigned)?;
        let mut last = None;
        for chunk in bytes.chunks(MESSAGE_MAX_SIZE) {
            match self.uart.write_data(handle, chunk, sys) {
                Ok(token) => last = Some(token),
                Err(e) => {
                    critical_section::with(|cs| {
                        let mut inner = self.inner.borrow_ref_mut(cs);
                        inner.dropped = inner.dropped.wrapping_add(1);
                    });
                    return Err(e);
                }
            }
        }
        Ok(last)
    }

    /// `ufmt` writer that batches output into whole messages
    pub fn writer<'c>(&'c self, sys: &'c System) -> ConsoleWriter<'c, 'a, P, D> {
        ConsoleWriter {
            console: self,
            sys,
            pending: Vec::new(),
        }
    }

    /// Format a single value straight to the console
    pub fn show<T: uDisplay + ?Sized>(&self, value: &T, sys: &System) -> Result<(), UartError> {
        let mut writer = self.writer(sys);
        uwrite!(writer, "{}", value)?;
        writer.finish()
    }

    pub fn set_echo(&self, echo: bool) {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).echo = echo);
    }

    pub fn dropped(&self) -> u32 {
        critical_section::with(|cs| self.inner.borrow_ref(cs).dropped)
    }

    pub fn state(&self) -> ConsoleState {
        critical_section::with(|cs| self.inner.borrow_ref(cs).state)
    }

    fn echo_received(&self, handle: UartHandle, sys: &System) {
        let mut echo: Vec<u8, DEBUG_RX_BUFFER_SIZE> = Vec::new();
        while echo.len() + 3 <= echo.capacity() {
            let Some(byte) = self.uart.read_byte(handle) else {
                break;
            };
            // capacity checked above
            let _ = match byte {
                CARRIAGE_RETURN => echo.extend_from_slice(b"\r\n"),
                BACKSPACE => echo.extend_from_slice(&[BACKSPACE, b' ', BACKSPACE]),
                other => echo.push(other).map_err(|_| ()),
            };
        }

        let enabled = critical_section::with(|cs| self.inner.borrow_ref(cs).echo);
        if enabled && !echo.is_empty() {
            if let Err(e) = self.write_bytes(&echo, sys) {
                log_warn!("echo dropped: {:?}", e);
            }
        }
    }
}

impl<P: UartPort, D: DelayMs<u8>> Task for SerialConsole<'_, P, D> {
    fn id(&self) -> TaskId {
        TaskId::Debug
    }

    fn dependencies(&self) -> &'static [TaskId] {
        &[TaskId::Uart]
    }

    fn initialize(&self, sys: &System) -> Result<(), InitError> {
        let rx_buffer = critical_section::with(|cs| self.inner.borrow_ref_mut(cs).rx_buffer.take());
        let Some(rx_buffer) = rx_buffer else {
            log_error!("debug console has no receive buffer");
            critical_section::with(|cs| self.inner.borrow_ref_mut(cs).state = ConsoleState::Error);
            return Err(InitError::InvalidConfig);
        };

        let requested = self.uart.request(UartConfig {
            id: UartId::Usart0,
            baud: UART_BAUD,
            rx_buffer,
            on_receive: None,
        });
        let handle = match requested {
            Ok(handle) => handle,
            Err(e) => {
                log_error!("debug console uart: {:?}", e);
                critical_section::with(|cs| self.inner.borrow_ref_mut(cs).state = ConsoleState::Error);
                return Err(InitError::ResourceUnavailable);
            }
        };
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            inner.handle = Some(handle);
            inner.state = ConsoleState::Idle;
        });

        let mut writer = self.writer(sys);
        let banner = uwrite!(writer, "{}Firmware version {}\r\n", BANNER, env!("CARGO_PKG_VERSION"))
            .and_then(|_| writer.finish());
        if let Err(e) = banner {
            log_warn!("banner dropped: {:?}", e);
        }
        Ok(())
    }

    fn run_active_state(&self, sys: &System) {
        let (state, handle) = critical_section::with(|cs| {
            let inner = self.inner.borrow_ref(cs);
            (inner.state, inner.handle)
        });
        if let (ConsoleState::Idle, Some(handle)) = (state, handle) {
            self.echo_received(handle, sys);
        }
    }
}

/// Buffers formatted output and queues it a full message at a time.
/// Call [`finish`](ConsoleWriter::finish) to queue the remainder; dropping
/// the writer does the same but loses the error.
pub struct ConsoleWriter<'c, 'a, P: UartPort, D: DelayMs<u8>> {
    console: &'c SerialConsole<'a, P, D>,
    sys: &'c System,
    pending: Vec<u8, MESSAGE_MAX_SIZE>,
}

impl<P: UartPort, D: DelayMs<u8>> ConsoleWriter<'_, '_, P, D> {
    fn flush(&mut self) -> Result<(), UartError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let result = self.console.write_bytes(&self.pending, self.sys).map(|_| ());
        self.pending.clear();
        result
    }

    pub fn finish(mut self) -> Result<(), UartError> {
        self.flush()
    }
}

impl<P: UartPort, D: DelayMs<u8>> uWrite for ConsoleWriter<'_, '_, P, D> {
    type Error = UartError;

    fn write_str(&mut self, s: &str) -> Result<(), UartError> {
        for &byte in s.as_bytes() {
            if self.pending.is_full() {
                self.flush()?;
            }
            // flushed above when full
            let _ = self.pending.push(byte);
        }
        Ok(())
    }
}

impl<P: UartPort, D: DelayMs<u8>> Drop for ConsoleWriter<'_, '_, P, D> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
