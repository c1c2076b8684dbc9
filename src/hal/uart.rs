//! USART peripheral access.
//!
//! The transport driver owns the ports and does all buffering itself; this
//! layer only moves single bytes and switches interrupts.

use embedded_hal::serial;

/// Receive-side line faults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineError {
    /// A byte arrived before the previous one was read
    Overrun,
    Framing,
    Parity,
}

pub trait UartPort: serial::Read<u8, Error = LineError> + serial::Write<u8, Error = LineError> {
    /// Configure framing (8N1) and baud, enable receiver, transmitter and
    /// the receive interrupt.
    fn enable(&mut self, baud: u32);

    /// Turn the peripheral off and mask all its interrupts
    fn disable(&mut self);

    /// Unmask the "transmit register empty" interrupt
    fn listen_tx(&mut self);

    fn unlisten_tx(&mut self);

    fn is_listening_tx(&self) -> bool;
}

/// U2X divisor, rounded to nearest
pub const fn ubrr_for(cpu_hz: u32, baud: u32) -> u16 {
    ((cpu_hz + 4 * baud) / (8 * baud) - 1) as u16
}

#[cfg(target_arch = "avr")]
pub use self::avr::{Usart, Usart0, Usart1};

#[cfg(target_arch = "avr")]
mod avr {
    use avr_device::atmega128a::{USART0, USART1};
    use embedded_hal::serial;

    use super::{ubrr_for, LineError, UartPort};
    use crate::config::CPU_FREQ_HZ;

    // UCSRnA
    const RXC: u8 = 1 << 7;
    const TXC: u8 = 1 << 6;
    const UDRE: u8 = 1 << 5;
    const FE: u8 = 1 << 4;
    const DOR: u8 = 1 << 3;
    const UPE: u8 = 1 << 2;
    const U2X: u8 = 1 << 1;
    // UCSRnB
    const RXCIE: u8 = 1 << 7;
    const UDRIE: u8 = 1 << 5;
    const RXEN: u8 = 1 << 4;
    const TXEN: u8 = 1 << 3;
    // UCSRnC: 8 data bits
    const UCSZ_8: u8 = 0x06;

    macro_rules! usart {
        ($Name:ident, $USART:ident, $regs:ident, $udr:ident, $ucsra:ident, $ucsrb:ident, $ucsrc:ident, $ubrrh:ident, $ubrrl:ident) => {
            pub struct $Name {
                _private: (),
            }

            impl $Name {
                /// Register access only; nothing is configured until `enable`
                pub const fn new() -> Self {
                    Self { _private: () }
                }

                #[inline]
                fn regs(&self) -> &avr_device::atmega128a::$regs::RegisterBlock {
                    unsafe { &*$USART::ptr() }
                }
            }

            impl serial::Read<u8> for $Name {
                type Error = LineError;

                fn read(&mut self) -> nb::Result<u8, LineError> {
                    let regs = self.regs();
                    let status = regs.$ucsra.read().bits();
                    if status & RXC == 0 {
                        return Err(nb::Error::WouldBlock);
                    }
                    // Status must be read before UDR
                    let byte = regs.$udr.read().bits();
                    if status & DOR != 0 {
                        Err(nb::Error::Other(LineError::Overrun))
                    } else if status & FE != 0 {
                        Err(nb::Error::Other(LineError::Framing))
                    } else if status & UPE != 0 {
                        Err(nb::Error::Other(LineError::Parity))
                    } else {
                        Ok(byte)
                    }
                }
            }

            impl serial::Write<u8> for $Name {
                type Error = LineError;

                fn write(&mut self, byte: u8) -> nb::Result<(), LineError> {
                    let regs = self.regs();
                    if regs.$ucsra.read().bits() & UDRE == 0 {
                        return Err(nb::Error::WouldBlock);
                    }
                    regs.$udr.write(|w| w.bits(byte));
                    Ok(())
                }

                fn flush(&mut self) -> nb::Result<(), LineError> {
                    if self.regs().$ucsra.read().bits() & TXC == 0 {
                        Err(nb::Error::WouldBlock)
                    } else {
                        Ok(())
                    }
                }
            }

            impl UartPort for $Name {
                fn enable(&mut self, baud: u32) {
                    let ubrr = ubrr_for(CPU_FREQ_HZ, baud);
                    let regs = self.regs();
                    avr_device::interrupt::free(|_| unsafe {
                        regs.$ubrrh.write(|w| w.bits((ubrr >> 8) as u8));
                        regs.$ubrrl.write(|w| w.bits(ubrr as u8));
                        regs.$ucsra.write(|w| w.bits(U2X));
                        regs.$ucsrc.write(|w| w.bits(UCSZ_8));
                        regs.$ucsrb.write(|w| w.bits(RXCIE | RXEN | TXEN));
                    });
                }

                fn disable(&mut self) {
                    let regs = self.regs();
                    avr_device::interrupt::free(|_| unsafe {
                        regs.$ucsrb.write(|w| w.bits(0));
                    });
                }

                fn listen_tx(&mut self) {
                    let regs = self.regs();
                    avr_device::interrupt::free(|_| unsafe {
                        regs.$ucsrb.modify(|r, w| w.bits(r.bits() | UDRIE));
                    });
                }

                fn unlisten_tx(&mut self) {
                    let regs = self.regs();
                    avr_device::interrupt::free(|_| unsafe {
                        regs.$ucsrb.modify(|r, w| w.bits(r.bits() & !UDRIE));
                    });
                }

                fn is_listening_tx(&self) -> bool {
                    self.regs().$ucsrb.read().bits() & UDRIE != 0
                }
            }
        };
    }

    usart!(Usart0, USART0, usart0, udr0, ucsr0a, ucsr0b, ucsr0c, ubrr0h, ubrr0l);
    usart!(Usart1, USART1, usart1, udr1, ucsr1a, ucsr1b, ucsr1c, ubrr1h, ubrr1l);

    /// Either USART behind one type, so a driver can hold both in an array
    pub enum Usart {
        Usart0(Usart0),
        Usart1(Usart1),
    }

    macro_rules! dispatch {
        ($self:ident, $p:ident => $e:expr) => {
            match $self {
                Usart::Usart0($p) => $e,
                Usart::Usart1($p) => $e,
            }
        };
    }

    impl serial::Read<u8> for Usart {
        type Error = LineError;

        fn read(&mut self) -> nb::Result<u8, LineError> {
            dispatch!(self, p => p.read())
        }
    }

    impl serial::Write<u8> for Usart {
        type Error = LineError;

        fn write(&mut self, byte: u8) -> nb::Result<(), LineError> {
            dispatch!(self, p => p.write(byte))
        }

        fn flush(&mut self) -> nb::Result<(), LineError> {
            dispatch!(self, p => p.flush())
        }
    }

    impl UartPort for Usart {
        fn enable(&mut self, baud: u32) {
            dispatch!(self, p => p.enable(baud))
        }

        fn disable(&mut self) {
            dispatch!(self, p => p.disable())
        }

        fn listen_tx(&mut self) {
            dispatch!(self, p => p.listen_tx())
        }

        fn unlisten_tx(&mut self) {
            dispatch!(self, p => p.unlisten_tx())
        }

        fn is_listening_tx(&self) -> bool {
            dispatch!(self, p => p.is_listening_tx())
        }
    }
}
