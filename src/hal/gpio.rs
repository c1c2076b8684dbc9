//! GPIO lines described by the board tables.
//!
//! Drivers only see `embedded_hal` digital traits plus `InterruptPin`, so
//! the same driver code runs against AVR port registers and host fakes.

/// Logic level that means "active" for a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActiveLevel {
    High,
    Low,
}

impl ActiveLevel {
    #[inline]
    pub const fn is_active(self, high: bool) -> bool {
        match self {
            ActiveLevel::High => high,
            ActiveLevel::Low => !high,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Port {
    A,
    B,
    C,
    D,
    E,
    F,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinConfig {
    pub port: Port,
    pub bit: u8,
    pub level: ActiveLevel,
}

impl PinConfig {
    pub const fn new(port: Port, bit: u8, level: ActiveLevel) -> Self {
        Self { port, bit, level }
    }

    #[inline]
    pub const fn mask(&self) -> u8 {
        1 << self.bit
    }
}

/// Per-pin edge interrupt control
pub trait InterruptPin {
    fn enable_interrupt(&mut self);
    fn disable_interrupt(&mut self);
}

// BigAVR2 board wiring
pub mod board {
    use super::{ActiveLevel, PinConfig, Port};

    pub const BUTTON_COUNT: usize = 4;
    pub const LED_COUNT: usize = 4;

    /// Buttons sit on INT4..INT7 and pull the line low when pressed
    pub const BUTTONS: [PinConfig; BUTTON_COUNT] = [
        PinConfig::new(Port::E, 4, ActiveLevel::Low),
        PinConfig::new(Port::E, 5, ActiveLevel::Low),
        PinConfig::new(Port::E, 6, ActiveLevel::Low),
        PinConfig::new(Port::E, 7, ActiveLevel::Low),
    ];

    pub const LEDS: [PinConfig; LED_COUNT] = [
        PinConfig::new(Port::A, 0, ActiveLevel::High),
        PinConfig::new(Port::A, 1, ActiveLevel::High),
        PinConfig::new(Port::A, 2, ActiveLevel::High),
        PinConfig::new(Port::A, 3, ActiveLevel::High),
    ];
}

#[cfg(target_arch = "avr")]
pub use self::avr::{configure_board, InputLine, OutputLine};

#[cfg(target_arch = "avr")]
mod avr {
    use core::convert::Infallible;

    use avr_device::atmega128a::{EXINT, PORTA, PORTB, PORTC, PORTD, PORTE, PORTF};
    use embedded_hal::digital::v2::{InputPin, OutputPin, ToggleableOutputPin};

    use super::{board, InterruptPin, PinConfig, Port};

    macro_rules! with_port {
        ($port:expr, |$ddr:ident, $out:ident, $inp:ident| $body:expr) => {
            unsafe {
                match $port {
                    Port::A => { let p = &*PORTA::ptr(); let ($ddr, $out, $inp) = (&p.ddra, &p.porta, &p.pina); $body }
                    Port::B => { let p = &*PORTB::ptr(); let ($ddr, $out, $inp) = (&p.ddrb, &p.portb, &p.pinb); $body }
                    Port::C => { let p = &*PORTC::ptr(); let ($ddr, $out, $inp) = (&p.ddrc, &p.portc, &p.pinc); $body }
                    Port::D => { let p = &*PORTD::ptr(); let ($ddr, $out, $inp) = (&p.ddrd, &p.portd, &p.pind); $body }
                    Port::E => { let p = &*PORTE::ptr(); let ($ddr, $out, $inp) = (&p.ddre, &p.porte, &p.pine); $body }
                    Port::F => { let p = &*PORTF::ptr(); let ($ddr, $out, $inp) = (&p.ddrf, &p.portf, &p.pinf); $body }
                }
            }
        };
    }

    /// Set data direction for every line in the board tables: buttons as
    /// inputs without pull-up, LEDs as outputs driven inactive.
    pub fn configure_board() {
        avr_device::interrupt::free(|_| {
            for cfg in board::BUTTONS.iter() {
                let mask = cfg.mask();
                with_port!(cfg.port, |ddr, out, _inp| {
                    ddr.modify(|r, w| w.bits(r.bits() & !mask));
                    out.modify(|r, w| w.bits(r.bits() & !mask));
                })
            }
            for cfg in board::LEDS.iter() {
                let mask = cfg.mask();
                let idle_high = !cfg.level.is_active(true);
                with_port!(cfg.port, |ddr, out, _inp| {
                    out.modify(|r, w| {
                        if idle_high {
                            w.bits(r.bits() | mask)
                        } else {
                            w.bits(r.bits() & !mask)
                        }
                    });
                    ddr.modify(|r, w| w.bits(r.bits() | mask));
                })
            }
        });
    }

    pub struct InputLine {
        cfg: PinConfig,
    }

    impl InputLine {
        pub const fn new(cfg: PinConfig) -> Self {
            Self { cfg }
        }
    }

    impl InputPin for InputLine {
        type Error = Infallible;

        fn is_high(&self) -> Result<bool, Self::Error> {
            let mask = self.cfg.mask();
            Ok(with_port!(self.cfg.port, |_ddr, _out, inp| inp.read().bits() & mask != 0))
        }

        fn is_low(&self) -> Result<bool, Self::Error> {
            self.is_high().map(|h| !h)
        }
    }

    /// Only INT4..INT7 on port E are wired to buttons
    impl InterruptPin for InputLine {
        fn enable_interrupt(&mut self) {
            if self.cfg.port != Port::E || self.cfg.bit < 4 {
                return;
            }
            let mask = self.cfg.mask();
            avr_device::interrupt::free(|_| unsafe {
                let exint = &*EXINT::ptr();
                // Any logical change
                let shift = (self.cfg.bit - 4) * 2;
                exint
                    .eicrb
                    .modify(|r, w| w.bits((r.bits() & !(0x03 << shift)) | (0x01 << shift)));
                exint.eifr.write(|w| w.bits(mask));
                exint.eimsk.modify(|r, w| w.bits(r.bits() | mask));
            });
        }

        fn disable_interrupt(&mut self) {
            if self.cfg.port != Port::E || self.cfg.bit < 4 {
                return;
            }
            let mask = self.cfg.mask();
            avr_device::interrupt::free(|_| unsafe {
                (*EXINT::ptr()).eimsk.modify(|r, w| w.bits(r.bits() & !mask));
            });
        }
    }

    pub struct OutputLine {
        cfg: PinConfig,
    }

    impl OutputLine {
        pub const fn new(cfg: PinConfig) -> Self {
            Self { cfg }
        }
    }

    impl OutputPin for OutputLine {
        type Error = Infallible;

        fn set_high(&mut self) -> Result<(), Self::Error> {
            let mask = self.cfg.mask();
            avr_device::interrupt::free(|_| {
                with_port!(self.cfg.port, |_ddr, out, _inp| {
                    out.modify(|r, w| w.bits(r.bits() | mask))
                })
            });
            Ok(())
        }

        fn set_low(&mut self) -> Result<(), Self::Error> {
            let mask = self.cfg.mask();
            avr_device::interrupt::free(|_| {
                with_port!(self.cfg.port, |_ddr, out, _inp| {
                    out.modify(|r, w| w.bits(r.bits() & !mask))
                })
            });
            Ok(())
        }
    }

    impl ToggleableOutputPin for OutputLine {
        type Error = Infallible;

        fn toggle(&mut self) -> Result<(), Self::Error> {
            let mask = self.cfg.mask();
            avr_device::interrupt::free(|_| {
                with_port!(self.cfg.port, |_ddr, out, _inp| {
                    out.modify(|r, w| w.bits(r.bits() ^ mask))
                })
            });
            Ok(())
        }
    }
}
