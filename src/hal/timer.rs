//! 1 ms system tick and a delay that counts ticks.

use embedded_hal::blocking::delay::DelayMs;

use crate::os::System;

/// Busy-waits on the system millisecond counter. Needs the tick interrupt
/// running, which is the case during task initialization.
pub struct TickDelay<'a> {
    sys: &'a System,
}

impl<'a> TickDelay<'a> {
    pub const fn new(sys: &'a System) -> Self {
        Self { sys }
    }
}

impl DelayMs<u8> for TickDelay<'_> {
    fn delay_ms(&mut self, ms: u8) {
        let start = self.sys.now_ms();
        while !self.sys.is_time_up(start, u32::from(ms)) {
            core::hint::spin_loop();
        }
    }
}

#[cfg(target_arch = "avr")]
pub use self::avr::SysTick;

#[cfg(target_arch = "avr")]
mod avr {
    use avr_device::atmega128a::TC0;

    use crate::config::{CPU_FREQ_HZ, TICK_PERIOD_MS};

    const PRESCALE: u32 = 64;
    // CTC, clk/64 (TC0 on the ATmega128 has its own prescaler table)
    const TCCR0_CTC_DIV64: u8 = 0x08 | 0x04;
    const OCIE0: u8 = 0x02;
    const OCR0_TICK: u8 = ((CPU_FREQ_HZ / PRESCALE / 1000 * TICK_PERIOD_MS) - 1) as u8;

    /// Timer 0 in compare-match mode, one interrupt per tick
    pub struct SysTick {
        _private: (),
    }

    impl SysTick {
        pub fn start() -> Self {
            avr_device::interrupt::free(|_| unsafe {
                let tc0 = &*TC0::ptr();
                tc0.tccr0.write(|w| w.bits(0));
                tc0.tcnt0.write(|w| w.bits(0));
                tc0.ocr0.write(|w| w.bits(OCR0_TICK));
                tc0.timsk.modify(|r, w| w.bits(r.bits() | OCIE0));
                tc0.tccr0.write(|w| w.bits(TCCR0_CTC_DIV64));
            });
            Self { _private: () }
        }

        pub fn stop(self) {
            avr_device::interrupt::free(|_| unsafe {
                let tc0 = &*TC0::ptr();
                tc0.timsk.modify(|r, w| w.bits(r.bits() & !OCIE0));
                tc0.tccr0.write(|w| w.bits(0));
            });
        }
    }
}
