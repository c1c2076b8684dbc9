use crate::os::System;

/// Low-power wait. Returns on any interrupt; the caller decides whether
/// that interrupt was the one it was waiting for.
pub trait Sleep {
    fn sleep(&mut self, sys: &System);
}

#[cfg(target_arch = "avr")]
pub use self::avr::{Power, SleepMode};

#[cfg(target_arch = "avr")]
mod avr {
    use avr_device::atmega128a::CPU;

    use super::Sleep;
    use crate::os::System;

    const SE: u8 = 0x20;
    const SM_MASK: u8 = 0x1C;

    #[derive(Clone, Copy)]
    #[repr(u8)]
    pub enum SleepMode {
        Idle = 0,
        AdcNoiseReduction = 1,
        PowerDown = 2,
        PowerSave = 3,
        Standby = 6,
        ExtendedStandby = 7,
    }

    impl SleepMode {
        // SM2 sits above SM1:0 in MCUCR on the ATmega128
        const fn mcucr_bits(self) -> u8 {
            let m = self as u8;
            ((m & 0x03) << 3) | (m & 0x04)
        }
    }

    pub struct Power {
        mode: SleepMode,
    }

    impl Power {
        pub fn new(mode: SleepMode) -> Self {
            let mut power = Self { mode };
            power.set_sleep_mode(mode);
            power
        }

        pub fn set_sleep_mode(&mut self, mode: SleepMode) {
            self.mode = mode;
            unsafe {
                (*CPU::ptr())
                    .mcucr
                    .modify(|r, w| w.bits((r.bits() & !SM_MASK) | mode.mcucr_bits()));
            }
        }

        pub fn mode(&self) -> SleepMode {
            self.mode
        }
    }

    impl Sleep for Power {
        #[inline]
        fn sleep(&mut self, _sys: &System) {
            unsafe {
                (*CPU::ptr()).mcucr.modify(|r, w| w.bits(r.bits() | SE));
            }
            avr_device::asm::sleep();
            unsafe {
                (*CPU::ptr()).mcucr.modify(|r, w| w.bits(r.bits() & !SE));
            }
        }
    }
}
