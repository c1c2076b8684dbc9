/// Anything the main loop must service once per pass
pub trait Feed {
    fn feed(&mut self);
}

#[cfg(target_arch = "avr")]
pub use self::avr::{Watchdog, WatchdogTimeout};

#[cfg(target_arch = "avr")]
mod avr {
    use avr_device::atmega128a::WDT;

    use super::Feed;

    const WDCE: u8 = 0x10;
    const WDE: u8 = 0x08;

    #[derive(Clone, Copy)]
    #[repr(u8)]
    pub enum WatchdogTimeout {
        Ms16 = 0,
        Ms32 = 1,
        Ms64 = 2,
        Ms125 = 3,
        Ms250 = 4,
        Ms500 = 5,
        Ms1000 = 6,
        Ms2000 = 7,
    }

    impl WatchdogTimeout {
        /// Shortest timeout not below `ms`
        pub const fn at_least(ms: u32) -> Self {
            match ms {
                0..=16 => Self::Ms16,
                17..=32 => Self::Ms32,
                33..=64 => Self::Ms64,
                65..=125 => Self::Ms125,
                126..=250 => Self::Ms250,
                251..=500 => Self::Ms500,
                501..=1000 => Self::Ms1000,
                _ => Self::Ms2000,
            }
        }
    }

    pub struct Watchdog {
        _private: (),
    }

    impl Watchdog {
        pub fn start(timeout: WatchdogTimeout) -> Self {
            avr_device::interrupt::free(|_| unsafe {
                let p = WDT::ptr();
                (*p).wdtcr.write(|w| w.bits(WDCE | WDE));
                (*p).wdtcr.write(|w| w.bits(WDE | timeout as u8));
            });
            Self { _private: () }
        }

        /// Reset the timer without the handle, for waits outside the loop
        #[inline]
        pub fn reset_timer() {
            avr_device::asm::wdr();
        }

        pub fn disable(self) {
            avr_device::interrupt::free(|_| unsafe {
                let p = WDT::ptr();
                (*p).wdtcr.write(|w| w.bits(WDCE | WDE));
                (*p).wdtcr.write(|w| w.bits(0x00));
            });
        }
    }

    impl Feed for Watchdog {
        #[inline]
        fn feed(&mut self) {
            Self::reset_timer();
        }
    }
}
