//! System context: tick-driven time keeping, system-wide flags and the
//! shared message-status service.
//!
//! One `System` exists for the life of the firmware. Interrupt handlers and
//! tasks share it by reference; every field has a single writer (the tick
//! interrupt for the counters, the owning task for its flag).

use core::cell::Cell;

use critical_section::Mutex;

use crate::config::TICK_PERIOD_MS;
use crate::hal::power::Sleep;
use crate::messaging::Messaging;
use crate::rtos::TaskId;
use crate::log_error;

/// Returns true iff at least `duration` ms separate `reference` and `now`.
///
/// Unsigned wrapping subtraction keeps the result correct across the 32-bit
/// millisecond rollover (~49.7 days).
#[inline]
pub const fn is_time_up(reference: u32, now: u32, duration: u32) -> bool {
    now.wrapping_sub(reference) >= duration
}

/// System-wide status flags
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SystemFlags {
    /// Set for the whole initialization phase
    pub initializing: bool,
    /// Set before the low-power wait, cleared by the tick interrupt
    pub sleeping: bool,
    /// Oscillator or clock setup failed at boot
    pub clock_fault: bool,
    /// At least one loop pass overran its budget
    pub time_violation: bool,
}

/// One bit per task: set when the task initialized successfully
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ApplicationFlags(u16);

impl ApplicationFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn is_ready(self, task: TaskId) -> bool {
        self.0 & task.mask() != 0
    }

    #[inline]
    pub fn set_ready(&mut self, task: TaskId) {
        self.0 |= task.mask();
    }

    pub const fn bits(self) -> u16 {
        self.0
    }
}

pub struct System {
    time_ms: Mutex<Cell<u32>>,
    time_s: Mutex<Cell<u32>>,
    flags: Mutex<Cell<SystemFlags>>,
    app_flags: Mutex<Cell<ApplicationFlags>>,
    messaging: Messaging,
}

impl System {
    pub const fn new() -> Self {
        Self {
            time_ms: Mutex::new(Cell::new(0)),
            time_s: Mutex::new(Cell::new(0)),
            flags: Mutex::new(Cell::new(SystemFlags {
                initializing: false,
                sleeping: false,
                clock_fault: false,
                time_violation: false,
            })),
            app_flags: Mutex::new(Cell::new(ApplicationFlags::empty())),
            messaging: Messaging::new(),
        }
    }

    /// Tick interrupt body. Keep it short: it preempts everything.
    #[inline]
    pub fn tick(&self) {
        critical_section::with(|cs| {
            let flags = self.flags.borrow(cs);
            let mut f = flags.get();
            f.sleeping = false;
            flags.set(f);

            let ms = self.time_ms.borrow(cs);
            let now = ms.get().wrapping_add(TICK_PERIOD_MS);
            ms.set(now);
            if now % 1000 == 0 {
                let s = self.time_s.borrow(cs);
                s.set(s.get().wrapping_add(1));
            }
        });
    }

    /// Milliseconds since boot
    #[inline]
    pub fn now_ms(&self) -> u32 {
        critical_section::with(|cs| self.time_ms.borrow(cs).get())
    }

    /// Seconds since boot
    #[inline]
    pub fn now_s(&self) -> u32 {
        critical_section::with(|cs| self.time_s.borrow(cs).get())
    }

    /// `is_time_up` against the live millisecond counter. Side-effect free:
    /// the caller resets its own timestamp.
    #[inline]
    pub fn is_time_up(&self, reference: u32, duration: u32) -> bool {
        is_time_up(reference, self.now_ms(), duration)
    }

    pub fn flags(&self) -> SystemFlags {
        critical_section::with(|cs| self.flags.borrow(cs).get())
    }

    pub fn update_flags(&self, f: impl FnOnce(&mut SystemFlags)) {
        critical_section::with(|cs| {
            let cell = self.flags.borrow(cs);
            let mut flags = cell.get();
            f(&mut flags);
            cell.set(flags);
        });
    }

    /// Boot check that the tick interrupt is running: poll the counter up
    /// to `spins` times. A counter that never moves sets `clock_fault`.
    pub fn verify_tick(&self, spins: u32) -> bool {
        let start = self.now_ms();
        for _ in 0..spins {
            if self.now_ms() != start {
                return true;
            }
            core::hint::spin_loop();
        }
        log_error!("system tick is not running");
        self.update_flags(|f| f.clock_fault = true);
        false
    }

    #[inline]
    pub fn is_initializing(&self) -> bool {
        self.flags().initializing
    }

    pub fn application_flags(&self) -> ApplicationFlags {
        critical_section::with(|cs| self.app_flags.borrow(cs).get())
    }

    pub fn set_task_ready(&self, task: TaskId) {
        critical_section::with(|cs| {
            let cell = self.app_flags.borrow(cs);
            let mut flags = cell.get();
            flags.set_ready(task);
            cell.set(flags);
        });
    }

    pub fn messaging(&self) -> &Messaging {
        &self.messaging
    }

    /// Low-power wait until the next tick. Wakeups from other interrupts
    /// go straight back to sleep while `sleeping` is still set.
    pub fn sleep_until_tick<S: Sleep>(&self, power: &mut S) {
        self.update_flags(|f| f.sleeping = true);
        while self.flags().sleeping {
            power.sleep(self);
        }
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_tick_is_a_clock_fault() {
        let sys = System::new();
        assert!(!sys.verify_tick(1000));
        assert!(sys.flags().clock_fault);
    }

    #[test]
    fn running_tick_passes_the_check() {
        let sys = System::new();
        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(std::time::Duration::from_millis(2));
                sys.tick();
            });
            assert!(sys.verify_tick(u32::MAX));
        });
        assert!(!sys.flags().clock_fault);
    }

    #[test]
    fn time_up_at_exact_duration() {
        assert!(!is_time_up(100, 109, 10));
        assert!(is_time_up(100, 110, 10));
        assert!(is_time_up(100, 111, 10));
    }

    #[test]
    fn time_up_across_rollover() {
        let reference = u32::MAX - 4;
        // 5 ms elapsed at the wrap
        assert!(!is_time_up(reference, 0, 6));
        assert!(is_time_up(reference, 0, 5));
        assert!(!is_time_up(reference, 4, 10));
        assert!(is_time_up(reference, 5, 10));
        assert!(is_time_up(reference, 6, 10));
    }

    #[test]
    fn time_up_matches_modular_difference() {
        let points = [0u32, 1, 999, u32::MAX / 2, u32::MAX - 1, u32::MAX];
        for &reference in &points {
            for &now in &points {
                for &duration in &[0u32, 1, 10, u32::MAX] {
                    let expected = now.wrapping_sub(reference) >= duration;
                    assert_eq!(is_time_up(reference, now, duration), expected);
                }
            }
        }
    }

    #[test]
    fn zero_duration_is_always_up() {
        assert!(is_time_up(42, 42, 0));
    }

    #[test]
    fn tick_advances_ms_and_seconds() {
        let system = System::new();
        for _ in 0..999 {
            system.tick();
        }
        assert_eq!(system.now_ms(), 999);
        assert_eq!(system.now_s(), 0);
        system.tick();
        assert_eq!(system.now_ms(), 1000);
        assert_eq!(system.now_s(), 1);
    }

    #[test]
    fn tick_clears_sleeping() {
        let system = System::new();
        system.update_flags(|f| f.sleeping = true);
        system.tick();
        assert!(!system.flags().sleeping);
    }

    #[test]
    fn application_flags_track_each_task() {
        let system = System::new();
        system.set_task_ready(TaskId::Button);
        let flags = system.application_flags();
        assert!(flags.is_ready(TaskId::Button));
        assert!(!flags.is_ready(TaskId::Uart));
    }

    #[test]
    fn sleep_returns_after_tick() {
        let system = System::new();
        let mut power = crate::hal::mock::MockSleep::new();
        system.sleep_until_tick(&mut power);
        assert_eq!(system.now_ms(), 1);
        assert_eq!(power.sleeps(), 1);
    }
}
