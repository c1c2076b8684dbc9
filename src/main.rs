#![cfg_attr(target_arch = "avr", no_std)]
#![cfg_attr(target_arch = "avr", no_main)]
#![cfg_attr(target_arch = "avr", feature(abi_avr_interrupt))]

#[cfg(target_arch = "avr")]
mod firmware {
    use core::ptr::addr_of_mut;

    use panic_halt as _;
    use superloop_firmware::application::UserApp;
    use superloop_firmware::config::{DEBUG_RX_BUFFER_SIZE, TICK_CHECK_SPINS, WDT_TIMEOUT_MS};
    use superloop_firmware::drivers::{ButtonHandler, Leds, SerialConsole, Uart, UartId};
    use superloop_firmware::hal::gpio::board::{BUTTONS, LEDS};
    use superloop_firmware::hal::gpio::{configure_board, InputLine, OutputLine, Port};
    use superloop_firmware::hal::power::{Power, SleepMode};
    use superloop_firmware::hal::timer::{SysTick, TickDelay};
    use superloop_firmware::hal::uart::{Usart, Usart0, Usart1};
    use superloop_firmware::hal::watchdog::{Watchdog, WatchdogTimeout};
    use superloop_firmware::os::System;
    use superloop_firmware::rtos::{Scheduler, Task};

    type Usarts = Uart<Usart, TickDelay<'static>>;

    static SYSTEM: System = System::new();
    static UART: Usarts = Uart::new(
        Usart::Usart0(Usart0::new()),
        Usart::Usart1(Usart1::new()),
        TickDelay::new(&SYSTEM),
    );
    static CONSOLE: SerialConsole<'static, Usart, TickDelay<'static>> = SerialConsole::new(&UART);
    static BUTTON_HANDLER: ButtonHandler<InputLine> = ButtonHandler::new(
        [
            InputLine::new(BUTTONS[0]),
            InputLine::new(BUTTONS[1]),
            InputLine::new(BUTTONS[2]),
            InputLine::new(BUTTONS[3]),
        ],
        BUTTONS,
    );
    static LED_DRIVER: Leds<OutputLine> = Leds::new(
        [
            OutputLine::new(LEDS[0]),
            OutputLine::new(LEDS[1]),
            OutputLine::new(LEDS[2]),
            OutputLine::new(LEDS[3]),
        ],
        LEDS,
    );
    static APP: UserApp<'static, InputLine, OutputLine, Usart, TickDelay<'static>> =
        UserApp::new(&BUTTON_HANDLER, &LED_DRIVER, &CONSOLE);

    static mut DEBUG_RX: [u8; DEBUG_RX_BUFFER_SIZE] = [0; DEBUG_RX_BUFFER_SIZE];

    #[avr_device::entry]
    fn main() -> ! {
        configure_board();
        let _tick = SysTick::start();
        let mut watchdog = Watchdog::start(WatchdogTimeout::at_least(u32::from(WDT_TIMEOUT_MS)));
        let mut power = Power::new(SleepMode::Idle);

        // Safety: the only reference ever taken to DEBUG_RX
        let rx = unsafe { &mut *addr_of_mut!(DEBUG_RX) };
        CONSOLE.attach_rx_buffer(rx);

        unsafe { avr_device::interrupt::enable() };
        // Flagged for the diagnostics; a dead tick later stalls manual mode until the watchdog resets
        SYSTEM.verify_tick(TICK_CHECK_SPINS);
        UART.set_watchdog_feed(Watchdog::reset_timer);

        let mut scheduler = Scheduler::new();
        let tasks: [&'static dyn Task; 6] = [
            SYSTEM.messaging(),
            &UART,
            &CONSOLE,
            &BUTTON_HANDLER,
            &LED_DRIVER,
            &APP,
        ];
        for task in tasks {
            // Six tasks, all distinct, fit in MAX_TASKS
            let _ = scheduler.add_task(task);
        }
        let initialized = scheduler.initialize(&SYSTEM, |report| {
            let _ = CONSOLE.show(report, &SYSTEM);
        });
        if initialized.is_err() {
            // Unresolvable task graph; let the watchdog reset us
            loop {
                avr_device::asm::nop();
            }
        }

        scheduler.run(&SYSTEM, &mut watchdog, &mut power)
    }

    #[avr_device::interrupt(atmega128a)]
    fn TIMER0_COMP() {
        SYSTEM.tick();
    }

    #[avr_device::interrupt(atmega128a)]
    fn USART0_RX() {
        UART.handle_interrupt(UartId::Usart0, &SYSTEM);
    }

    #[avr_device::interrupt(atmega128a)]
    fn USART0_UDRE() {
        UART.handle_interrupt(UartId::Usart0, &SYSTEM);
    }

    #[avr_device::interrupt(atmega128a)]
    fn USART1_RX() {
        UART.handle_interrupt(UartId::Usart1, &SYSTEM);
    }

    #[avr_device::interrupt(atmega128a)]
    fn USART1_UDRE() {
        UART.handle_interrupt(UartId::Usart1, &SYSTEM);
    }

    #[avr_device::interrupt(atmega128a)]
    fn INT4() {
        BUTTON_HANDLER.start_debounce(Port::E, 1 << 4, &SYSTEM);
    }

    #[avr_device::interrupt(atmega128a)]
    fn INT5() {
        BUTTON_HANDLER.start_debounce(Port::E, 1 << 5, &SYSTEM);
    }

    #[avr_device::interrupt(atmega128a)]
    fn INT6() {
        BUTTON_HANDLER.start_debounce(Port::E, 1 << 6, &SYSTEM);
    }

    #[avr_device::interrupt(atmega128a)]
    fn INT7() {
        BUTTON_HANDLER.start_debounce(Port::E, 1 << 7, &SYSTEM);
    }
}

#[cfg(not(target_arch = "avr"))]
fn main() {
    eprintln!("superloop_firmware runs on the ATmega128 only; build it for the avr-atmega128 target");
}
