//! Cooperative super-loop firmware for the ATmega128.
//!
//! Every task runs its active state once per 1 ms loop pass. UART output is
//! queued as tracked messages whose delivery can be queried by token;
//! buttons are debounced from their edge interrupts.
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod logging;

pub mod application;
pub mod config;
pub mod diagnostics;
pub mod drivers;
pub mod hal;
pub mod messaging;
pub mod os;
pub mod rtos;
