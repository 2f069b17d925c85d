/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! Log sink writing to the first serial port, polled, 115200 bauds 8N1.

use core::fmt;
use core::fmt::Write;
use x86::io::{inb, outb};

use crate::logging::{set_logger, Logger, Severity};
use crate::sync::Spinlock;

const COM1: u16 = 0x03f8;

const REG_DATA: u16 = 0;
const REG_IRQ_ENABLE: u16 = 1;
const REG_LINE_CTRL: u16 = 3;
const REG_LINE_STATUS: u16 = 5;

/// With DLAB set, the data and IRQ enable registers hold the baud divisor.
const LINE_CTRL_DLAB: u8 = 1 << 7;
const LINE_CTRL_8N1: u8 = 0b11;
const LINE_STATUS_THR_EMPTY: u8 = 1 << 5;

/// Divisor of the 115200 Hz UART clock.
const BAUD_DIVISOR: u16 = 1;

/// The port itself. Only reachable through the logger's lock, once set up.
struct Com1;

impl Com1 {
    unsafe fn setup() -> Self {
        unsafe {
            outb(COM1 + REG_IRQ_ENABLE, 0x00);
            outb(COM1 + REG_LINE_CTRL, LINE_CTRL_DLAB);
            outb(COM1 + REG_DATA, (BAUD_DIVISOR & 0xff) as u8);
            outb(COM1 + REG_IRQ_ENABLE, (BAUD_DIVISOR >> 8) as u8);
            outb(COM1 + REG_LINE_CTRL, LINE_CTRL_8N1);
        }

        Com1
    }

    fn put(&mut self, byte: u8) {
        while unsafe { inb(COM1 + REG_LINE_STATUS) } & LINE_STATUS_THR_EMPTY == 0 {
            core::hint::spin_loop();
        }
        unsafe { outb(COM1 + REG_DATA, byte) };
    }
}

impl fmt::Write for Com1 {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        s.bytes().for_each(|byte| self.put(byte));
        Ok(())
    }
}

pub struct SerialLogger(Spinlock<Option<Com1>>);

pub static LOGGER_SERIAL: SerialLogger = SerialLogger(Spinlock::new(None));

impl Logger for SerialLogger {
    fn log(&self, severity: Severity, args: fmt::Arguments) {
        let mut port = self.0.lock();
        let Some(port) = port.as_mut() else {
            return;
        };

        // Nowhere left to report a failed write.
        let _ = write!(port, "{}{:>8}: {}\x1b[0m\n",
                       severity.color(), severity.label(), args);
    }
}

/// Sets COM1 up and makes it the default logger.
///
/// # Safety #
///
/// Must be called once, by the bootstrap processor, with nothing else
/// driving the COM1 I/O ports.
pub unsafe fn init() {
    *LOGGER_SERIAL.0.lock() = Some(unsafe { Com1::setup() });
    set_logger(&LOGGER_SERIAL);
}
