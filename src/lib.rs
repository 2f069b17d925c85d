/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

#![cfg_attr(not(test), no_std)]

#![allow(unused_unsafe)]

extern crate alloc;

pub mod arch;
pub mod logging;
pub mod sync;
pub mod panic;
pub mod misc;
pub mod mem;
pub mod fs;
pub mod clock;
pub mod elf;
pub mod task;
pub mod exception;
pub mod syscall;

#[cfg(not(test))]
use core::panic::PanicInfo;
#[cfg(not(test))]
use crate::panic::panic_at_state;

#[cfg(not(test))]
#[panic_handler]
fn panic_handler(panic_info: &PanicInfo) -> ! {
    if let Some(location) = panic_info.location() {
        panic_at_state(
            format_args!("Rust: {} ({})", panic_info.message(), location),
            None
        );
    } else {
        panic_at_state(
            format_args!("Rust: {}", panic_info.message()),
            None
        );
    }
}
