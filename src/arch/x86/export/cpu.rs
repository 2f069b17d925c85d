/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use core::sync::atomic::{AtomicU8, Ordering};

use crate::arch::x86::cpuid::local_apic_id;
use crate::task::cpu::{MAX_CPUS, NR_CPUS};

const UNREGISTERED: u8 = u8::MAX;

/// Core index for each local APIC ID, filled as cores come up.
static CORE_BY_APIC_ID: [AtomicU8; 256]
    = [const { AtomicU8::new(UNREGISTERED) }; 256];

/// Gives the executing core the next free core index. Must be called once by
/// each core during bring-up, the bootstrap processor first.
pub fn register_core() -> Option<usize> {
    let apic_id = local_apic_id() as usize;
    let index = NR_CPUS.fetch_add(1, Ordering::SeqCst);

    if index >= MAX_CPUS {
        NR_CPUS.fetch_sub(1, Ordering::SeqCst);
        return None;
    }

    CORE_BY_APIC_ID[apic_id].store(index as u8, Ordering::SeqCst);
    Some(index)
}

/// Index of the executing core. Only meaningful while the caller cannot be
/// migrated, i.e. inside a critical region.
pub fn core_id() -> usize {
    match CORE_BY_APIC_ID[local_apic_id() as usize].load(Ordering::Relaxed) {
        UNREGISTERED => 0,
        index => index as usize,
    }
}

pub fn page_fault_address() -> usize {
    unsafe { x86::controlregs::cr2() }
}

pub fn halt() {
    unsafe { x86::halt(); }
}

pub fn perm_halt() -> ! {
    unsafe { x86::irq::disable() };
    loop {
        halt();
    }
}
