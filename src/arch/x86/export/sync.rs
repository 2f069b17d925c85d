/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::arch::cpu::core_id;
use crate::task::cpu::MAX_CPUS;

struct CriticalRegionState {
    depth: AtomicU32,
    /// Interrupt flag observed when the outermost region was entered.
    restore_interrupts: AtomicBool,
}

static CRITICAL_REGIONS: [CriticalRegionState; MAX_CPUS] = [
    const {
        CriticalRegionState {
            depth: AtomicU32::new(0),
            restore_interrupts: AtomicBool::new(false),
        }
    };
    MAX_CPUS
];

pub fn interrupts_enabled() -> bool {
    #[cfg(target_arch = "x86_64")]
    let enabled = x86::bits64::rflags::read()
        .contains(x86::bits64::rflags::RFlags::FLAGS_IF);

    #[cfg(target_arch = "x86")]
    let enabled = unsafe { x86::bits32::eflags::read() }
        .contains(x86::bits32::eflags::EFlags::FLAGS_IF);

    enabled
}

pub fn push_critical_region() {
    let was_enabled = interrupts_enabled();
    unsafe { x86::irq::disable() };

    // Interrupts are off from here, the core index cannot change under us.
    let region = &CRITICAL_REGIONS[core_id()];
    if region.depth.fetch_add(1, Ordering::SeqCst) == 0 {
        region.restore_interrupts.store(was_enabled, Ordering::SeqCst);
    }
}

pub fn pop_critical_region() {
    let region = &CRITICAL_REGIONS[core_id()];
    let prev = region.depth.fetch_sub(1, Ordering::SeqCst);
    debug_assert!(prev > 0, "unbalanced critical region");

    if prev == 1 && region.restore_interrupts.load(Ordering::SeqCst) {
        unsafe { x86::irq::enable() };
    }
}

pub fn critical_region_depth() -> u32 {
    CRITICAL_REGIONS[core_id()].depth.load(Ordering::SeqCst)
}
