/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use core::sync::atomic::AtomicUsize;

use crate::arch;
use crate::sync::CriticalRegion;

pub const MAX_CPUS: usize = 32;
pub static NR_CPUS: AtomicUsize = AtomicUsize::new(0);

/// Index of the executing core, pinned for as long as the `CoreIndex` lives:
/// it keeps the holder in a critical region.
pub struct CoreIndex {
    index: usize,
    _region: CriticalRegion,
}

impl CoreIndex {
    /// Warning! Avoid copying the return value, but rather use it directly.
    /// In fact, once the `CoreIndex` is dropped, there is no more guarantee
    /// that the returned core index will be the current executing core's index:
    /// the current task could be preempted or interrupted and rescheduled to
    /// another core. Always ensure that the `&self` reference outlives the
    /// numerical value.
    pub fn get(&self) -> usize {
        self.index
    }
}

pub fn current_core() -> CoreIndex {
    let region = CriticalRegion::enter();

    CoreIndex {
        index: arch::cpu::core_id(),
        _region: region,
    }
}
