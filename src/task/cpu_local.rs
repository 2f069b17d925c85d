/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use crate::task::cpu::{CoreIndex, MAX_CPUS};

pub struct CpuLocal<T>([T; MAX_CPUS]);

// SAFETY: it is guaranteed that as long as we hold an instance of
// `CoreIndex`, we run on the associated core within a critical section,
// i.e. there is no possibility of interruption or preemption, so
// there is no risk of race-condition on accessing the array. Cross-core
// access through `for_core` requires `T: Sync`.
unsafe impl<T> Sync for CpuLocal<T> {}

impl<T> CpuLocal<T> {
    pub const fn new(items: [T; MAX_CPUS]) -> Self {
        Self(items)
    }

    /// Access the current core's value.
    pub fn get(&self, core: &CoreIndex) -> &T {
        // SAFETY: this function relies on the fact that as long as the
        // reference to `CoreIndex` is valid, the given core index is the
        // current executing core that won't change (through preemption or
        // interruption) during the reference's lifetime. The returned
        // reference's lifetime is therefor tied to the `CoreIndex`'s lifetime.
        &self.0[core.get()]
    }
}

impl<T: Sync> CpuLocal<T> {
    /// Access any core's value, for values that synchronize themselves.
    pub fn for_core(&self, core: usize) -> Option<&T> {
        self.0.get(core)
    }
}
