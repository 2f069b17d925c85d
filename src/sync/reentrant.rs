/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use core::ops::Deref;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::arch::cpu::core_id;
use crate::sync::CriticalRegion;

const NO_OWNER: usize = usize::MAX;

/// Spinlock that the holding core may take again. The owner is identified by
/// its core index: since the holder sits in a critical region for as long as it
/// holds the lock, nothing else can run on that core in the meantime.
///
/// Only shared access is handed out, wrap the data in a `RefCell` to mutate it.
pub struct ReentrantSpinlock<T> {
    owner: AtomicUsize,
    depth: AtomicU32,
    data: T,
}

unsafe impl<T: Send> Sync for ReentrantSpinlock<T> {}
unsafe impl<T: Send> Send for ReentrantSpinlock<T> {}

impl<T> ReentrantSpinlock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            owner: AtomicUsize::new(NO_OWNER),
            depth: AtomicU32::new(0),
            data: value,
        }
    }

    pub fn lock(&self) -> ReentrantSpinlockGuard<'_, T> {
        loop {
            let region = CriticalRegion::enter();
            let core = core_id();

            if self.owner.load(Ordering::Acquire) == core {
                self.depth.fetch_add(1, Ordering::Relaxed);
                return ReentrantSpinlockGuard { lock: self, _region: region };
            }

            if self.owner.compare_exchange(NO_OWNER, core,
                                           Ordering::Acquire,
                                           Ordering::Relaxed).is_ok() {
                self.depth.store(1, Ordering::Relaxed);
                return ReentrantSpinlockGuard { lock: self, _region: region };
            }

            drop(region);
            while self.owner.load(Ordering::Relaxed) != NO_OWNER {
                core::hint::spin_loop();
            }
        }
    }

    /// Number of nested acquisitions held by the owning core, 0 if free.
    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Relaxed)
    }
}

pub struct ReentrantSpinlockGuard<'a, T> {
    lock: &'a ReentrantSpinlock<T>,
    _region: CriticalRegion,
}

impl<T> Deref for ReentrantSpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.lock.data
    }
}

impl<T> Drop for ReentrantSpinlockGuard<'_, T> {
    fn drop(&mut self) {
        if self.lock.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.lock.owner.store(NO_OWNER, Ordering::Release);
        }
    }
}
