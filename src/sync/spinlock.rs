/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};
use core::cell::UnsafeCell;

use crate::sync::CriticalRegion;

/// Mutual exclusion lock that busy-waits. Holding the lock keeps the holder
/// inside a critical region, so an interrupt handler on the same core can never
/// spin on a lock its own core holds.
pub struct Spinlock<T> {
    lock: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Spinlock<T> {}
unsafe impl<T: Send> Send for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            lock: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }

            // Spin outside of the critical region, interrupts stay serviceable.
            while self.is_locked() {
                core::hint::spin_loop();
            }
        }
    }

    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        let region = CriticalRegion::enter();

        if self.lock.compare_exchange(false, true,
                                      Ordering::Acquire,
                                      Ordering::Relaxed).is_err() {
            return None;
        }

        // Safety: The spinlock guarantees exclusive access to the resource
        // wrapped inside it, we just acquired the lock, we are the only owner
        // of the resource so we can create a mutable reference to it.
        let data = unsafe { &mut *self.data.get() };

        Some(SpinlockGuard {
            lock: &self.lock,
            data,
            _region: region,
        })
    }

    /// Checks whether the lock is held right now, without any lock or
    /// synchronization.
    pub fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

pub struct SpinlockGuard<'a, T> {
    lock: &'a AtomicBool,
    data: &'a mut T,
    // Dropped after the lock is released, see `Drop`.
    _region: CriticalRegion,
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sync::{interrupts_enabled, set_interrupts_enabled};
    use crate::sync::critical_region_depth;

    #[test]
    fn it_masks_interrupts_while_held() {
        set_interrupts_enabled(true);
        let lock = Spinlock::new(42);

        {
            let mut guard = lock.lock();
            *guard += 1;
            assert!(!interrupts_enabled());
            assert_eq!(critical_region_depth(), 1);
        }

        assert!(interrupts_enabled());
        assert_eq!(critical_region_depth(), 0);
        assert_eq!(*lock.lock(), 43);
    }

    #[test]
    fn it_fails_try_lock_while_held() {
        let lock = Spinlock::new(());

        let guard = lock.lock();
        assert!(lock.is_locked());
        assert!(lock.try_lock().is_none());
        assert_eq!(critical_region_depth(), 1);

        drop(guard);
        assert!(lock.try_lock().is_some());
        assert_eq!(critical_region_depth(), 0);
    }

    #[test]
    fn it_serializes_threads() {
        use std::sync::Arc;

        let counter = Arc::new(Spinlock::new(0u32));
        let threads: std::vec::Vec<_> = (0..4).map(|_| {
            let counter = counter.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    *counter.lock() += 1;
                }
            })
        }).collect();

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(*counter.lock(), 4000);
    }
}
