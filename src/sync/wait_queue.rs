/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::sync::Spinlock;

/// FIFO of waiting entities, woken all at once. Waking only hands the ids out,
/// it is up to the caller to make the entities runnable again.
pub struct WaitQueue<T> {
    waiters: Spinlock<VecDeque<T>>,
}

impl<T: Copy + PartialEq> WaitQueue<T> {
    pub const fn new() -> Self {
        Self { waiters: Spinlock::new(VecDeque::new()) }
    }

    /// Registers `waiter`, once.
    pub fn add(&self, waiter: T) {
        let mut waiters = self.waiters.lock();
        if !waiters.contains(&waiter) {
            waiters.push_back(waiter);
        }
    }

    /// Registers `waiter` unless `condition` already holds. The condition is
    /// evaluated under the queue's lock: a waker that makes it true and then
    /// calls `wake_all` cannot slip in between the check and the registration.
    /// Returns whether `waiter` was registered.
    pub fn add_unless(&self, waiter: T, condition: impl FnOnce() -> bool) -> bool {
        let mut waiters = self.waiters.lock();

        if condition() {
            return false;
        }
        if !waiters.contains(&waiter) {
            waiters.push_back(waiter);
        }

        true
    }

    pub fn remove(&self, waiter: T) {
        self.waiters.lock().retain(|w| *w != waiter);
    }

    /// Empties the queue and calls `wake` for every waiter, in registration
    /// order, after the queue's lock is released.
    pub fn wake_all(&self, mut wake: impl FnMut(T)) {
        let woken: Vec<T> = self.waiters.lock().drain(..).collect();

        for waiter in woken {
            wake(waiter);
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Waiters keyed by a deadline, in milliseconds. Waiters sharing a deadline
/// are woken in registration order.
pub struct TimedWaitQueue<T> {
    waiters: Spinlock<Vec<(u64, T)>>,
}

impl<T: Copy + PartialEq> TimedWaitQueue<T> {
    pub const fn new() -> Self {
        Self { waiters: Spinlock::new(Vec::new()) }
    }

    pub fn insert(&self, deadline: u64, waiter: T) {
        let mut waiters = self.waiters.lock();
        let pos = waiters.partition_point(|(d, _)| *d <= deadline);
        waiters.insert(pos, (deadline, waiter));
    }

    pub fn remove(&self, waiter: T) {
        self.waiters.lock().retain(|(_, w)| *w != waiter);
    }

    /// Removes every waiter whose deadline is at or before `now` and calls
    /// `wake` for each of them, outside of the queue's lock.
    pub fn expire(&self, now: u64, mut wake: impl FnMut(T)) {
        let expired: Vec<(u64, T)> = {
            let mut waiters = self.waiters.lock();
            let end = waiters.partition_point(|(d, _)| *d <= now);
            waiters.drain(..end).collect()
        };

        for (_, waiter) in expired {
            wake(waiter);
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
