/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

mod critical;
mod reentrant;
mod spinlock;
mod wait_queue;

pub use critical::{critical_region_depth, CriticalRegion};
pub use reentrant::{ReentrantSpinlock, ReentrantSpinlockGuard};
pub use spinlock::{Spinlock, SpinlockGuard};
pub use wait_queue::{TimedWaitQueue, WaitQueue};
