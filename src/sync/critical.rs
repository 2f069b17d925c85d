/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use core::marker::PhantomData;

use crate::arch::sync::{pop_critical_region, push_critical_region};

/// A scoped critical region on the executing core: interrupts stay masked as
/// long as at least one `CriticalRegion` is alive on this core. Regions nest;
/// dropping the outermost one restores the interrupt flag as it was when it
/// was entered, so a region entered with interrupts already off leaves them
/// off.
///
/// A `CriticalRegion` is bound to the core that entered it and therefore is
/// neither `Send` nor `Sync`.
pub struct CriticalRegion {
    _not_send: PhantomData<*const ()>,
}

impl CriticalRegion {
    pub fn enter() -> Self {
        push_critical_region();

        Self { _not_send: PhantomData }
    }
}

impl Drop for CriticalRegion {
    fn drop(&mut self) {
        pop_critical_region();
    }
}

/// Nesting depth of critical regions on the executing core.
pub fn critical_region_depth() -> u32 {
    crate::arch::sync::critical_region_depth()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sync::{interrupts_enabled, set_interrupts_enabled};

    #[test]
    fn it_masks_interrupts_until_the_outermost_region_ends() {
        set_interrupts_enabled(true);

        let outer = CriticalRegion::enter();
        assert!(!interrupts_enabled());
        {
            let _inner = CriticalRegion::enter();
            assert_eq!(critical_region_depth(), 2);
        }
        assert!(!interrupts_enabled());
        assert_eq!(critical_region_depth(), 1);

        drop(outer);
        assert!(interrupts_enabled());
        assert_eq!(critical_region_depth(), 0);
    }

    #[test]
    fn it_keeps_interrupts_off_when_they_were_off() {
        set_interrupts_enabled(false);

        drop(CriticalRegion::enter());
        assert!(!interrupts_enabled());

        set_interrupts_enabled(true);
    }
}
