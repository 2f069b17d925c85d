/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch;
use crate::emergency;
use crate::task::state::ProcessorState;

static PANIC_ENTERED: AtomicBool = AtomicBool::new(false);

/// Kernel-wide panic: reports `message` and the optional register state, then
/// halts the executing core for good.
pub fn panic_at_state(
    message: fmt::Arguments,
    state: Option<&ProcessorState>,
) -> ! {
    // Make sure there is only one thread panicking; if another thread panics,
    // we terminate it. This implies that the panic handler is non-reentrant
    // and, therefore, we must try our best not to trigger one in it.
    if PANIC_ENTERED.compare_exchange(false, true,
                                      Ordering::SeqCst, Ordering::SeqCst)
        .is_err() {
        arch::cpu::perm_halt();
    }

    emergency!("KERNEL PANIC! {}", message);
    if let Some(state) = state {
        emergency!("{}", state);
    }

    arch::cpu::perm_halt();
}

/// Takes the executing core out of service after a fault nothing could
/// handle. Other cores keep running.
pub fn halt_core(message: fmt::Arguments) -> ! {
    emergency!("halting core {}: {}", arch::cpu::core_id(), message);

    arch::cpu::perm_halt();
}
