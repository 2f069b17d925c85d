/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! Entry points called by the assembly interrupt stubs. Each stub pushes a
//! full `ProcessorState` on the interrupted task's kernel stack and hands us a
//! pointer to it; whatever state is left in that frame when we return is the
//! one the stub resumes.

use alloc::sync::Arc;

use crate::exception;
use crate::panic::panic_at_state;
use crate::task::{self, Task, Tasking};
use crate::task::state::ProcessorState;

fn current_or_panic(frame: &ProcessorState) -> (&'static Tasking, Arc<Task>) {
    let Some(tasking) = task::tasking() else {
        panic_at_state(
            format_args!("interrupt {} before initializing tasking system",
                         frame.intr),
            Some(frame),
        );
    };
    let Some(current) = tasking.current_task() else {
        panic_at_state(
            format_args!("interrupt {} on a core with no current task",
                         frame.intr),
            Some(frame),
        );
    };

    (tasking, current)
}

#[unsafe(no_mangle)]
unsafe extern "C" fn isr_exception(frame: &mut ProcessorState) {
    let (tasking, current) = current_or_panic(frame);

    tasking.trap(&current, frame, |tasking| exception::dispatch(tasking, &current));
}

/// Periodic timer interrupt. The stub acknowledges the interrupt controller
/// before calling in.
#[unsafe(no_mangle)]
unsafe extern "C" fn isr_timer(frame: &mut ProcessorState) {
    let (tasking, current) = current_or_panic(frame);

    tasking.trap(&current, frame, |tasking| {
        tasking.timer_tick();
    });
}

/// Explicit yield, see `request_reschedule`.
#[unsafe(no_mangle)]
unsafe extern "C" fn isr_yield(frame: &mut ProcessorState) {
    let (tasking, current) = current_or_panic(frame);

    tasking.trap(&current, frame, |tasking| {
        tasking.schedule(true);
    });
}
