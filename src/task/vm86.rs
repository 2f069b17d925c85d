/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use alloc::sync::Arc;

use crate::mem::RealModeAddress;
use crate::task::state::{ProcessorState, Vm86Registers};
use crate::task::process::Process;
use crate::task::{
    SecurityLevel, Task, TaskKind, Tasking, TaskingError, Vm86Session,
};
use crate::task::tasking::TaskStart;

/// What the virtual-8086 monitor made of a general protection fault raised by a
/// vm86 task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vm86Outcome {
    /// The sensitive instruction was emulated, the task resumes.
    Successful,

    /// The real-mode routine returned, its registers are the result.
    Finished,

    /// The faulting instruction cannot be emulated.
    UnhandledOpcode,
}

/// Virtual-8086 monitor: emulates the instructions a vm86 task cannot execute
/// itself.
pub trait Vm86Monitor: Sync {
    /// Real-mode address of the handler of `interrupt`, from the interrupt
    /// vector table.
    fn interrupt_vector(&self, interrupt: u8) -> RealModeAddress;

    fn handle_gpf(&self, state: &mut ProcessorState) -> Vm86Outcome;
}

impl Tasking {
    /// Creates an unassigned task running the real-mode handler of
    /// `interrupt` in `process` with `input` loaded. Only processes of driver
    /// level or better may do so.
    pub fn create_task_vm86(
        &self,
        process: &Arc<Process>,
        interrupt: u8,
        input: &Vm86Registers,
    ) -> Result<Arc<Task>, TaskingError> {
        if !process.security_level().permits(SecurityLevel::Driver) {
            return Err(TaskingError::NotPermitted);
        }

        let memory = self.services().memory;
        let stack = memory.allocate_vm86_stack()
            .ok_or(TaskingError::OutOfMemory)?;
        let handler = self.services().vm86.interrupt_vector(interrupt);

        let task = self.create_task_with(
            process,
            process.security_level(),
            TaskKind::Vm86,
            TaskStart::Prepared(ProcessorState::vm86(handler, stack, input)),
        );
        let task = match task {
            Ok(task) => task,
            Err(e) => {
                memory.free_vm86_stack(stack);
                return Err(e);
            },
        };

        task.lock().vm86 = Some(Vm86Session {
            interrupt,
            stack: Some(stack),
            output: None,
        });

        Ok(task)
    }

    /// Registers left by a finished vm86 task.
    pub fn vm86_output(&self, task: &Task) -> Option<Vm86Registers> {
        task.lock().vm86.as_ref().and_then(|session| session.output)
    }
}
