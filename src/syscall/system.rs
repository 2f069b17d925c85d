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
use arrayvec::ArrayString;

use crate::syscall::*;
use crate::task::{SecurityLevel, Task, Tasking};

/// Runs the real-mode handler of `data.interrupt` in a vm86 task of the
/// caller's process and waits for its registers. Drivers and better only.
pub fn syscall_call_vm86(tasking: &Tasking, task: &Arc<Task>, data: &mut SyscallCallVm86) {
    if !task.security_level().permits(SecurityLevel::Driver) {
        data.status = Vm86CallStatus::FailedNotPermitted;
        return;
    }

    let vm86 = match tasking.create_task_vm86(task.process(), data.interrupt, &data.input) {
        Ok(vm86) => vm86,
        Err(e) => {
            data.status = e.into();
            return;
        },
    };
    if tasking.assign_local(&vm86).is_err() {
        tasking.destroy_task(&vm86);
        data.status = Vm86CallStatus::Failed;
        return;
    }

    while !vm86.is_dead() {
        tasking.join(task, vm86.id());
    }

    data.status = match tasking.vm86_output(&vm86) {
        Some(output) => {
            data.output = output;
            Vm86CallStatus::Successful
        },
        None => Vm86CallStatus::Failed,
    };
}

pub fn kernquery_task_count(tasking: &Tasking, data: &mut KernqueryTaskCount) {
    data.count = tasking.task_count() as u32;
}

/// Fills `data.id_buffer` with as many task ids as fit, in ascending order.
pub fn kernquery_task_list(tasking: &Tasking, data: &mut KernqueryTaskList) {
    let ids = tasking.task_ids();
    let filled = ids.len().min(data.id_buffer.len());

    data.id_buffer[..filled].copy_from_slice(&ids[..filled]);
    data.filled_ids = filled as u32;
}

pub fn kernquery_task_get(tasking: &Tasking, data: &mut KernqueryTaskGet) {
    let Some(task) = tasking.task(data.id) else {
        data.found = false;
        data.status = KernqueryStatus::UnknownId;
        return;
    };

    data.found = true;
    data.parent = task.process().id();
    data.kind = Some(task.kind());
    data.task_status = Some(task.status());

    let identifier = tasking.directory().identifier_of(task.id());
    data.identifier = identifier.as_deref()
        .and_then(|name| ArrayString::from(name).ok())
        .unwrap_or_default();

    let environment = task.process().environment();
    data.source_path = environment.executable_path.as_deref()
        .and_then(|path| ArrayString::from(path).ok())
        .unwrap_or_default();

    data.status = KernqueryStatus::Successful;
}
