/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/


use alloc::string::String;
use alloc::sync::Arc;

use crate::{debug, info};
use crate::fs::FsError;
use crate::misc::copy_c_string;
use crate::syscall::*;
use crate::task::directory::MAX_IDENTIFIER_LEN;
use crate::task::spawn::SpawnStatus;
use crate::task::{PID_NONE, TID_NONE, Task, Tasking, UserEntry};

pub fn syscall_sleep(tasking: &Tasking, task: &Task, data: &SyscallSleep) {
    tasking.sleep(task, data.milliseconds);
}

pub fn syscall_yield(tasking: &Tasking) {
    tasking.yield_now();
}

/// Ends the calling process: every one of its tasks dies and whoever joins
/// them is woken. Kernel tasks only end themselves.
pub fn syscall_exit(tasking: &Tasking, task: &Task, data: &SyscallExit) {
    debug!("process {} exits with code {}", task.process().id(), data.code);

    if task.process().id() == tasking.kernel_process().id() {
        tasking.kill_task(task);
    } else {
        tasking.process_kill_all_tasks(task.process());
    }
    tasking.yield_now();
}

pub fn syscall_exit_task(tasking: &Tasking, task: &Task) {
    tasking.kill_task(task);
    tasking.yield_now();
}

pub fn syscall_get_pid(task: &Task, data: &mut SyscallGetPid) {
    data.id = task.process().id();
}

pub fn syscall_get_tid(task: &Task, data: &mut SyscallGetTid) {
    data.id = task.id();
}

pub fn syscall_get_pid_for_tid(tasking: &Tasking, data: &mut SyscallGetPidForTid) {
    data.pid = tasking.task(data.tid)
        .map(|task| task.process().id())
        .unwrap_or(PID_NONE);
}

/// Waits for a task to die. Ids are never reused: an unknown id belongs to a
/// task that is gone or never was, reported as not found.
pub fn syscall_join(tasking: &Tasking, task: &Task, data: &mut SyscallJoin) {
    data.status = if tasking.join(task, data.task_id) {
        JoinStatus::Successful
    } else {
        JoinStatus::NotFound
    };
}

/// Spawns the executable at `data.path`. The new process is never more
/// privileged than the caller's. On success its standard streams are wired
/// to the caller's and its environment set before its main task is let go.
pub fn syscall_spawn(tasking: &Tasking, task: &Arc<Task>, data: &mut SyscallSpawn) {
    let fs = tasking.services().fs;
    let caller = task.process().id();

    let fd = if data.path.len() < PATH_MAX {
        fs.open(data.path, task)
    } else {
        Err(FsError::NotFound)
    };
    let fd = match fd {
        Ok(fd) => fd,
        Err(_) => {
            info!("failed to find binary '{}'", data.path);
            data.status = SpawnStatus::IoError;
            return;
        },
    };

    let security_level = data.security_level.max(task.security_level());
    let result = tasking.spawn(task, fd, security_level);
    fs.close(caller, fd);

    data.status = result.status;
    data.validation = result.validation;
    let Some(process) = result.process else {
        return;
    };

    data.pid = process.id();
    data.out_stdio = fs.create_stdio(caller, data.in_stdio, process.id());

    {
        let mut environment = process.environment();
        environment.executable_path = Some(String::from(data.path));
        environment.arguments = data.args.map(String::from);
        environment.working_directory = data.workdir.map(String::from);
    }

    if let Some(main) = process.main_task_id().and_then(|tid| tasking.task(tid)) {
        tasking.wake(&main);
    }
}

pub fn syscall_kill(tasking: &Tasking, task: &Task, data: &mut SyscallKill) {
    data.status = match tasking.kill_process(task.security_level(), data.pid) {
        Ok(()) => KillStatus::Successful,
        Err(e) => e.into(),
    };

    if data.status == KillStatus::Successful {
        tasking.yield_now();
    }
}

/// Creates a thread in the caller's process, at the process' security level,
/// and places it on the least loaded core.
pub fn syscall_create_task(tasking: &Tasking, task: &Task, data: &mut SyscallCreateTask) {
    let process = task.process();
    let _process_lock = process.lock();

    let created = tasking.create_task(data.initial_entry, process,
                                      process.security_level());
    let Ok(created) = created else {
        data.status = CreateTaskStatus::Failed;
        return;
    };

    created.lock().user_entry = UserEntry {
        function: data.user_entry,
        data: data.user_data,
    };

    if tasking.assign_balanced(&created).is_err() {
        tasking.destroy_task(&created);
        data.status = CreateTaskStatus::Failed;
        return;
    }

    data.thread_id = created.id();
    data.status = CreateTaskStatus::Successful;
}

pub fn syscall_get_task_entry(task: &Task, data: &mut SyscallGetTaskEntry) {
    let entry = task.user_entry();
    data.user_entry = entry.function;
    data.user_data = entry.data;
}

pub fn syscall_task_get_tls(task: &Task, data: &mut SyscallTaskGetTls) {
    data.user_thread_local = task.thread_local().user;
}

/// Address of the information block the loader left in the caller's process.
pub fn syscall_process_get_info(task: &Task, data: &mut SyscallProcessGetInfo) {
    data.process_info = task.process().process_info();
}

pub fn syscall_get_milliseconds(tasking: &Tasking, data: &mut SyscallMillis) {
    data.millis = tasking.services().clock.now_millis();
}

/// Copies `src` NUL-terminated into `dst`, or leaves an empty string when it
/// does not fit.
fn copy_or_empty(src: Option<&str>, dst: &mut [u8]) {
    if copy_c_string(src.unwrap_or(""), dst).is_none() {
        if let Some(first) = dst.first_mut() {
            *first = 0;
        }
    }
}

pub fn syscall_get_executable_path(task: &Task, data: &mut SyscallGetExecutablePath) {
    let environment = task.process().environment();
    copy_or_empty(environment.executable_path.as_deref(), data.buffer);
}

/// Reads the working directory, `/` when none was ever set.
pub fn syscall_get_working_directory(task: &Task, data: &mut SyscallGetWorkingDirectory) {
    let environment = task.process().environment();
    let directory = environment.working_directory.as_deref().unwrap_or("/");

    data.result = match copy_c_string(directory, data.buffer) {
        Some(_) => GetWorkingDirectoryStatus::Successful,
        None => GetWorkingDirectoryStatus::SizeExceeded,
    };
}

pub fn syscall_set_working_directory(
    tasking: &Tasking,
    task: &Task,
    data: &mut SyscallSetWorkingDirectory,
) {
    data.result = match tasking.services().fs.find(data.path) {
        Ok(node) if node.kind.is_directory() => {
            task.process().environment().working_directory = Some(node.absolute_path);
            SetWorkingDirectoryStatus::Successful
        },
        Ok(_) => SetWorkingDirectoryStatus::NotAFolder,
        Err(FsError::NotFound) => SetWorkingDirectoryStatus::NotFound,
        Err(_) => SetWorkingDirectoryStatus::Error,
    };
}

pub fn syscall_release_cli_arguments(task: &Task, data: &mut SyscallCliArgsRelease) {
    let environment = task.process().environment();
    copy_or_empty(environment.arguments.as_deref(), data.buffer);
}

pub fn syscall_register_task_identifier(
    tasking: &Tasking,
    task: &Task,
    data: &mut SyscallTaskIdRegister,
) {
    let directory = tasking.directory();
    let registered = directory.register(
        data.identifier,
        task.id(),
        task.security_level(),
        |holder| tasking.task(holder).is_some_and(|holder| !holder.is_dead()),
    );

    data.status = match registered {
        Ok(()) => {
            directory.wake_awaiters(|tid| tasking.wake_id(tid));
            RegisterIdentifierStatus::Successful
        },
        Err(e) => e.into(),
    };
}

pub fn syscall_get_task_for_identifier(tasking: &Tasking, data: &mut SyscallTaskIdGet) {
    data.result_task_id = tasking.directory().get(data.identifier).unwrap_or(TID_NONE);
}

/// Blocks until some task registers `data.identifier`. An identifier that
/// could never be registered yields `TID_NONE` at once.
pub fn syscall_await_task_by_identifier(
    tasking: &Tasking,
    task: &Task,
    data: &mut SyscallTaskIdGet,
) {
    let directory = tasking.directory();

    if data.identifier.is_empty() || data.identifier.len() > MAX_IDENTIFIER_LEN {
        data.result_task_id = TID_NONE;
        return;
    }

    loop {
        if let Some(tid) = directory.get(data.identifier) {
            data.result_task_id = tid;
            return;
        }

        tasking.block(task, "identifier", || {
            directory.await_identifier(data.identifier, task.id())
        });
    }
}
