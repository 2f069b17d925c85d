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

use crate::{arch, info, warning};
use crate::elf::{ELF32_HEADER_SIZE, Elf32Header};
use crate::fs::Fd;
use crate::mem::{Stack, ThreadLocal, VAddr};
use crate::sync::Spinlock;
use crate::task::process::Process;
use crate::task::state::ProcessorState;
use crate::task::tasking::TaskStart;
use crate::task::{
    SecurityLevel, Task, TaskKind, TaskStatus, Tasking, Tid, USER_STACK_SIZE,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum SpawnStatus {
    #[default]
    Successful = 0,
    IoError = 1,
    MemoryError = 2,
    FormatError = 3,
    TaskingError = 4,
}

/// Why a binary was refused, when `SpawnStatus::FormatError`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum SpawnValidationDetails {
    #[default]
    Successful = 0,
    NotElf = 1,
    NotExecutable = 2,
    NotI386 = 3,
    Not32Bit = 4,
    NotLittleEndian = 5,
    NotStandardElf = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnOutcome {
    pub status: SpawnStatus,
    pub validation: SpawnValidationDetails,
}

impl SpawnOutcome {
    pub const SUCCESSFUL: Self = Self {
        status: SpawnStatus::Successful,
        validation: SpawnValidationDetails::Successful,
    };

    fn failed(status: SpawnStatus) -> Self {
        Self { status, validation: SpawnValidationDetails::Successful }
    }
}

pub struct SpawnResult {
    pub status: SpawnStatus,
    pub validation: SpawnValidationDetails,
    /// The new process, only on success.
    pub process: Option<Arc<Process>>,
}

impl SpawnResult {
    fn failed(outcome: SpawnOutcome) -> Self {
        Self {
            status: outcome.status,
            validation: outcome.validation,
            process: None,
        }
    }
}

/// Loading work handed from a spawner to the task it spawned.
pub struct SpawnJob {
    fd: Fd,
    state: Spinlock<SpawnJobState>,
}

struct SpawnJobState {
    outcome: Option<SpawnOutcome>,
    waiter: Option<Tid>,
}

impl SpawnJob {
    fn new(fd: Fd) -> Self {
        Self {
            fd,
            state: Spinlock::new(SpawnJobState { outcome: None, waiter: None }),
        }
    }

    pub fn fd(&self) -> Fd {
        self.fd
    }

    pub fn outcome(&self) -> Option<SpawnOutcome> {
        self.state.lock().outcome
    }

    /// Returns `false` if the job already completed.
    fn register_waiter(&self, waiter: Tid) -> bool {
        let mut state = self.state.lock();
        if state.outcome.is_some() {
            return false;
        }

        state.waiter = Some(waiter);
        true
    }

    fn complete(&self, outcome: SpawnOutcome, wake: impl FnOnce(Tid)) {
        let waiter = {
            let mut state = self.state.lock();
            state.outcome = Some(outcome);
            state.waiter.take()
        };

        if let Some(waiter) = waiter {
            wake(waiter);
        }
    }
}

/// What a spawned task needs to enter its executable.
#[derive(Debug, Clone, Copy)]
pub struct UserImage {
    pub entry: VAddr,
    pub stack: Stack,
    pub thread_local: ThreadLocal,
}

impl Tasking {
    /// Spawns the executable open as `fd` in a new process of
    /// `security_level`. The binary is loaded by the new task itself, in
    /// kernel mode, while `spawner` blocks. On success the main task of the
    /// new process is left waiting for the caller to wake it; on failure
    /// nothing of the attempt remains visible.
    pub fn spawn(
        &self,
        spawner: &Task,
        fd: Fd,
        security_level: SecurityLevel,
    ) -> SpawnResult {
        let Ok(process) = self.create_process(security_level) else {
            return SpawnResult::failed(SpawnOutcome::failed(SpawnStatus::MemoryError));
        };

        let task = self.create_task_with(
            &process,
            security_level,
            TaskKind::Ordinary,
            TaskStart::Kernel(arch::task::spawn_entry()),
        );
        let task = match task {
            Ok(task) => task,
            Err(_) => {
                self.destroy_process(&process);
                return SpawnResult::failed(SpawnOutcome::failed(SpawnStatus::MemoryError));
            },
        };

        let job = Arc::new(SpawnJob::new(fd));
        task.lock().spawn = Some(job.clone());

        if self.assign_balanced(&task).is_err() {
            if self.destroy_task(&task) {
                self.destroy_process(&process);
            }
            return SpawnResult::failed(SpawnOutcome::failed(SpawnStatus::TaskingError));
        }

        let outcome = loop {
            if let Some(outcome) = job.outcome() {
                break outcome;
            }
            self.block(spawner, "spawn", || job.register_waiter(spawner.id()));
        };

        if outcome.status != SpawnStatus::Successful {
            self.unpublish(&task);
            return SpawnResult::failed(outcome);
        }

        SpawnResult {
            status: SpawnStatus::Successful,
            validation: SpawnValidationDetails::Successful,
            process: Some(process),
        }
    }

    /// Body of a freshly spawned task: loads its binary, then either prepares
    /// the jump to user mode or dies, and reports to the spawner.
    pub fn spawn_entry(&self, task: &Arc<Task>) {
        let Some(job) = task.lock().spawn.take() else {
            warning!("task {} entered spawn without a job", task.id());
            return;
        };

        match self.load_executable(task, &job) {
            Ok(image) => {
                self.finalize_spawn(task, image);
                job.complete(SpawnOutcome::SUCCESSFUL, |tid| self.wake_id(tid));
            },
            Err(outcome) => {
                info!("spawn of process {} failed: {:?}",
                      task.process().id(), outcome);
                self.kill_task(task);
                job.complete(outcome, |tid| self.wake_id(tid));
            },
        }

        self.yield_now();
    }

    fn load_executable(&self, task: &Task, job: &SpawnJob)
        -> Result<UserImage, SpawnOutcome> {
        let services = self.services();

        let mut header = [0u8; ELF32_HEADER_SIZE];
        let read = services.fs.read(job.fd(), 0, &mut header)
            .map_err(|_| SpawnOutcome::failed(SpawnStatus::IoError))?;

        let header = Elf32Header::validate(&header[..read])
            .map_err(|validation| SpawnOutcome {
                status: SpawnStatus::FormatError,
                validation,
            })?;

        let process = task.process();
        let executable = services.loader.load(job.fd(), process)
            .map_err(SpawnOutcome::failed)?;

        process.set_loaded_objects(executable.objects);
        process.set_tls_master(executable.tls_master);
        process.set_process_info(executable.process_info);

        let space = process.address_space()
            .ok_or(SpawnOutcome::failed(SpawnStatus::MemoryError))?;
        let stack = services.memory.allocate_user_stack(&space, USER_STACK_SIZE)
            .ok_or(SpawnOutcome::failed(SpawnStatus::MemoryError))?;
        let thread_local = services.memory
            .allocate_thread_local(&space, executable.tls_master.as_ref())
            .ok_or(SpawnOutcome::failed(SpawnStatus::MemoryError))?;

        Ok(UserImage { entry: header.entry(), stack, thread_local })
    }

    /// Points `task` at the entry of `image`, at its own security level. The
    /// task waits until the spawner has set up its environment.
    pub fn finalize_spawn(&self, task: &Task, image: UserImage) {
        let mut inner = task.lock();

        inner.state = ProcessorState::user(image.entry, image.stack.top(),
                                           task.security_level());
        inner.state_prepared = true;
        inner.user_stack = Some(image.stack);
        inner.thread_local = Some(image.thread_local);
        task.set_status(&mut inner, TaskStatus::Waiting);
        inner.wait_reason = Some("spawn");
    }
}
