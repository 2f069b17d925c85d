/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! Tasks, processes and the per-core schedulers driving them.

pub mod cpu;
pub mod cpu_local;
pub mod directory;
pub mod process;
pub mod sched;
pub mod spawn;
pub mod state;
pub mod tasking;
pub mod vm86;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use thiserror_no_std::Error;

use crate::clock::ClockService;
use crate::elf::ExecutableLoader;
use crate::fs::FilesystemService;
use crate::mem::{MemoryService, RealModeAddress, Stack, ThreadLocal, VAddr};
use crate::sync::{Spinlock, SpinlockGuard, WaitQueue};
use crate::task::process::Process;
use crate::task::spawn::SpawnJob;
use crate::task::state::{ProcessorState, Vm86Registers};
use crate::task::vm86::Vm86Monitor;

pub use crate::task::tasking::Tasking;

pub type Tid = u32;
pub type Pid = u32;

pub const TID_NONE: Tid = 0;
pub const PID_NONE: Pid = 0;

pub const KERNEL_STACK_SIZE: usize = 16 * 1024;
pub const USER_STACK_SIZE: usize = 64 * 1024;

/// Privilege of a process and its tasks. Lower is more privileged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SecurityLevel {
    Kernel = 0,
    Driver = 1,
    #[default]
    Application = 2,
}

impl SecurityLevel {
    /// Whether holding `self` is enough for something requiring `required`.
    pub fn permits(self, required: SecurityLevel) -> bool {
        self <= required
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    /// Eligible for selection by its core's scheduler.
    Running = 0,

    /// Blocked until something wakes it up, the task stays in its core's run
    /// list but is skipped.
    Waiting = 1,

    /// Terminated, its resources are reclaimed by the scheduler of its core
    /// once it is no longer executing. Never leaves this status.
    Dead = 2,
}

impl TaskStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskStatus::Running,
            1 => TaskStatus::Waiting,
            _ => TaskStatus::Dead,
        }
    }
}

pub struct AtomicTaskStatus(AtomicU8);

impl AtomicTaskStatus {
    pub const fn new(status: TaskStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub fn load(&self) -> TaskStatus {
        TaskStatus::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, status: TaskStatus) {
        self.0.store(status as u8, Ordering::SeqCst);
    }

    /// Moves to `status` unless already dead. Returns the previous status.
    pub fn transition(&self, status: TaskStatus) -> TaskStatus {
        let dead = TaskStatus::Dead as u8;
        let previous = self.0.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |current| (current != dead).then_some(status as u8),
        );

        match previous {
            Ok(previous) | Err(previous) => TaskStatus::from_u8(previous),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Ordinary,

    /// A kernel task the system cannot lose; its faults are never contained.
    Vital,

    /// Runs a real-mode routine in virtual-8086 mode.
    Vm86,

    /// The per-core fallback, run when nothing else is runnable.
    Idle,
}

/// Entry point of a user thread as requested by its creator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserEntry {
    pub function: VAddr,
    pub data: VAddr,
}

#[derive(Debug)]
pub struct Vm86Session {
    pub interrupt: u8,
    pub stack: Option<RealModeAddress>,
    /// Registers left by the real-mode routine once it finished.
    pub output: Option<Vm86Registers>,
}

pub struct TaskInner {
    /// Register frame the task resumes from.
    pub state: ProcessorState,
    /// `state` was set up for the next resume and must survive the save of
    /// the frame the task is being switched out from.
    pub state_prepared: bool,
    pub kernel_stack: Option<Stack>,
    pub user_stack: Option<Stack>,
    pub thread_local: Option<ThreadLocal>,
    pub user_entry: UserEntry,
    pub wait_reason: Option<&'static str>,
    pub vm86: Option<Vm86Session>,
    pub spawn: Option<Arc<SpawnJob>>,
}

pub struct Task {
    /// Unique among live tasks, and never reused. The main task of a process
    /// has the process' PID as TID.
    id: Tid,

    process: Arc<Process>,
    kind: TaskKind,
    security_level: SecurityLevel,

    /// Readable without the task lock; writes happen under it so that a
    /// waiter cannot miss its wake-up.
    status: AtomicTaskStatus,

    /// Index of the core whose run list holds the task, `usize::MAX` while
    /// unassigned.
    core: AtomicUsize,

    inner: Spinlock<TaskInner>,

    /// Tasks waiting for this one to die.
    waiters_join: WaitQueue<Tid>,
}

const UNASSIGNED: usize = usize::MAX;

impl Task {
    pub(crate) fn new(
        id: Tid,
        process: Arc<Process>,
        kind: TaskKind,
        security_level: SecurityLevel,
        state: ProcessorState,
    ) -> Self {
        Self {
            id,
            process,
            kind,
            security_level,
            status: AtomicTaskStatus::new(TaskStatus::Running),
            core: AtomicUsize::new(UNASSIGNED),
            inner: Spinlock::new(TaskInner {
                state,
                state_prepared: false,
                kernel_stack: None,
                user_stack: None,
                thread_local: None,
                user_entry: UserEntry::default(),
                wait_reason: None,
                vm86: None,
                spawn: None,
            }),
            waiters_join: WaitQueue::new(),
        }
    }

    pub fn id(&self) -> Tid {
        self.id
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.security_level
    }

    pub fn status(&self) -> TaskStatus {
        self.status.load()
    }

    pub fn is_dead(&self) -> bool {
        self.status() == TaskStatus::Dead
    }

    /// Changes the status under the task lock, a dead task stays dead.
    /// Returns the previous status.
    pub(crate) fn set_status(&self, inner: &mut TaskInner, status: TaskStatus)
        -> TaskStatus {
        if status != TaskStatus::Waiting {
            inner.wait_reason = None;
        }

        self.status.transition(status)
    }

    pub fn assigned_core(&self) -> Option<usize> {
        match self.core.load(Ordering::SeqCst) {
            UNASSIGNED => None,
            core => Some(core),
        }
    }

    pub(crate) fn set_assigned_core(&self, core: usize) {
        self.core.store(core, Ordering::SeqCst);
    }

    pub fn lock(&self) -> SpinlockGuard<'_, TaskInner> {
        self.inner.lock()
    }

    pub fn state(&self) -> ProcessorState {
        self.inner.lock().state
    }

    /// Thread-local block of the task, all zero for tasks without one.
    pub fn thread_local(&self) -> ThreadLocal {
        self.inner.lock().thread_local.unwrap_or_default()
    }

    pub fn wait_reason(&self) -> Option<&'static str> {
        self.inner.lock().wait_reason
    }

    pub fn user_entry(&self) -> UserEntry {
        self.inner.lock().user_entry
    }

    pub(crate) fn join_waiters(&self) -> &WaitQueue<Tid> {
        &self.waiters_join
    }
}

/// The collaborators the tasking core drives. They outlive the tasking system.
#[derive(Clone, Copy)]
pub struct Services {
    pub memory: &'static dyn MemoryService,
    pub fs: &'static dyn FilesystemService,
    pub loader: &'static dyn ExecutableLoader,
    pub clock: &'static dyn ClockService,
    pub vm86: &'static dyn Vm86Monitor,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskingError {
    #[error("out of memory")]
    OutOfMemory,

    #[error("insufficient security level")]
    NotPermitted,

    #[error("no such process: {0}")]
    NoSuchProcess(Pid),

    #[error("no such task: {0}")]
    NoSuchTask(Tid),

    #[error("invalid core index: {0}")]
    InvalidCore(usize),
}

static TASKING: Spinlock<Option<&'static Tasking>> = Spinlock::new(None);

/// Publishes the system-wide tasking instance to the interrupt glue.
pub fn install(tasking: &'static Tasking) {
    *TASKING.lock() = Some(tasking);
}

pub fn tasking() -> Option<&'static Tasking> {
    *TASKING.lock()
}
