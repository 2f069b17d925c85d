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
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::mem::{AddressSpace, TlsMaster, VAddr};
use crate::sync::{ReentrantSpinlock, ReentrantSpinlockGuard, Spinlock, SpinlockGuard};
use crate::task::{Pid, SecurityLevel, Tid};

/// Tasks of a process. The first task ever added is the main task, its TID is
/// the PID.
#[derive(Debug, Default)]
pub struct TaskList {
    pub tasks: Vec<Tid>,
    pub main: Option<Tid>,
}

/// Per-process strings handed over at spawn time.
#[derive(Debug, Default, Clone)]
pub struct Environment {
    pub executable_path: Option<String>,
    pub working_directory: Option<String>,
    pub arguments: Option<String>,
}

/// A binary mapped in a process, for fault reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedObject {
    pub name: String,
    pub base: VAddr,
    pub start: VAddr,
    pub end: VAddr,
    /// Whether this is the process' executable rather than a library.
    pub executable: bool,
}

impl LoadedObject {
    pub fn contains(&self, addr: VAddr) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// A container of tasks sharing an address space and a security level.
pub struct Process {
    id: Pid,
    security_level: SecurityLevel,
    address_space: Spinlock<Option<AddressSpace>>,

    /// The per-process lock. It is reentrant so that a syscall can hold it
    /// across calls into the lifecycle operations that take it themselves.
    tasks: ReentrantSpinlock<RefCell<TaskList>>,

    environment: Spinlock<Environment>,
    loaded_objects: Spinlock<Vec<LoadedObject>>,
    tls_master: Spinlock<Option<TlsMaster>>,
    process_info: Spinlock<VAddr>,
}

impl Process {
    pub(crate) fn new(
        id: Pid,
        security_level: SecurityLevel,
        address_space: Option<AddressSpace>,
    ) -> Self {
        Self {
            id,
            security_level,
            address_space: Spinlock::new(address_space),
            tasks: ReentrantSpinlock::new(RefCell::new(TaskList::default())),
            environment: Spinlock::new(Environment::default()),
            loaded_objects: Spinlock::new(Vec::new()),
            tls_master: Spinlock::new(None),
            process_info: Spinlock::new(VAddr(0)),
        }
    }

    pub fn id(&self) -> Pid {
        self.id
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.security_level
    }

    pub fn address_space(&self) -> Option<AddressSpace> {
        *self.address_space.lock()
    }

    pub(crate) fn take_address_space(&self) -> Option<AddressSpace> {
        self.address_space.lock().take()
    }

    pub fn lock(&self) -> ReentrantSpinlockGuard<'_, RefCell<TaskList>> {
        self.tasks.lock()
    }

    /// Picks the TID a new task of this process gets and records it: the PID
    /// for the first task, `allocate()` otherwise.
    pub(crate) fn add_task(&self, allocate: impl FnOnce() -> Tid) -> Tid {
        let guard = self.lock();
        let mut list = guard.borrow_mut();

        let tid = if list.main.is_none() {
            list.main = Some(self.id);
            self.id
        } else {
            allocate()
        };
        list.tasks.push(tid);

        tid
    }

    /// Returns whether the process is left without tasks.
    pub(crate) fn remove_task(&self, tid: Tid) -> bool {
        let guard = self.lock();
        let mut list = guard.borrow_mut();

        list.tasks.retain(|t| *t != tid);
        list.tasks.is_empty()
    }

    pub fn main_task_id(&self) -> Option<Tid> {
        self.lock().borrow().main
    }

    pub fn task_ids(&self) -> Vec<Tid> {
        self.lock().borrow().tasks.clone()
    }

    pub fn task_count(&self) -> usize {
        self.lock().borrow().tasks.len()
    }

    pub fn environment(&self) -> SpinlockGuard<'_, Environment> {
        self.environment.lock()
    }

    pub fn set_loaded_objects(&self, objects: Vec<LoadedObject>) {
        *self.loaded_objects.lock() = objects;
    }

    pub fn set_tls_master(&self, master: Option<TlsMaster>) {
        *self.tls_master.lock() = master;
    }

    /// Template of the thread-local block of each new task, `None` if the
    /// executable has no thread-local data.
    pub fn tls_master(&self) -> Option<TlsMaster> {
        *self.tls_master.lock()
    }

    pub fn set_process_info(&self, addr: VAddr) {
        *self.process_info.lock() = addr;
    }

    pub fn process_info(&self) -> VAddr {
        *self.process_info.lock()
    }

    pub fn loaded_objects(&self) -> Vec<LoadedObject> {
        self.loaded_objects.lock().clone()
    }

    pub fn object_at(&self, addr: VAddr) -> Option<LoadedObject> {
        self.loaded_objects.lock()
            .iter()
            .find(|object| object.contains(addr))
            .cloned()
    }

    /// Drops everything held on behalf of the process but its address space.
    pub(crate) fn release_resources(&self) {
        *self.environment.lock() = Environment::default();
        self.loaded_objects.lock().clear();
    }
}
