/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::task::{Task, TaskStatus, Tid};

/// Run list and scheduling state of one core.
///
/// The list holds every task assigned to the core, whatever its status:
/// waiting tasks are skipped, dead ones are reaped. The task selected last is
/// never reaped in the same pass, as it may still be executing on its stack;
/// it is reaped on the next one.
pub struct CoreScheduler {
    core: usize,
    run_list: VecDeque<Arc<Task>>,
    current: Option<Arc<Task>>,
    idle: Option<Arc<Task>>,

    /// Task to pick next if it is runnable, set when a task is woken up.
    preferred: Option<Tid>,
}

impl CoreScheduler {
    pub const fn new(core: usize) -> Self {
        Self {
            core,
            run_list: VecDeque::new(),
            current: None,
            idle: None,
            preferred: None,
        }
    }

    pub fn core(&self) -> usize {
        self.core
    }

    /// The idle task is never in the run list.
    pub fn set_idle(&mut self, idle: Arc<Task>) {
        idle.set_assigned_core(self.core);
        if self.current.is_none() {
            self.current = Some(idle.clone());
        }
        self.idle = Some(idle);
    }

    pub fn idle(&self) -> Option<&Arc<Task>> {
        self.idle.as_ref()
    }

    /// Number of tasks assigned to the core, the load balancing metric.
    pub fn len(&self) -> usize {
        self.run_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.run_list.is_empty()
    }

    pub fn push(&mut self, task: Arc<Task>) {
        task.set_assigned_core(self.core);
        self.run_list.push_back(task);
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.run_list.iter().any(|task| task.id() == tid)
    }

    pub fn task_ids(&self) -> impl Iterator<Item = Tid> + '_ {
        self.run_list.iter().map(|task| task.id())
    }

    pub fn current(&self) -> Option<&Arc<Task>> {
        self.current.as_ref()
    }

    /// Forces the current task. Only tasks of this core's run list or its
    /// idle task are accepted.
    pub fn set_current(&mut self, tid: Tid) -> bool {
        let task = self.run_list.iter()
            .chain(self.idle.iter())
            .find(|task| task.id() == tid)
            .cloned();

        match task {
            Some(task) => {
                self.current = Some(task);
                true
            },
            None => false,
        }
    }

    pub fn prefer(&mut self, tid: Tid) {
        self.preferred = Some(tid);
    }

    /// Selects the next task to run on this core and makes it current. Dead
    /// tasks met on the way are taken out of the run list and returned, their
    /// resources are for the caller to release once the core lock is dropped.
    ///
    /// `reset_preference` discards the preferred task, e.g. after an explicit
    /// yield, so that round-robin order applies.
    pub fn schedule(&mut self, reset_preference: bool) -> Vec<Arc<Task>> {
        let previous = self.current.as_ref().map(|task| task.id());
        let preferred = self.preferred.take().filter(|_| !reset_preference);
        let mut reaped = Vec::new();
        let mut next = None;

        if let Some(preferred) = preferred {
            let pos = self.run_list.iter().position(|task| {
                task.id() == preferred && task.status() == TaskStatus::Running
            });
            if let Some(task) = pos.and_then(|pos| self.run_list.remove(pos)) {
                self.run_list.push_back(task.clone());
                next = Some(task);
            }
        }

        if next.is_none() {
            for _ in 0..self.run_list.len() {
                let Some(task) = self.run_list.pop_front() else {
                    break;
                };

                match task.status() {
                    TaskStatus::Running => {
                        self.run_list.push_back(task.clone());
                        next = Some(task);
                        break;
                    },
                    TaskStatus::Dead if Some(task.id()) != previous => {
                        reaped.push(task);
                    },
                    TaskStatus::Dead | TaskStatus::Waiting => {
                        self.run_list.push_back(task);
                    },
                }
            }
        }

        self.current = next.or_else(|| self.idle.clone());
        reaped
    }
}
