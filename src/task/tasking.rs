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
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use hashbrown::HashMap;

use crate::{arch, debug, info};
use crate::mem::VAddr;
use crate::sync::{critical_region_depth, Spinlock, TimedWaitQueue};
use crate::task::cpu::{current_core, MAX_CPUS};
use crate::task::cpu_local::CpuLocal;
use crate::task::directory::TaskDirectory;
use crate::task::process::Process;
use crate::task::sched::CoreScheduler;
use crate::task::state::ProcessorState;
use crate::task::{
    KERNEL_STACK_SIZE, Pid, SecurityLevel, Services, Task, TaskKind,
    TaskStatus, TaskingError, Tid, USER_STACK_SIZE,
};

/// How a new task starts.
pub(crate) enum TaskStart {
    /// Ring 0 code, on the task's kernel stack.
    Kernel(VAddr),

    /// Ring 3 code, on a fresh user stack in the process' address space.
    User(VAddr),

    /// A state prepared by the caller.
    Prepared(ProcessorState),
}

/// The tasking system: every task and process, and one scheduler per core.
///
/// Lock order, outermost first: process lock, task lock, wait queue, core
/// scheduler, global maps. Wake-ups always happen with no wait queue lock
/// held.
pub struct Tasking {
    services: Services,
    nr_cores: usize,
    next_id: AtomicU32,

    cores: CpuLocal<Spinlock<CoreScheduler>>,

    /// Serializes balanced assignment so that concurrent creators see each
    /// other's choices.
    balancer: Spinlock<()>,

    tasks: Spinlock<HashMap<Tid, Arc<Task>>>,
    processes: Spinlock<HashMap<Pid, Arc<Process>>>,
    kernel_process: Arc<Process>,

    sleepers: TimedWaitQueue<Tid>,
    directory: TaskDirectory,
}

impl Tasking {
    /// Sets up the kernel process and an idle task for each of the `nr_cores`
    /// cores. Every core starts on its idle task.
    pub fn new(services: Services, nr_cores: usize)
        -> Result<Self, TaskingError> {
        if nr_cores == 0 || nr_cores > MAX_CPUS {
            return Err(TaskingError::InvalidCore(nr_cores));
        }

        let next_id = AtomicU32::new(1);
        let kernel_process = Arc::new(Process::new(
            next_id.fetch_add(1, Ordering::SeqCst),
            SecurityLevel::Kernel,
            Some(services.memory.kernel_address_space()),
        ));

        let tasking = Self {
            services,
            nr_cores,
            next_id,
            cores: CpuLocal::new(core::array::from_fn(|index| {
                Spinlock::new(CoreScheduler::new(index))
            })),
            balancer: Spinlock::new(()),
            tasks: Spinlock::new(HashMap::new()),
            processes: Spinlock::new(HashMap::new()),
            kernel_process: kernel_process.clone(),
            sleepers: TimedWaitQueue::new(),
            directory: TaskDirectory::new(),
        };

        tasking.processes.lock().insert(kernel_process.id(), kernel_process);

        for index in 0..nr_cores {
            let idle = tasking.create_task_with(
                &tasking.kernel_process,
                SecurityLevel::Kernel,
                TaskKind::Idle,
                TaskStart::Kernel(arch::task::idle_entry()),
            )?;
            tasking.scheduler(index)?.lock().set_idle(idle);
        }

        info!("tasking initialized for {} core(s)", nr_cores);

        Ok(tasking)
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn nr_cores(&self) -> usize {
        self.nr_cores
    }

    pub fn kernel_process(&self) -> &Arc<Process> {
        &self.kernel_process
    }

    pub fn directory(&self) -> &TaskDirectory {
        &self.directory
    }

    pub(crate) fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn scheduler(&self, core: usize) -> Result<&Spinlock<CoreScheduler>, TaskingError> {
        self.cores.for_core(core)
            .filter(|_| core < self.nr_cores)
            .ok_or(TaskingError::InvalidCore(core))
    }

    pub fn task(&self, tid: Tid) -> Option<Arc<Task>> {
        self.tasks.lock().get(&tid).cloned()
    }

    pub fn process(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes.lock().get(&pid).cloned()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// TIDs of every live task, in ascending order.
    pub fn task_ids(&self) -> Vec<Tid> {
        let mut ids: Vec<Tid> = self.tasks.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// The task executing on the calling core.
    pub fn current_task(&self) -> Option<Arc<Task>> {
        let core = current_core();
        self.cores.get(&core).lock().current().cloned()
    }

    pub fn current_task_on(&self, core: usize) -> Option<Arc<Task>> {
        self.scheduler(core).ok()?.lock().current().cloned()
    }

    /// Number of tasks assigned to `core`.
    pub fn core_load(&self, core: usize) -> Option<usize> {
        Some(self.scheduler(core).ok()?.lock().len())
    }

    pub fn core_task_ids(&self, core: usize) -> Vec<Tid> {
        self.scheduler(core)
            .map(|sched| sched.lock().task_ids().collect())
            .unwrap_or_default()
    }

    /// Creates an empty process with its own address space.
    pub fn create_process(&self, security_level: SecurityLevel)
        -> Result<Arc<Process>, TaskingError> {
        let space = self.services.memory.create_address_space()
            .ok_or(TaskingError::OutOfMemory)?;
        let process = Arc::new(Process::new(self.next_id(), security_level,
                                            Some(space)));

        self.processes.lock().insert(process.id(), process.clone());
        debug!("created process {} ({:?})", process.id(), security_level);

        Ok(process)
    }

    /// Creates an unassigned task of `process` starting at `entry`: in ring 0
    /// for the kernel level, in ring 3 on its own user stack otherwise.
    pub fn create_task(
        &self,
        entry: VAddr,
        process: &Arc<Process>,
        security_level: SecurityLevel,
    ) -> Result<Arc<Task>, TaskingError> {
        let start = match security_level {
            SecurityLevel::Kernel => TaskStart::Kernel(entry),
            SecurityLevel::Driver | SecurityLevel::Application => TaskStart::User(entry),
        };

        self.create_task_with(process, security_level, TaskKind::Ordinary, start)
    }

    /// Creates a kernel task whose faults are never contained.
    pub fn create_vital_task(&self, entry: VAddr) -> Result<Arc<Task>, TaskingError> {
        self.create_task_with(
            &self.kernel_process,
            SecurityLevel::Kernel,
            TaskKind::Vital,
            TaskStart::Kernel(entry),
        )
    }

    pub(crate) fn create_task_with(
        &self,
        process: &Arc<Process>,
        security_level: SecurityLevel,
        kind: TaskKind,
        start: TaskStart,
    ) -> Result<Arc<Task>, TaskingError> {
        let memory = self.services.memory;
        let kernel_stack = memory.allocate_kernel_stack(KERNEL_STACK_SIZE)
            .ok_or(TaskingError::OutOfMemory)?;

        let (state, user_stack, thread_local) = match start {
            TaskStart::Kernel(entry) => {
                (ProcessorState::kernel(entry, kernel_stack.top()), None, None)
            },
            TaskStart::User(entry) => {
                let allocated = process.address_space().and_then(|space| {
                    let stack = memory.allocate_user_stack(&space, USER_STACK_SIZE)?;
                    let tls = memory.allocate_thread_local(
                        &space,
                        process.tls_master().as_ref(),
                    )?;
                    Some((stack, tls))
                });
                let Some((stack, tls)) = allocated else {
                    memory.free_kernel_stack(kernel_stack);
                    return Err(TaskingError::OutOfMemory);
                };

                (ProcessorState::user(entry, stack.top(), security_level),
                 Some(stack), Some(tls))
            },
            TaskStart::Prepared(state) => (state, None, None),
        };

        let id = process.add_task(|| self.next_id());
        let task = Arc::new(Task::new(id, process.clone(), kind,
                                      security_level, state));
        {
            let mut inner = task.lock();
            inner.kernel_stack = Some(kernel_stack);
            inner.user_stack = user_stack;
            inner.thread_local = thread_local;
        }

        self.tasks.lock().insert(id, task.clone());
        debug!("created task {} in process {} ({:?}, {:?})",
               id, process.id(), kind, security_level);

        Ok(task)
    }

    /// Appends `task` to the run list of `core`. A task is assigned once, for
    /// its whole life.
    pub fn assign_on_core(&self, core: usize, task: &Arc<Task>)
        -> Result<(), TaskingError> {
        let sched = self.scheduler(core)?;
        debug_assert!(task.assigned_core().is_none(),
                      "task {} assigned twice", task.id());
        if task.is_dead() {
            return Err(TaskingError::NoSuchTask(task.id()));
        }

        sched.lock().push(task.clone());
        Ok(())
    }

    /// Assigns `task` to the calling core.
    pub fn assign_local(&self, task: &Arc<Task>) -> Result<(), TaskingError> {
        let core = current_core();
        self.assign_on_core(core.get(), task)
    }

    /// Assigns `task` to the core with the fewest tasks, the lowest index on a
    /// tie. Returns the chosen core.
    pub fn assign_balanced(&self, task: &Arc<Task>) -> Result<usize, TaskingError> {
        let _balancer = self.balancer.lock();

        let mut chosen = 0;
        let mut lowest = usize::MAX;
        for index in 0..self.nr_cores {
            let load = self.scheduler(index)?.lock().len();
            if load < lowest {
                chosen = index;
                lowest = load;
            }
        }

        self.assign_on_core(chosen, task)?;
        Ok(chosen)
    }

    /// Releases everything `task` holds and forgets it. The task must have left
    /// every run list and wait queue, i.e. be dead and reaped, or never
    /// assigned. Returns whether its process is left without tasks, `false`
    /// if the task was destroyed already.
    pub fn destroy_task(&self, task: &Task) -> bool {
        debug_assert!(task.is_dead() || task.assigned_core().is_none(),
                      "destroying live task {}", task.id());

        let memory = self.services.memory;
        {
            let mut inner = task.lock();
            let Some(stack) = inner.kernel_stack.take() else {
                return false;
            };
            memory.free_kernel_stack(stack);
            // Unmapped along with the address space.
            inner.user_stack = None;
            if let Some(tls) = inner.thread_local.take() {
                memory.free_thread_local(tls);
            }
            if let Some(stack) = inner.vm86.as_mut().and_then(|s| s.stack.take()) {
                memory.free_vm86_stack(stack);
            }
            inner.spawn = None;
        }

        self.tasks.lock().remove(&task.id());
        self.sleepers.remove(task.id());
        self.directory.remove_task(task.id());
        self.directory.forget_awaiter(task.id());
        debug!("destroyed task {}", task.id());

        task.process().remove_task(task.id())
    }

    /// Hides `task` and its process from lookups. They stay in the run list
    /// until reaped.
    pub(crate) fn unpublish(&self, task: &Task) {
        self.tasks.lock().remove(&task.id());
        self.processes.lock().remove(&task.process().id());
    }

    /// Releases the address space and environment of a process without tasks
    /// and forgets it.
    pub fn destroy_process(&self, process: &Arc<Process>) {
        debug_assert_eq!(process.task_count(), 0,
                         "destroying process {} with tasks", process.id());

        self.processes.lock().remove(&process.id());

        let memory = self.services.memory;
        if let Some(space) = process.take_address_space() {
            if space != memory.kernel_address_space() {
                memory.destroy_address_space(space);
            }
        }
        process.release_resources();

        debug!("destroyed process {}", process.id());
    }

    /// Marks `task` dead and wakes whoever waits for it. Returns `false` if it
    /// already was. Idle tasks never die. A task on no run list is reclaimed
    /// right away, the others when their core reaps them.
    pub fn kill_task(&self, task: &Task) -> bool {
        if task.kind() == TaskKind::Idle {
            return false;
        }

        let previous = {
            let mut inner = task.lock();
            task.set_status(&mut inner, TaskStatus::Dead)
        };
        if previous == TaskStatus::Dead {
            return false;
        }

        self.sleepers.remove(task.id());
        task.join_waiters().wake_all(|tid| self.wake_id(tid));
        debug!("task {} is dead", task.id());

        if task.assigned_core().is_none() {
            self.reclaim(task);
        }

        true
    }

    /// Kills every task of `process` but its vital ones.
    pub fn process_kill_all_tasks(&self, process: &Process) {
        let _process_lock = process.lock();

        for tid in process.task_ids() {
            let Some(task) = self.task(tid) else { continue };
            if task.kind() != TaskKind::Vital {
                self.kill_task(&task);
            }
        }
    }

    /// Kills the main task of process `pid` on behalf of a caller of level
    /// `caller`, who must be at least as privileged as the process. The rest
    /// of the process follows once the main task is reaped.
    pub fn kill_process(&self, caller: SecurityLevel, pid: Pid)
        -> Result<(), TaskingError> {
        let process = self.process(pid).ok_or(TaskingError::NoSuchProcess(pid))?;
        if pid == self.kernel_process.id() || !caller.permits(process.security_level()) {
            return Err(TaskingError::NotPermitted);
        }

        if process.task_count() == 0 {
            self.destroy_process(&process);
            return Ok(());
        }

        let main = process.main_task_id()
            .and_then(|tid| self.task(tid))
            .ok_or(TaskingError::NoSuchProcess(pid))?;

        if self.kill_task(&main) {
            Ok(())
        } else {
            Err(TaskingError::NoSuchProcess(pid))
        }
    }

    /// Picks the next task for the calling core and makes it current. Dead
    /// tasks found on the way are reclaimed after the core lock is released.
    pub fn schedule(&self, reset_preference: bool) -> Option<Arc<Task>> {
        let (next, reaped) = {
            let core = current_core();
            let mut sched = self.cores.get(&core).lock();
            let reaped = sched.schedule(reset_preference);
            (sched.current().cloned(), reaped)
        };

        for task in reaped {
            self.reclaim(&task);
        }

        next
    }

    fn reclaim(&self, task: &Task) {
        let process = task.process().clone();
        let was_main = process.main_task_id() == Some(task.id());

        let empty = self.destroy_task(task);

        if was_main {
            self.process_kill_all_tasks(&process);
        }
        if empty {
            self.destroy_process(&process);
        }
    }

    /// Makes `task` current on the calling core, refused unless the task is
    /// assigned to it.
    pub fn set_current(&self, task: &Task) -> bool {
        let core = current_core();
        self.cores.get(&core).lock().set_current(task.id())
    }

    /// Gives the calling core up until the scheduler picks the caller again.
    /// Must not be called from within a critical region.
    pub fn yield_now(&self) {
        debug_assert_eq!(critical_region_depth(), 0,
                         "yielding within a critical region");
        arch::task::request_reschedule();
    }

    /// Periodic tick: wakes expired sleepers and reschedules.
    pub fn timer_tick(&self) -> Option<Arc<Task>> {
        let now = self.services.clock.now_millis();
        self.sleepers.expire(now, |tid| self.wake_id(tid));

        self.schedule(false)
    }

    /// Makes a waiting task runnable again, and the preferred next pick of its
    /// core.
    pub fn wake(&self, task: &Task) {
        let woken = {
            let mut inner = task.lock();
            task.status() == TaskStatus::Waiting
                && task.set_status(&mut inner, TaskStatus::Running) == TaskStatus::Waiting
        };

        if woken {
            if let Some(sched) = task.assigned_core().and_then(|c| self.scheduler(c).ok()) {
                sched.lock().prefer(task.id());
            }
        }
    }

    pub fn wake_id(&self, tid: Tid) {
        if let Some(task) = self.task(tid) {
            self.wake(&task);
        }
    }

    /// Blocks `task` on whatever `register` subscribes it to. `register` runs
    /// under the task lock, so a wake-up racing with it is not lost. Returns
    /// whether the task blocked, i.e. `register` returned `true`.
    pub fn block(
        &self,
        task: &Task,
        reason: &'static str,
        register: impl FnOnce() -> bool,
    ) -> bool {
        let blocked = {
            let mut inner = task.lock();
            if register() {
                task.set_status(&mut inner, TaskStatus::Waiting);
                inner.wait_reason = Some(reason);
                true
            } else {
                false
            }
        };

        if blocked {
            self.yield_now();
        }

        blocked
    }

    /// Registers `waiter` to be woken when `target` dies. Returns `false` if
    /// there is no such task or it is already dead.
    pub fn wait_for_exit(&self, target: Tid, waiter: Tid) -> bool {
        match self.task(target) {
            Some(target) => {
                target.join_waiters().add_unless(waiter, || target.is_dead())
            },
            None => false,
        }
    }

    /// Blocks `task` until `target` dies; returns at once if it already is.
    /// Returns `false` if there is no such task.
    pub fn join(&self, task: &Task, target: Tid) -> bool {
        if self.task(target).is_none() {
            return false;
        }

        self.block(task, "join", || self.wait_for_exit(target, task.id()));
        true
    }

    pub fn sleep(&self, task: &Task, millis: u64) {
        let deadline = self.services.clock.now_millis().saturating_add(millis);

        self.block(task, "sleep", || {
            self.sleepers.insert(deadline, task.id());
            true
        });
    }

    /// Copies the interrupted register frame into `task`, unless a state was
    /// prepared for its next resume, in which case the frame is dropped once.
    pub fn save_state(&self, task: &Task, frame: &ProcessorState) {
        let mut inner = task.lock();
        if inner.state_prepared {
            inner.state_prepared = false;
        } else {
            inner.state = *frame;
        }
    }

    /// Loads `task`'s registers into the frame the interrupt returns to and
    /// switches to its address space and thread-local block.
    pub fn restore_state(&self, task: &Task, frame: &mut ProcessorState) {
        let thread_local = {
            let inner = task.lock();
            *frame = inner.state;
            inner.thread_local.unwrap_or_default()
        };

        if let Some(space) = task.process().address_space() {
            arch::task::switch_address_space(&space);
        }
        arch::task::set_thread_local(&thread_local);
    }

    /// Common path of every interrupt taken while `current` runs: saves
    /// `frame`, runs `handler`, then loads into `frame` whatever task is
    /// current afterwards.
    pub fn trap(
        &self,
        current: &Task,
        frame: &mut ProcessorState,
        handler: impl FnOnce(&Self),
    ) {
        self.save_state(current, frame);
        handler(self);

        if let Some(next) = self.current_task() {
            self.restore_state(&next, frame);
        }
    }
}

#[cfg(test)]
impl Tasking {
    /// Every task is in its process list and at most one run list.
    pub(crate) fn check_invariants(&self) {
        for tid in self.task_ids() {
            let Some(task) = self.task(tid) else { continue };
            assert!(task.process().task_ids().contains(&tid),
                    "task {} missing from its process", tid);

            let assigned = (0..self.nr_cores)
                .filter(|core| self.core_task_ids(*core).contains(&tid))
                .count();
            assert!(assigned <= 1, "task {} in {} run lists", tid, assigned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::sync::atomic::AtomicBool;
    use crate::arch::cpu::set_core_id;
    use crate::arch::task::{active_address_space, active_thread_local, reschedule_requests};
    use crate::mem::ThreadLocal;
    use crate::arch::test::services::make_tasking;
    use crate::task::state::{USER_CODE_SELECTOR, USER_THREAD_LOCAL_SELECTOR};

    fn kernel_task(tasking: &Tasking) -> Arc<Task> {
        tasking.create_task(VAddr(0xc010_0000), tasking.kernel_process(),
                            SecurityLevel::Kernel).unwrap()
    }

    #[test]
    fn it_starts_every_core_on_its_idle_task() {
        let (tasking, _) = make_tasking(2);

        for core in 0..2 {
            let idle = tasking.current_task_on(core).unwrap();
            assert_eq!(idle.kind(), TaskKind::Idle);
            assert_eq!(idle.assigned_core(), Some(core));
        }
        assert_eq!(tasking.current_task().unwrap().kind(), TaskKind::Idle);
        assert!(tasking.current_task_on(2).is_none());
    }

    #[test]
    fn it_rejects_impossible_core_counts() {
        let (tasking, _) = make_tasking(1);

        assert_eq!(Tasking::new(*tasking.services(), 0).err(),
                   Some(TaskingError::InvalidCore(0)));
        assert_eq!(Tasking::new(*tasking.services(), MAX_CPUS + 1).err(),
                   Some(TaskingError::InvalidCore(MAX_CPUS + 1)));
    }

    #[test]
    fn it_creates_processes_without_tasks() {
        let (tasking, services) = make_tasking(1);

        let process = tasking.create_process(SecurityLevel::Application).unwrap();

        assert_eq!(process.task_count(), 0);
        assert!(tasking.process(process.id()).is_some());
        assert_eq!(services.address_spaces_in_use(), 1);
    }

    #[test]
    fn it_reports_allocation_failures() {
        let (tasking, services) = make_tasking(1);
        let process = tasking.create_process(SecurityLevel::Application).unwrap();
        let tasks = tasking.task_count();

        services.fail_allocations(true);

        assert_eq!(tasking.create_process(SecurityLevel::Driver).err(),
                   Some(TaskingError::OutOfMemory));
        assert_eq!(tasking.create_task(VAddr(0x1000), &process,
                                       SecurityLevel::Application).err(),
                   Some(TaskingError::OutOfMemory));
        assert_eq!(tasking.task_count(), tasks);
        assert_eq!(process.task_count(), 0);
    }

    #[test]
    fn it_names_the_main_task_after_its_process() {
        let (tasking, _) = make_tasking(1);
        let process = tasking.create_process(SecurityLevel::Application).unwrap();

        let main = tasking.create_task(VAddr(0x0804_8000), &process,
                                       SecurityLevel::Application).unwrap();
        let sibling = tasking.create_task(VAddr(0x0804_9000), &process,
                                          SecurityLevel::Application).unwrap();

        assert_eq!(main.id(), process.id());
        assert_ne!(sibling.id(), process.id());
        assert_eq!(process.main_task_id(), Some(main.id()));
        assert_eq!(main.status(), TaskStatus::Running);
        assert_eq!(main.assigned_core(), None);

        let state = main.state();
        assert_eq!(state.cs, USER_CODE_SELECTOR);
        assert_eq!(state.eip, 0x0804_8000);
        assert!(main.lock().user_stack.is_some());
    }

    #[test]
    fn it_releases_everything_on_destroy() {
        let (tasking, services) = make_tasking(1);
        let stacks = services.kernel_stacks_in_use();
        let spaces = services.address_spaces_in_use();

        let process = tasking.create_process(SecurityLevel::Application).unwrap();
        let task = tasking.create_task(VAddr(0x1000), &process,
                                       SecurityLevel::Application).unwrap();
        assert_eq!(services.kernel_stacks_in_use(), stacks + 1);

        assert!(tasking.destroy_task(&task));
        tasking.destroy_process(&process);

        assert_eq!(services.kernel_stacks_in_use(), stacks);
        assert_eq!(services.address_spaces_in_use(), spaces);
        assert!(tasking.task(task.id()).is_none());
        assert!(tasking.process(process.id()).is_none());
    }

    #[test]
    fn it_balances_tasks_across_cores() {
        let (tasking, _) = make_tasking(4);

        let first = kernel_task(tasking);
        assert_eq!(tasking.assign_balanced(&first), Ok(0));
        for _ in 0..9 {
            let task = kernel_task(tasking);
            tasking.assign_balanced(&task).unwrap();
        }

        let loads: Vec<usize> = (0..4)
            .map(|core| tasking.core_load(core).unwrap())
            .collect();
        let spread = loads.iter().max().unwrap() - loads.iter().min().unwrap();
        assert!(spread <= 1, "unbalanced loads {:?}", loads);
        assert_eq!(loads, [3, 3, 2, 2]);
        tasking.check_invariants();
    }

    #[test]
    fn it_refuses_unknown_cores() {
        let (tasking, _) = make_tasking(2);
        let task = kernel_task(tasking);

        assert_eq!(tasking.assign_on_core(2, &task),
                   Err(TaskingError::InvalidCore(2)));
        assert_eq!(task.assigned_core(), None);
    }

    #[test]
    fn it_refuses_vm86_tasks_to_applications() {
        use crate::task::state::Vm86Registers;

        let (tasking, services) = make_tasking(1);
        let app = tasking.create_process(SecurityLevel::Application).unwrap();
        let driver = tasking.create_process(SecurityLevel::Driver).unwrap();

        assert_eq!(tasking.create_task_vm86(&app, 0x10, &Vm86Registers::default()).err(),
                   Some(TaskingError::NotPermitted));
        assert_eq!(services.vm86_stacks_in_use(), 0);

        let task = tasking.create_task_vm86(&driver, 0x10, &Vm86Registers::default())
            .unwrap();
        assert_eq!(task.kind(), TaskKind::Vm86);
        assert!(task.state().is_vm86());
        assert_eq!(services.vm86_stacks_in_use(), 1);
    }

    #[test]
    fn it_kills_only_once() {
        let (tasking, _) = make_tasking(1);
        let task = kernel_task(tasking);

        assert!(tasking.kill_task(&task));
        assert!(!tasking.kill_task(&task));
        assert!(task.is_dead());

        tasking.wake(&task);
        assert!(task.is_dead());
    }

    #[test]
    fn it_wakes_joiners_when_the_target_dies() {
        let (tasking, _) = make_tasking(1);
        let joiner = kernel_task(tasking);
        let target = kernel_task(tasking);
        tasking.assign_balanced(&joiner).unwrap();
        tasking.assign_balanced(&target).unwrap();

        assert!(tasking.join(&joiner, target.id()));
        assert_eq!(joiner.status(), TaskStatus::Waiting);
        assert_eq!(joiner.wait_reason(), Some("join"));

        tasking.kill_task(&target);
        assert_eq!(joiner.status(), TaskStatus::Running);
        assert_eq!(joiner.wait_reason(), None);

        // Target is dead now: returns without blocking
        let yields = reschedule_requests();
        assert!(tasking.join(&joiner, target.id()));
        assert_eq!(joiner.status(), TaskStatus::Running);
        assert_eq!(reschedule_requests(), yields);

        assert!(!tasking.join(&joiner, 9999));
    }

    #[test]
    fn it_joins_across_cores() {
        let (tasking, _) = make_tasking(2);
        let joiner = kernel_task(tasking);
        let target = kernel_task(tasking);
        tasking.assign_on_core(0, &joiner).unwrap();
        tasking.assign_on_core(1, &target).unwrap();

        let target_id = target.id();
        let ready = StdArc::new(AtomicBool::new(false));
        let other_core = {
            let ready = ready.clone();
            let joiner = joiner.clone();
            std::thread::spawn(move || {
                set_core_id(1);
                assert_eq!(tasking.schedule(false).unwrap().id(), target_id);

                while !ready.load(Ordering::SeqCst) {
                    std::hint::spin_loop();
                }
                assert_eq!(joiner.status(), TaskStatus::Waiting);

                let current = tasking.current_task().unwrap();
                tasking.kill_task(&current);
            })
        };

        assert!(tasking.join(&joiner, target_id));
        ready.store(true, Ordering::SeqCst);
        other_core.join().unwrap();

        assert_eq!(joiner.status(), TaskStatus::Running);
    }

    #[test]
    fn it_reclaims_dead_tasks_and_their_process() {
        let (tasking, services) = make_tasking(1);
        let stacks = services.kernel_stacks_in_use();
        let spaces = services.address_spaces_in_use();

        let process = tasking.create_process(SecurityLevel::Application).unwrap();
        let task = tasking.create_task(VAddr(0x1000), &process,
                                       SecurityLevel::Application).unwrap();
        tasking.assign_balanced(&task).unwrap();

        assert_eq!(tasking.schedule(false).unwrap().id(), task.id());
        tasking.kill_task(&task);

        // Still current when it died, reaped one pass later
        assert_eq!(tasking.schedule(false).unwrap().kind(), TaskKind::Idle);
        assert!(tasking.task(task.id()).is_some());

        tasking.schedule(false);
        assert!(tasking.task(task.id()).is_none());
        assert!(tasking.process(process.id()).is_none());
        assert_eq!(services.kernel_stacks_in_use(), stacks);
        assert_eq!(services.address_spaces_in_use(), spaces);
        assert_eq!(tasking.core_load(0), Some(0));
    }

    #[test]
    fn it_takes_the_process_down_with_its_main_task() {
        let (tasking, _) = make_tasking(1);
        let process = tasking.create_process(SecurityLevel::Application).unwrap();
        let main = tasking.create_task(VAddr(0x1000), &process,
                                       SecurityLevel::Application).unwrap();
        let sibling = tasking.create_task(VAddr(0x2000), &process,
                                          SecurityLevel::Application).unwrap();
        tasking.assign_balanced(&main).unwrap();
        tasking.assign_balanced(&sibling).unwrap();

        tasking.kill_task(&main);
        assert_eq!(tasking.schedule(false).unwrap().id(), sibling.id());
        assert!(sibling.is_dead());

        // The sibling was current when it got killed
        tasking.schedule(false);
        assert!(tasking.task(sibling.id()).is_some());
        tasking.schedule(false);
        assert!(tasking.task(main.id()).is_none());
        assert!(tasking.task(sibling.id()).is_none());
        assert!(tasking.process(process.id()).is_none());
    }

    #[test]
    fn it_reclaims_unassigned_tasks_right_away() {
        let (tasking, services) = make_tasking(1);
        let stacks = services.kernel_stacks_in_use();
        let spaces = services.address_spaces_in_use();

        let process = tasking.create_process(SecurityLevel::Application).unwrap();
        let main = tasking.create_task(VAddr(0x1000), &process,
                                       SecurityLevel::Application).unwrap();
        let sibling = tasking.create_task(VAddr(0x2000), &process,
                                          SecurityLevel::Application).unwrap();
        tasking.assign_balanced(&main).unwrap();

        tasking.kill_task(&sibling);
        assert!(tasking.task(sibling.id()).is_none());
        assert_eq!(process.task_ids(), [main.id()]);
        assert_eq!(services.kernel_stacks_in_use(), stacks + 1);
        assert_eq!(tasking.assign_balanced(&sibling),
                   Err(TaskingError::NoSuchTask(sibling.id())));

        tasking.kill_task(&main);
        tasking.schedule(false);
        assert!(tasking.process(process.id()).is_none());
        assert_eq!(services.kernel_stacks_in_use(), stacks);
        assert_eq!(services.address_spaces_in_use(), spaces);
    }

    #[test]
    fn it_takes_unassigned_siblings_down_with_the_main_task() {
        let (tasking, services) = make_tasking(1);
        let stacks = services.kernel_stacks_in_use();

        let process = tasking.create_process(SecurityLevel::Application).unwrap();
        let main = tasking.create_task(VAddr(0x1000), &process,
                                       SecurityLevel::Application).unwrap();
        let sibling = tasking.create_task(VAddr(0x2000), &process,
                                          SecurityLevel::Application).unwrap();
        tasking.assign_balanced(&main).unwrap();

        tasking.kill_task(&main);
        tasking.schedule(false);

        assert!(sibling.is_dead());
        assert!(tasking.task(sibling.id()).is_none());
        assert!(tasking.process(process.id()).is_none());
        assert_eq!(services.kernel_stacks_in_use(), stacks);
        tasking.check_invariants();
    }

    #[test]
    fn it_destroys_taskless_processes_on_kill() {
        let (tasking, services) = make_tasking(1);
        let spaces = services.address_spaces_in_use();
        let process = tasking.create_process(SecurityLevel::Application).unwrap();

        assert_eq!(tasking.kill_process(SecurityLevel::Application, process.id()),
                   Ok(()));
        assert!(tasking.process(process.id()).is_none());
        assert_eq!(services.address_spaces_in_use(), spaces);
    }

    #[test]
    fn it_spares_vital_tasks() {
        let (tasking, _) = make_tasking(1);
        let vital = tasking.create_vital_task(VAddr(0xc020_0000)).unwrap();
        let ordinary = kernel_task(tasking);
        tasking.assign_local(&vital).unwrap();
        tasking.assign_local(&ordinary).unwrap();

        tasking.process_kill_all_tasks(tasking.kernel_process());

        assert!(!vital.is_dead());
        assert!(ordinary.is_dead());
    }

    #[test]
    fn it_balances_concurrent_assignments() {
        let (tasking, _) = make_tasking(2);

        let cores: Vec<_> = (0..2).map(|core| {
            std::thread::spawn(move || {
                set_core_id(core);
                for _ in 0..50 {
                    let task = kernel_task(tasking);
                    tasking.assign_balanced(&task).unwrap();
                }
            })
        }).collect();
        for core in cores {
            core.join().unwrap();
        }

        let loads = [tasking.core_load(0).unwrap(), tasking.core_load(1).unwrap()];
        assert_eq!(loads[0] + loads[1], 100);
        assert!(loads[0].abs_diff(loads[1]) <= 1, "unbalanced: {:?}", loads);
        tasking.check_invariants();
    }

    #[test]
    fn it_kills_processes_on_behalf_of_privileged_callers() {
        let (tasking, _) = make_tasking(1);
        let driver = tasking.create_process(SecurityLevel::Driver).unwrap();
        let main = tasking.create_task(VAddr(0x1000), &driver,
                                       SecurityLevel::Driver).unwrap();

        assert_eq!(tasking.kill_process(SecurityLevel::Application, driver.id()),
                   Err(TaskingError::NotPermitted));
        assert!(!main.is_dead());

        assert_eq!(tasking.kill_process(SecurityLevel::Driver, driver.id()), Ok(()));
        assert!(main.is_dead());
        assert_eq!(tasking.kill_process(SecurityLevel::Driver, driver.id()),
                   Err(TaskingError::NoSuchProcess(driver.id())));
        assert_eq!(tasking.kill_process(SecurityLevel::Kernel, 4242),
                   Err(TaskingError::NoSuchProcess(4242)));
        assert_eq!(tasking.kill_process(SecurityLevel::Kernel,
                                        tasking.kernel_process().id()),
                   Err(TaskingError::NotPermitted));
        assert!(!tasking.kill_task(&tasking.current_task().unwrap()));
    }

    #[test]
    fn it_wakes_sleepers_on_timer_tick() {
        let (tasking, services) = make_tasking(1);
        let task = kernel_task(tasking);
        tasking.assign_balanced(&task).unwrap();

        services.set_now(1000);
        tasking.sleep(&task, 50);
        assert_eq!(task.wait_reason(), Some("sleep"));

        services.set_now(1049);
        assert_eq!(tasking.timer_tick().unwrap().kind(), TaskKind::Idle);
        assert_eq!(task.status(), TaskStatus::Waiting);

        services.set_now(1050);
        assert_eq!(tasking.timer_tick().unwrap().id(), task.id());
        assert_eq!(task.status(), TaskStatus::Running);
    }

    #[test]
    fn it_prefers_woken_tasks() {
        let (tasking, _) = make_tasking(1);
        let tasks: Vec<_> = (0..3).map(|_| {
            let task = kernel_task(tasking);
            tasking.assign_balanced(&task).unwrap();
            task
        }).collect();

        tasking.sleep(&tasks[2], 0);
        assert_eq!(tasking.schedule(false).unwrap().id(), tasks[0].id());

        tasking.wake(&tasks[2]);
        assert_eq!(tasking.schedule(false).unwrap().id(), tasks[2].id());
    }

    #[test]
    fn it_only_makes_local_tasks_current() {
        let (tasking, _) = make_tasking(2);
        let remote = kernel_task(tasking);
        let local = kernel_task(tasking);
        tasking.assign_on_core(1, &remote).unwrap();
        tasking.assign_local(&local).unwrap();

        assert!(!tasking.set_current(&remote));
        assert!(tasking.set_current(&local));
        assert_eq!(tasking.current_task().unwrap().id(), local.id());
    }

    #[test]
    fn it_saves_and_restores_register_state() {
        let (tasking, _) = make_tasking(1);
        let process = tasking.create_process(SecurityLevel::Application).unwrap();
        let task = tasking.create_task(VAddr(0x1000), &process,
                                       SecurityLevel::Application).unwrap();

        let mut frame = task.state();
        frame.eax = 0x1234;
        frame.eip = 0x1010;
        tasking.save_state(&task, &frame);

        let mut resumed = ProcessorState::default();
        tasking.restore_state(&task, &mut resumed);

        assert_eq!(resumed, frame);
        assert_eq!(active_address_space(), process.address_space());
    }

    #[test]
    fn it_switches_thread_local_blocks_with_the_task() {
        let (tasking, services) = make_tasking(1);
        let process = tasking.create_process(SecurityLevel::Application).unwrap();
        let task = tasking.create_task(VAddr(0x1000), &process,
                                       SecurityLevel::Application).unwrap();
        let kernel = kernel_task(tasking);
        assert_eq!(services.thread_locals_in_use(), 1);

        let mut frame = ProcessorState::default();
        tasking.restore_state(&task, &mut frame);
        assert_eq!(active_thread_local(), Some(task.thread_local()));
        assert_eq!(frame.gs, USER_THREAD_LOCAL_SELECTOR);

        tasking.restore_state(&kernel, &mut frame);
        assert_eq!(active_thread_local(), Some(ThreadLocal::default()));

        tasking.kill_task(&task);
        assert_eq!(services.thread_locals_in_use(), 0);
    }

    #[test]
    fn it_switches_frames_across_a_trap() {
        let (tasking, _) = make_tasking(1);
        let first = kernel_task(tasking);
        let second = kernel_task(tasking);
        tasking.assign_local(&first).unwrap();
        tasking.assign_local(&second).unwrap();
        assert_eq!(tasking.schedule(true).unwrap().id(), first.id());

        let mut frame = first.state();
        frame.eax = 0xdead;
        let interrupted = frame;
        tasking.trap(&first, &mut frame, |tasking| {
            tasking.schedule(true);
        });

        assert_eq!(first.state(), interrupted);
        assert_eq!(frame, second.state());
        assert_eq!(tasking.current_task().unwrap().id(), second.id());
    }

    #[test]
    fn it_keeps_a_prepared_state_over_one_trap() {
        let (tasking, _) = make_tasking(1);
        let process = tasking.create_process(SecurityLevel::Application).unwrap();
        let task = tasking.create_task(VAddr(0x1000), &process,
                                       SecurityLevel::Application).unwrap();
        tasking.assign_local(&task).unwrap();
        assert_eq!(tasking.schedule(true).unwrap().id(), task.id());

        let prepared = ProcessorState::user(VAddr(0x0804_8000), VAddr(0xbfff_f000),
                                            SecurityLevel::Application);
        {
            let mut inner = task.lock();
            inner.state = prepared;
            inner.state_prepared = true;
        }

        let mut frame = ProcessorState::kernel(arch::task::spawn_entry(),
                                               VAddr(0xc080_0000));
        tasking.trap(&task, &mut frame, |_| {});
        assert_eq!(frame, prepared);
        assert_eq!(frame.cs, USER_CODE_SELECTOR);

        // Only the first save is skipped
        frame.eip = 0x0804_8010;
        tasking.trap(&task, &mut frame, |_| {});
        assert_eq!(task.state().eip, 0x0804_8010);
    }

    #[test]
    fn it_keeps_tasks_in_one_process_and_one_run_list() {
        let (tasking, _) = make_tasking(3);
        let process = tasking.create_process(SecurityLevel::Driver).unwrap();

        for i in 0..7 {
            let task = tasking.create_task(VAddr(0x1000 + i), &process,
                                           SecurityLevel::Driver).unwrap();
            if i % 2 == 0 {
                tasking.assign_balanced(&task).unwrap();
            }
        }

        tasking.check_invariants();
        assert_eq!(process.task_count(), 7);
    }
}
