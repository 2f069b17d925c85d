/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/


use arrayvec::ArrayString;

use crate::fs::{Fd, FD_NONE};
use crate::mem::VAddr;
use crate::syscall::PATH_MAX;
use crate::task::directory::{MAX_IDENTIFIER_LEN, RegistrationError};
use crate::task::spawn::{SpawnStatus, SpawnValidationDetails};
use crate::task::state::Vm86Registers;
use crate::task::{Pid, SecurityLevel, TaskKind, TaskStatus, TaskingError, Tid};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum JoinStatus {
    #[default]
    Successful = 0,
    NotFound = 1,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum KillStatus {
    #[default]
    Successful = 0,
    NotFound = 1,
    NotPermitted = 2,
}

impl From<TaskingError> for KillStatus {
    fn from(e: TaskingError) -> Self {
        match e {
            TaskingError::NotPermitted => KillStatus::NotPermitted,
            _ => KillStatus::NotFound,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CreateTaskStatus {
    #[default]
    Successful = 0,
    Failed = 1,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Vm86CallStatus {
    #[default]
    Successful = 0,
    FailedNotPermitted = 1,
    Failed = 2,
}

impl From<TaskingError> for Vm86CallStatus {
    fn from(e: TaskingError) -> Self {
        match e {
            TaskingError::NotPermitted => Vm86CallStatus::FailedNotPermitted,
            _ => Vm86CallStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum GetWorkingDirectoryStatus {
    #[default]
    Successful = 0,
    SizeExceeded = 1,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum SetWorkingDirectoryStatus {
    #[default]
    Successful = 0,
    NotAFolder = 1,
    NotFound = 2,
    Error = 3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum RegisterIdentifierStatus {
    #[default]
    Successful = 0,
    AlreadyTaken = 1,
    NotPermitted = 2,
    InvalidIdentifier = 3,
}

impl From<RegistrationError> for RegisterIdentifierStatus {
    fn from(e: RegistrationError) -> Self {
        match e {
            RegistrationError::InvalidIdentifier => RegisterIdentifierStatus::InvalidIdentifier,
            RegistrationError::AlreadyTaken => RegisterIdentifierStatus::AlreadyTaken,
            RegistrationError::NotPermitted => RegisterIdentifierStatus::NotPermitted,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum KernqueryStatus {
    #[default]
    Successful = 0,
    UnknownId = 1,
    Error = 2,
}

#[derive(Debug, Default)]
pub struct SyscallSleep {
    pub milliseconds: u64,
}

#[derive(Debug, Default)]
pub struct SyscallExit {
    pub code: i32,
}

#[derive(Debug, Default)]
pub struct SyscallGetPid {
    pub id: Pid,
}

#[derive(Debug, Default)]
pub struct SyscallGetTid {
    pub id: Tid,
}

#[derive(Debug, Default)]
pub struct SyscallGetPidForTid {
    pub tid: Tid,
    /// `PID_NONE` if there is no such task.
    pub pid: Pid,
}

#[derive(Debug, Default)]
pub struct SyscallJoin {
    pub task_id: Tid,
    pub status: JoinStatus,
}

#[derive(Debug)]
pub struct SyscallSpawn<'a> {
    pub path: &'a str,
    pub args: Option<&'a str>,
    pub workdir: Option<&'a str>,
    pub security_level: SecurityLevel,
    /// Caller descriptors the new process' stdin, stdout and stderr forward
    /// to, `FD_NONE` for none.
    pub in_stdio: [Fd; 3],

    pub pid: Pid,
    pub status: SpawnStatus,
    pub validation: SpawnValidationDetails,
    /// Descriptors of the new process' standard streams, in its own table.
    pub out_stdio: [Fd; 3],
}

impl<'a> SyscallSpawn<'a> {
    pub fn new(path: &'a str, security_level: SecurityLevel) -> Self {
        Self {
            path,
            args: None,
            workdir: None,
            security_level,
            in_stdio: [FD_NONE; 3],
            pid: 0,
            status: SpawnStatus::Successful,
            validation: SpawnValidationDetails::Successful,
            out_stdio: [FD_NONE; 3],
        }
    }
}

#[derive(Debug, Default)]
pub struct SyscallKill {
    pub pid: Pid,
    pub status: KillStatus,
}

#[derive(Debug, Default)]
pub struct SyscallCreateTask {
    /// Where the new task starts, usually a libc thread trampoline.
    pub initial_entry: VAddr,
    pub user_entry: VAddr,
    pub user_data: VAddr,

    pub thread_id: Tid,
    pub status: CreateTaskStatus,
}

#[derive(Debug, Default)]
pub struct SyscallGetTaskEntry {
    pub user_entry: VAddr,
    pub user_data: VAddr,
}

#[derive(Debug, Default)]
pub struct SyscallTaskGetTls {
    pub user_thread_local: VAddr,
}

#[derive(Debug, Default)]
pub struct SyscallProcessGetInfo {
    pub process_info: VAddr,
}

#[derive(Debug, Default)]
pub struct SyscallMillis {
    pub millis: u64,
}

#[derive(Debug, Default)]
pub struct SyscallGetExecutablePath<'a> {
    pub buffer: &'a mut [u8],
}

#[derive(Debug, Default)]
pub struct SyscallGetWorkingDirectory<'a> {
    pub buffer: &'a mut [u8],
    pub result: GetWorkingDirectoryStatus,
}

#[derive(Debug, Default)]
pub struct SyscallSetWorkingDirectory<'a> {
    pub path: &'a str,
    pub result: SetWorkingDirectoryStatus,
}

#[derive(Debug, Default)]
pub struct SyscallCliArgsRelease<'a> {
    pub buffer: &'a mut [u8],
}

#[derive(Debug, Default)]
pub struct SyscallTaskIdRegister<'a> {
    pub identifier: &'a str,
    pub status: RegisterIdentifierStatus,
}

/// Lookup of a task by identifier, also used to await one.
#[derive(Debug, Default)]
pub struct SyscallTaskIdGet<'a> {
    pub identifier: &'a str,
    /// `TID_NONE` if nothing is registered under `identifier`.
    pub result_task_id: Tid,
}

#[derive(Debug, Default)]
pub struct SyscallCallVm86 {
    pub interrupt: u8,
    pub input: Vm86Registers,
    pub output: Vm86Registers,
    pub status: Vm86CallStatus,
}

#[derive(Debug, Default)]
pub struct KernqueryTaskCount {
    pub count: u32,
}

#[derive(Debug, Default)]
pub struct KernqueryTaskList<'a> {
    pub id_buffer: &'a mut [Tid],
    pub filled_ids: u32,
}

#[derive(Debug, Default)]
pub struct KernqueryTaskGet {
    pub id: Tid,
    pub status: KernqueryStatus,

    pub found: bool,
    pub parent: Pid,
    pub kind: Option<TaskKind>,
    pub task_status: Option<TaskStatus>,
    pub identifier: ArrayString<MAX_IDENTIFIER_LEN>,
    pub source_path: ArrayString<PATH_MAX>,
}
