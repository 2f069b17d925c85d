/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! Addresses and the memory-management collaborator. Paging, frame allocation
//! and address-space layout belong to the memory manager; the tasking core only
//! asks it for address spaces and stacks through `MemoryService`.

use core::fmt::{Debug, Formatter};
use core::ops::{Add, AddAssign, Sub};

use crate::misc::R;
use crate::task::Task;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VAddr(pub usize);

impl VAddr {
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0 as u32
    }
}

impl Add<usize> for VAddr {
    type Output = Self;

    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<usize> for VAddr {
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs;
    }
}

impl Sub for VAddr {
    type Output = usize;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

impl Debug for VAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:x}", R(self.0 as u32))
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(C)]
pub struct PAddr(pub u64);

/// Handle of a paging hierarchy, owned by the memory manager.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct AddressSpace {
    pub page_directory: PAddr,
}

/// A stack range, `start` inclusive, `end` exclusive. Stacks grow down from
/// `end`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Stack {
    pub start: VAddr,
    pub end: VAddr,
}

impl Stack {
    /// Initial stack pointer, 16-byte aligned.
    pub fn top(&self) -> VAddr {
        VAddr(crate::misc::align_down(self.end.0, 16))
    }

    pub fn contains(&self, addr: VAddr) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// Thread-local template of an executable, copied into every task of its
/// process.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct TlsMaster {
    pub image: VAddr,
    /// Initialized bytes at the start of the image, the rest is zeroed.
    pub copy_size: usize,
    pub total_size: usize,
    pub alignment: usize,
}

/// A task's thread-local block. User code reaches it through `gs`, the
/// kernel through its own mapping of the same memory.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct ThreadLocal {
    pub user: VAddr,
    pub kernel: VAddr,
}

/// A real-mode `segment:offset` pair, as used by virtual-8086 tasks.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct RealModeAddress {
    pub segment: u16,
    pub offset: u16,
}

impl RealModeAddress {
    pub fn linear(&self) -> usize {
        ((self.segment as usize) << 4) + self.offset as usize
    }
}

pub enum AccessAttempt {
    Read,
    Write,
    Execute,
}

impl AccessAttempt {
    /// Decodes the access kind out of a page-fault error code.
    pub fn from_error_code(errc: u32) -> Self {
        if errc & (1 << 4) > 0 {
            AccessAttempt::Execute
        } else if errc & (1 << 1) > 0 {
            AccessAttempt::Write
        } else {
            AccessAttempt::Read
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AccessAttempt::Read => "invalid read",
            AccessAttempt::Write => "invalid write",
            AccessAttempt::Execute => "invalid execution",
        }
    }
}

/// What the tasking core needs from the memory manager. Allocation failures
/// are reported as `None`/`false`, never by panicking.
pub trait MemoryService: Sync {
    /// The address space shared by every kernel task.
    fn kernel_address_space(&self) -> AddressSpace;

    fn create_address_space(&self) -> Option<AddressSpace>;

    fn destroy_address_space(&self, space: AddressSpace);

    fn allocate_kernel_stack(&self, size: usize) -> Option<Stack>;

    fn free_kernel_stack(&self, stack: Stack);

    /// Maps a user stack in `space`. It goes away with the address space.
    fn allocate_user_stack(&self, space: &AddressSpace, size: usize)
        -> Option<Stack>;

    /// Maps a thread-local block in `space`, holding a copy of `master` if
    /// any, followed by the self pointer read through `gs:0`.
    fn allocate_thread_local(&self, space: &AddressSpace, master: Option<&TlsMaster>)
        -> Option<ThreadLocal>;

    /// Drops the kernel mapping of a block, the user one goes with the
    /// address space.
    fn free_thread_local(&self, tls: ThreadLocal);

    /// Allocates a stack below 1 MiB for a virtual-8086 task.
    fn allocate_vm86_stack(&self) -> Option<RealModeAddress>;

    fn free_vm86_stack(&self, stack: RealModeAddress);

    /// Copies memory of `space` at `addr` into `buffer`. Returns `false` if any
    /// of the range is not readable.
    fn read_memory(&self, space: &AddressSpace, addr: VAddr, buffer: &mut [u8])
        -> bool;

    /// Tries to resolve a fault at `addr` by growing `task`'s stack.
    fn handle_stack_growth(&self, task: &Task, addr: VAddr) -> bool;

    /// Tries to resolve a fault at `addr` by mapping a lazily backed page.
    fn handle_demand_paging(&self, task: &Task, addr: VAddr) -> bool;
}
