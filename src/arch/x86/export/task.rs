/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use core::arch::asm;
use x86::Ring;
use x86::dtables::{sgdt, DescriptorTablePointer};
use x86::segmentation::{BuildDescriptor, Descriptor, DescriptorBuilder,
                        SegmentDescriptorBuilder};
use x86::segmentation::DataSegmentType::ReadWrite;

use crate::arch::cpu::halt;
use crate::mem::{AddressSpace, ThreadLocal, VAddr};
use crate::task;
use crate::task::state::{KERNEL_THREAD_LOCAL_SELECTOR, USER_THREAD_LOCAL_SELECTOR};

/// Traps into the scheduler on the executing core. Returns once the calling
/// task is picked again.
pub fn request_reschedule() {
    unsafe { asm!("int 0x81") };
}

pub fn switch_address_space(space: &AddressSpace) {
    unsafe { x86::controlregs::cr3_write(space.page_directory.0) };
}

fn thread_local_descriptor(base: VAddr, dpl: Ring) -> Descriptor {
    DescriptorBuilder::data_descriptor(base.as_u32(), 0xfffff, ReadWrite)
        .present()
        .dpl(dpl)
        .limit_granularity_4kb()
        .db()
        .finish()
}

/// Rebases the thread-local segments of the executing core's GDT on `tls`.
/// `gs` picks the new base up when the interrupt stub pops it off the frame.
pub fn set_thread_local(tls: &ThreadLocal) {
    let mut gdtr: DescriptorTablePointer<Descriptor> = Default::default();

    unsafe {
        sgdt(&mut gdtr);
        let gdt = gdtr.base as *mut Descriptor;
        gdt.add((USER_THREAD_LOCAL_SELECTOR >> 3) as usize)
            .write(thread_local_descriptor(tls.user, Ring::Ring3));
        gdt.add((KERNEL_THREAD_LOCAL_SELECTOR >> 3) as usize)
            .write(thread_local_descriptor(tls.kernel, Ring::Ring0));
    }
}

pub fn idle_entry() -> VAddr {
    VAddr(idle_loop as usize)
}

pub fn spawn_entry() -> VAddr {
    VAddr(spawn_trampoline as usize)
}

extern "C" fn idle_loop() -> ! {
    loop {
        halt();
    }
}

/// First code run by a freshly spawned task, in kernel mode. Loads the binary
/// on behalf of the spawner; the task then either leaves for user mode or dies.
extern "C" fn spawn_trampoline() -> ! {
    if let Some(tasking) = task::tasking() {
        if let Some(current) = tasking.current_task() {
            tasking.spawn_entry(&current);
        }
    }

    loop {
        halt();
    }
}
