/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/


//! CPU exception policy: what happens to a task that faulted. Called by the
//! interrupt glue with the faulting task's registers already saved.

use alloc::sync::Arc;
use arrayvec::ArrayVec;
use x86::irq::{
    DIVIDE_ERROR_VECTOR, GENERAL_PROTECTION_FAULT_VECTOR, INVALID_OPCODE_VECTOR,
    PAGE_FAULT_VECTOR,
};

use crate::{arch, emergency, info};
use crate::mem::{AccessAttempt, AddressSpace, RealModeAddress, VAddr};
use crate::panic::halt_core;
use crate::task::state::{ProcessorState, Vm86Registers};
use crate::task::vm86::Vm86Outcome;
use crate::task::{Task, TaskKind, Tasking};

/// At most this many return addresses are reported.
pub const STACK_TRACE_MAX_FRAMES: usize = 8;

/// A return address below this ends the frame pointer walk.
pub const STACK_TRACE_MIN_RETURN: u32 = 0x1000;

/// Longest possible x86 instruction.
const MAX_INSTRUCTION_LEN: usize = 15;

pub static EXCEPTION_NAMES: [&str; 32] = [
    "divide error",
    "debug exception",
    "non-maskable interrupt",
    "breakpoint",
    "overflow",
    "bound range exceeded",
    "invalid opcode",
    "device not available",
    "double fault",
    "coprocessor segment overrun",
    "invalid TSS",
    "segment not present",
    "stack-segment fault",
    "general protection fault",
    "page fault",
    "reserved exception",
    "x87 floating-point exception",
    "alignment check",
    "machine check",
    "SIMD floating-point exception",
    "virtualization exception",
    "control protection exception",
    "reserved exception",
    "reserved exception",
    "reserved exception",
    "reserved exception",
    "reserved exception",
    "reserved exception",
    "hypervisor injection exception",
    "VMM communication exception",
    "security exception",
    "reserved exception",
];

pub fn exception_name(vector: u32) -> &'static str {
    EXCEPTION_NAMES.get(vector as usize)
        .copied()
        .unwrap_or("unknown interrupt")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionOutcome {
    /// The core can go on with whatever task is current now.
    Resolved,

    /// Nothing can be done, the core must stop.
    Unresolved,
}

/// Handles the exception `task` just raised, the vector and error code being in
/// its saved state. When the task is killed another one is made current.
pub fn dispatch(tasking: &Tasking, task: &Arc<Task>) {
    if tasking.handle_exception(task) == ExceptionOutcome::Resolved {
        return;
    }

    let state = task.state();
    tasking.dump_task(task);
    emergency!("{}", state);

    halt_core(format_args!(
        "task {} caused unresolved exception {} (error {}) at EIP {:#x} ESP {:#x}",
        task.id(), state.intr, state.error, state.eip, state.esp,
    ));
}

impl Tasking {
    pub fn handle_exception(&self, task: &Arc<Task>) -> ExceptionOutcome {
        let Ok(vector) = u8::try_from(task.state().intr) else {
            return ExceptionOutcome::Unresolved;
        };

        match vector {
            DIVIDE_ERROR_VECTOR => self.handle_divide_error(task),
            PAGE_FAULT_VECTOR => self.handle_page_fault(task),
            GENERAL_PROTECTION_FAULT_VECTOR => self.handle_general_protection_fault(task),
            INVALID_OPCODE_VECTOR => self.kill_faulting_task(task),
            _ => ExceptionOutcome::Unresolved,
        }
    }

    /// Skips the faulting division and lets the task go on.
    fn handle_divide_error(&self, task: &Arc<Task>) -> ExceptionOutcome {
        let state = task.state();
        let code = self.read_code(task, &state);

        let Some(len) = divide_instruction_length(&code, state.is_vm86()) else {
            info!("cannot decode the division that faulted in task {} at EIP {:#x}",
                  task.id(), state.eip);
            return self.kill_faulting_task(task);
        };

        let eip = {
            let mut inner = task.lock();
            inner.state.eip = if state.is_vm86() {
                (inner.state.eip as u16).wrapping_add(len as u16) as u32
            } else {
                inner.state.eip.wrapping_add(len as u32)
            };
            inner.state.eip
        };
        info!("divide error in task {}, skipping to EIP {:#x}", task.id(), eip);

        ExceptionOutcome::Resolved
    }

    fn handle_page_fault(&self, task: &Arc<Task>) -> ExceptionOutcome {
        let memory = self.services().memory;
        let addr = VAddr(arch::cpu::page_fault_address());

        if memory.handle_stack_growth(task, addr)
            || memory.handle_demand_paging(task, addr) {
            return ExceptionOutcome::Resolved;
        }

        let state = task.state();
        info!("page fault in task {} (core {}): {} at {:?}, EIP {:#x}",
              task.id(), arch::cpu::core_id(),
              AccessAttempt::from_error_code(state.error).label(),
              addr, state.eip);

        self.kill_faulting_task(task)
    }

    fn handle_general_protection_fault(&self, task: &Arc<Task>) -> ExceptionOutcome {
        if task.kind() == TaskKind::Vm86 {
            let outcome = {
                let mut inner = task.lock();
                let outcome = self.services().vm86.handle_gpf(&mut inner.state);
                if outcome == Vm86Outcome::Finished {
                    let output = Vm86Registers::from_state(&inner.state);
                    if let Some(session) = inner.vm86.as_mut() {
                        session.output = Some(output);
                    }
                }
                outcome
            };

            match outcome {
                Vm86Outcome::Successful => return ExceptionOutcome::Resolved,
                Vm86Outcome::Finished => {},
                Vm86Outcome::UnhandledOpcode => {
                    info!("core {}: unable to handle GPF of vm86 task {}",
                          arch::cpu::core_id(), task.id());
                },
            }

            self.kill_task(task);
            self.schedule(false);
            return ExceptionOutcome::Resolved;
        }

        self.kill_faulting_task(task)
    }

    /// Dumps and kills `task` then reschedules, unless the task is one the
    /// system cannot do without.
    fn kill_faulting_task(&self, task: &Arc<Task>) -> ExceptionOutcome {
        match task.kind() {
            TaskKind::Vital | TaskKind::Idle => ExceptionOutcome::Unresolved,
            TaskKind::Ordinary | TaskKind::Vm86 => {
                self.dump_task(task);

                let state = task.state();
                info!("task {} killed due to {} (error {}) at EIP {:#x}",
                      task.id(), exception_name(state.intr), state.error, state.eip);

                self.kill_task(task);
                self.schedule(false);
                ExceptionOutcome::Resolved
            },
        }
    }

    /// Logs the registers of `task`, the object its instruction pointer is in
    /// and a stack trace.
    pub fn dump_task(&self, task: &Task) {
        let state = task.state();
        let process = task.process();

        info!("{} in task {} (process {})",
              exception_name(state.intr), task.id(), process.id());
        if state.intr == PAGE_FAULT_VECTOR as u32 {
            info!("    accessed address: {:#010x}", arch::cpu::page_fault_address());
        }
        info!("    eip: {:#010x}   eflags: {:#010x}", state.eip, state.eflags);
        info!("    eax: {:#010x}      ebx: {:#010x}", state.eax, state.ebx);
        info!("    ecx: {:#010x}      edx: {:#010x}", state.ecx, state.edx);
        info!("    esp: {:#010x}      ebp: {:#010x}", state.esp, state.ebp);
        info!("   intr: {:#010x}    error: {:#010x}", state.intr, state.error);
        {
            let inner = task.lock();
            if let Some(stack) = inner.user_stack {
                info!("   task stack: {:?} - {:?}", stack.start, stack.end);
            }
            if let Some(stack) = inner.kernel_stack {
                info!("   intr stack: {:?} - {:?}", stack.start, stack.end);
            }
        }

        let eip = state.instruction_pointer();
        match process.object_at(eip) {
            Some(object) if object.executable => {
                info!("caused in executable object '{}'", object.name);
            },
            Some(object) => {
                info!("caused in object '{}' at offset {:#x}",
                      object.name, eip - object.base);
            },
            None => {},
        }

        info!("stack trace:");
        for addr in self.stack_trace(&self.address_space_of(task), state.ebp) {
            info!("  {:#010x}", addr);
        }
    }

    /// Return addresses found by following saved frame pointers from `ebp`.
    pub fn stack_trace(&self, space: &AddressSpace, ebp: u32)
        -> ArrayVec<u32, STACK_TRACE_MAX_FRAMES> {
        let memory = self.services().memory;
        let mut trace = ArrayVec::new();
        let mut frame = ebp;

        while !trace.is_full() {
            let mut words = [0u8; 8];
            if !memory.read_memory(space, VAddr(frame as usize), &mut words) {
                break;
            }

            let saved_ebp = u32::from_le_bytes([words[0], words[1], words[2], words[3]]);
            let ret = u32::from_le_bytes([words[4], words[5], words[6], words[7]]);
            if ret < STACK_TRACE_MIN_RETURN {
                break;
            }

            trace.push(ret);
            frame = saved_ebp;
        }

        trace
    }

    fn address_space_of(&self, task: &Task) -> AddressSpace {
        task.process().address_space()
            .unwrap_or_else(|| self.services().memory.kernel_address_space())
    }

    /// Whatever can be read of the instruction at the saved instruction
    /// pointer.
    fn read_code(&self, task: &Task, state: &ProcessorState)
        -> ArrayVec<u8, MAX_INSTRUCTION_LEN> {
        let memory = self.services().memory;
        let space = self.address_space_of(task);
        let start = if state.is_vm86() {
            RealModeAddress { segment: state.cs as u16, offset: state.eip as u16 }.linear()
        } else {
            state.eip as usize
        };

        let mut code = ArrayVec::new();
        for i in 0..MAX_INSTRUCTION_LEN {
            let mut byte = [0u8];
            if !memory.read_memory(&space, VAddr(start + i), &mut byte) {
                break;
            }
            code.push(byte[0]);
        }

        code
    }
}

/// Length of the instruction at the start of `code`, assumed to be one that
/// can raise a divide error: `div`/`idiv` (`F6`/`F7` with a ModRM operand) or
/// `aam`. Any other opcode is taken as one byte long. `None` when `code` ends
/// before the instruction does.
pub fn divide_instruction_length(code: &[u8], default_16bit: bool) -> Option<usize> {
    let mut len = 0;
    let mut address_16bit = default_16bit;

    loop {
        match *code.get(len)? {
            0x67 => address_16bit = !default_16bit,
            0x66 | 0xf0 | 0xf2 | 0xf3 | 0x26 | 0x2e | 0x36 | 0x3e | 0x64 | 0x65 => {},
            _ => break,
        }
        len += 1;
        if len >= MAX_INSTRUCTION_LEN {
            return None;
        }
    }

    let opcode = code[len];
    len += 1;

    match opcode {
        0xf6 | 0xf7 => {},
        // aam imm8
        0xd4 => return code.get(len).map(|_| len + 1),
        _ => return Some(len),
    }

    let modrm = *code.get(len)?;
    len += 1;
    let mode = modrm >> 6;
    let rm = modrm & 0b111;

    len += match (address_16bit, mode) {
        (_, 3) => 0,
        (true, 0) if rm == 6 => 2,
        (true, 0) => 0,
        (true, 1) => 1,
        (true, _) => 2,
        (false, _) => {
            let mut extra = 0;
            if rm == 4 {
                let sib = *code.get(len)?;
                extra += 1;
                if mode == 0 && sib & 0b111 == 5 {
                    extra += 4;
                }
            }
            extra + match mode {
                0 if rm == 5 => 4,
                0 => 0,
                1 => 1,
                _ => 4,
            }
        },
    };

    (len <= code.len()).then_some(len)
}
