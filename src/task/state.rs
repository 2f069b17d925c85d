/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use core::fmt;
use core::fmt::{Display, Formatter};

use crate::mem::{RealModeAddress, VAddr};
use crate::misc::R;
use crate::task::SecurityLevel;

pub const KERNEL_CODE_SELECTOR: u32 = 0x08;
pub const KERNEL_DATA_SELECTOR: u32 = 0x10;
pub const USER_CODE_SELECTOR: u32 = 0x18 | 3;
pub const USER_DATA_SELECTOR: u32 = 0x20 | 3;
/// Segments based on the running task's thread-local block.
pub const USER_THREAD_LOCAL_SELECTOR: u32 = 0x28 | 3;
pub const KERNEL_THREAD_LOCAL_SELECTOR: u32 = 0x30;

pub const EFLAGS_RESERVED: u32 = 1 << 1;
pub const EFLAGS_IF: u32 = 1 << 9;
pub const EFLAGS_IOPL3: u32 = 3 << 12;
pub const EFLAGS_VM: u32 = 1 << 17;

/// Register frame of an interrupted i386 task, laid out the way the interrupt
/// entry stubs push it: data segments, `pusha`, vector and error code, then the
/// frame pushed by the processor itself. `esp` and `ss` are only meaningful
/// when the interrupt crossed a privilege level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ProcessorState {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,

    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// `esp` as saved by `pusha`, ignored on return.
    pub kernel_esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,

    pub intr: u32,
    pub error: u32,

    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl ProcessorState {
    /// Entry state of a ring 0 task.
    pub fn kernel(entry: VAddr, stack_top: VAddr) -> Self {
        Self {
            gs: KERNEL_DATA_SELECTOR,
            fs: KERNEL_DATA_SELECTOR,
            es: KERNEL_DATA_SELECTOR,
            ds: KERNEL_DATA_SELECTOR,
            eip: entry.as_u32(),
            cs: KERNEL_CODE_SELECTOR,
            eflags: EFLAGS_RESERVED | EFLAGS_IF,
            esp: stack_top.as_u32(),
            ss: KERNEL_DATA_SELECTOR,
            ..Default::default()
        }
    }

    /// Entry state of a ring 3 task. Drivers are granted port I/O.
    pub fn user(entry: VAddr, stack_top: VAddr, level: SecurityLevel) -> Self {
        let mut eflags = EFLAGS_RESERVED | EFLAGS_IF;
        if level.permits(SecurityLevel::Driver) {
            eflags |= EFLAGS_IOPL3;
        }

        Self {
            gs: USER_THREAD_LOCAL_SELECTOR,
            fs: USER_DATA_SELECTOR,
            es: USER_DATA_SELECTOR,
            ds: USER_DATA_SELECTOR,
            eip: entry.as_u32(),
            cs: USER_CODE_SELECTOR,
            eflags,
            esp: stack_top.as_u32(),
            ss: USER_DATA_SELECTOR,
            ..Default::default()
        }
    }

    /// Entry state of a virtual-8086 task running the real-mode handler at
    /// `handler` with `regs` loaded.
    pub fn vm86(
        handler: RealModeAddress,
        stack: RealModeAddress,
        regs: &Vm86Registers,
    ) -> Self {
        Self {
            es: regs.es as u32,
            ds: regs.ds as u32,
            edi: regs.di as u32,
            esi: regs.si as u32,
            ebx: regs.bx as u32,
            edx: regs.dx as u32,
            ecx: regs.cx as u32,
            eax: regs.ax as u32,
            eip: handler.offset as u32,
            cs: handler.segment as u32,
            eflags: EFLAGS_RESERVED | EFLAGS_IF | EFLAGS_VM,
            esp: stack.offset as u32,
            ss: stack.segment as u32,
            ..Default::default()
        }
    }

    pub fn instruction_pointer(&self) -> VAddr {
        VAddr(self.eip as usize)
    }

    pub fn is_vm86(&self) -> bool {
        self.eflags & EFLAGS_VM > 0
    }
}

impl Display for ProcessorState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "eax={:x}  ebx={:x}  ecx={:x}  edx={:x}",
                 R(self.eax), R(self.ebx), R(self.ecx), R(self.edx))?;
        writeln!(f, "edi={:x}  esi={:x}  ebp={:x}  esp={:x}",
                 R(self.edi), R(self.esi), R(self.ebp), R(self.esp))?;
        writeln!(f, "eip={:x}  eflags={:x}  intr={}  error={:#x}",
                 R(self.eip), R(self.eflags), self.intr, self.error)?;
        write!(f, "cs={:04x}  ss={:04x}  ds={:04x}  es={:04x}  fs={:04x}  gs={:04x}",
               self.cs, self.ss, self.ds, self.es, self.fs, self.gs)
    }
}

/// 16-bit register set exchanged with a BIOS service run in virtual-8086 mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Vm86Registers {
    pub ax: u16,
    pub bx: u16,
    pub cx: u16,
    pub dx: u16,
    pub si: u16,
    pub di: u16,
    pub ds: u16,
    pub es: u16,
}

impl Vm86Registers {
    pub fn from_state(state: &ProcessorState) -> Self {
        Self {
            ax: state.eax as u16,
            bx: state.ebx as u16,
            cx: state.ecx as u16,
            dx: state.edx as u16,
            si: state.esi as u16,
            di: state.edi as u16,
            ds: state.ds as u16,
            es: state.es as u16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_grants_port_io_to_drivers_only() {
        let driver = ProcessorState::user(VAddr(0x1000), VAddr(0x8000),
                                          SecurityLevel::Driver);
        let app = ProcessorState::user(VAddr(0x1000), VAddr(0x8000),
                                       SecurityLevel::Application);

        assert_eq!(driver.eflags & EFLAGS_IOPL3, EFLAGS_IOPL3);
        assert_eq!(app.eflags & EFLAGS_IOPL3, 0);
        assert_eq!(app.cs, USER_CODE_SELECTOR);
        assert_eq!(app.esp, 0x8000);
    }

    #[test]
    fn it_round_trips_vm86_registers() {
        let regs = Vm86Registers { ax: 0x4f00, di: 0x200, es: 0x1000, ..Default::default() };
        let state = ProcessorState::vm86(
            RealModeAddress { segment: 0xc000, offset: 0x10 },
            RealModeAddress { segment: 0x8000, offset: 0xfff0 },
            &regs,
        );

        assert!(state.is_vm86());
        assert_eq!(state.cs, 0xc000);
        assert_eq!(Vm86Registers::from_state(&state), regs);
    }
}
