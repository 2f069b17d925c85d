/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/


//! Tasking system calls. Each call comes with a record holding its arguments
//! and receiving its results; handlers take the calling task and that record.

pub mod system;
pub mod tasking;
mod types;

pub use crate::syscall::types::*;

/// Longest path, terminator included, a path buffer holds.
pub const PATH_MAX: usize = 256;
