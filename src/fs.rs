/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! Filesystem collaborator, as seen by the tasking core.

use alloc::string::String;

use crate::task::{Pid, Task};

pub type Fd = i32;

pub const FD_NONE: Fd = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    Busy,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
    Mountpoint,
    Root,
    Pipe,
}

impl NodeKind {
    /// Whether the node can serve as a working directory.
    pub fn is_directory(self) -> bool {
        matches!(self, NodeKind::Folder | NodeKind::Mountpoint | NodeKind::Root)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsNode {
    pub kind: NodeKind,
    pub absolute_path: String,
}

pub trait FilesystemService: Sync {
    /// Opens `path` for reading, relative paths being resolved against the
    /// working directory of `task`'s process.
    fn open(&self, path: &str, task: &Task) -> Result<Fd, FsError>;

    fn close(&self, pid: Pid, fd: Fd);

    fn read(&self, fd: Fd, offset: u64, buffer: &mut [u8])
        -> Result<usize, FsError>;

    fn find(&self, path: &str) -> Result<FsNode, FsError>;

    /// Duplicates the `source` process' standard descriptors into `target`.
    /// Entries of `source_stdio` equal to `FD_NONE` are left unmapped.
    fn create_stdio(&self, source: Pid, source_stdio: [Fd; 3], target: Pid)
        -> [Fd; 3];
}
