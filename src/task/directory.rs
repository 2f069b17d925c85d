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
use hashbrown::HashMap;
use thiserror_no_std::Error;

use crate::sync::{Spinlock, WaitQueue};
use crate::task::{SecurityLevel, Tid};

pub const MAX_IDENTIFIER_LEN: usize = 512;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("identifier is empty or too long")]
    InvalidIdentifier,

    #[error("identifier already taken")]
    AlreadyTaken,

    #[error("identifier held by a more privileged task")]
    NotPermitted,
}

struct Entry {
    tid: Tid,
    security_level: SecurityLevel,
}

/// Names tasks register under so that others can find them.
///
/// A name held by a live task can only be taken over by a strictly more
/// privileged task. Names of dead tasks are free.
pub struct TaskDirectory {
    entries: Spinlock<HashMap<String, Entry>>,

    /// Tasks blocked until some name gets registered. They are all woken on
    /// every registration and look their name up again.
    awaiters: WaitQueue<Tid>,
}

impl TaskDirectory {
    pub fn new() -> Self {
        Self {
            entries: Spinlock::new(HashMap::new()),
            awaiters: WaitQueue::new(),
        }
    }

    /// Registers `tid` under `identifier`. `is_alive` tells whether a current
    /// holder still exists. Wake-ups of awaiting tasks are left to the caller,
    /// through `wake_awaiters`.
    pub fn register(
        &self,
        identifier: &str,
        tid: Tid,
        security_level: SecurityLevel,
        is_alive: impl Fn(Tid) -> bool,
    ) -> Result<(), RegistrationError> {
        if identifier.is_empty() || identifier.len() > MAX_IDENTIFIER_LEN {
            return Err(RegistrationError::InvalidIdentifier);
        }

        let mut entries = self.entries.lock();

        if let Some(holder) = entries.get(identifier) {
            if holder.tid != tid && is_alive(holder.tid) {
                if security_level == holder.security_level {
                    return Err(RegistrationError::AlreadyTaken);
                }
                if !security_level.permits(holder.security_level) {
                    return Err(RegistrationError::NotPermitted);
                }
            }
        }

        entries.insert(String::from(identifier), Entry { tid, security_level });

        Ok(())
    }

    pub fn get(&self, identifier: &str) -> Option<Tid> {
        self.entries.lock().get(identifier).map(|entry| entry.tid)
    }

    /// First identifier `tid` is registered under, in no particular order.
    pub fn identifier_of(&self, tid: Tid) -> Option<String> {
        self.entries.lock()
            .iter()
            .find(|(_, entry)| entry.tid == tid)
            .map(|(name, _)| name.clone())
    }

    /// Forgets every name held by `tid`.
    pub fn remove_task(&self, tid: Tid) {
        self.entries.lock().retain(|_, entry| entry.tid != tid);
    }

    /// Registers `waiter` for the next registration, unless `identifier` is
    /// already known. Returns whether `waiter` was registered.
    pub fn await_identifier(&self, identifier: &str, waiter: Tid) -> bool {
        self.awaiters.add_unless(waiter, || self.get(identifier).is_some())
    }

    pub fn wake_awaiters(&self, wake: impl FnMut(Tid)) {
        self.awaiters.wake_all(wake);
    }

    pub fn forget_awaiter(&self, waiter: Tid) {
        self.awaiters.remove(waiter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;

    #[test]
    fn it_registers_and_looks_up() {
        let dir = TaskDirectory::new();

        dir.register("vbe", 12, SecurityLevel::Driver, |_| true).unwrap();

        assert_eq!(dir.get("vbe"), Some(12));
        assert_eq!(dir.get("ps2"), None);
        assert_eq!(dir.identifier_of(12).as_deref(), Some("vbe"));
    }

    #[test]
    fn it_protects_names_of_live_holders() {
        let dir = TaskDirectory::new();
        dir.register("zipneis", 5, SecurityLevel::Driver, |_| true).unwrap();

        assert_eq!(dir.register("zipneis", 6, SecurityLevel::Driver, |_| true),
                   Err(RegistrationError::AlreadyTaken));
        assert_eq!(dir.register("zipneis", 7, SecurityLevel::Application, |_| true),
                   Err(RegistrationError::NotPermitted));

        dir.register("zipneis", 8, SecurityLevel::Kernel, |_| true).unwrap();
        assert_eq!(dir.get("zipneis"), Some(8));
    }

    #[test]
    fn it_hands_over_names_of_dead_holders() {
        let dir = TaskDirectory::new();
        dir.register("tty", 5, SecurityLevel::Kernel, |_| true).unwrap();

        dir.register("tty", 9, SecurityLevel::Application, |tid| tid != 5).unwrap();
        assert_eq!(dir.get("tty"), Some(9));
    }

    #[test]
    fn it_rejects_invalid_identifiers() {
        let dir = TaskDirectory::new();
        let long = "x".repeat(MAX_IDENTIFIER_LEN + 1);

        assert_eq!(dir.register("", 1, SecurityLevel::Kernel, |_| true),
                   Err(RegistrationError::InvalidIdentifier));
        assert_eq!(dir.register(&long, 1, SecurityLevel::Kernel, |_| true),
                   Err(RegistrationError::InvalidIdentifier));
    }

    #[test]
    fn it_forgets_names_of_removed_tasks() {
        let dir = TaskDirectory::new();
        dir.register("a", 3, SecurityLevel::Kernel, |_| true).unwrap();
        dir.register("b", 3, SecurityLevel::Kernel, |_| true).unwrap();
        dir.register("c", 4, SecurityLevel::Kernel, |_| true).unwrap();

        dir.remove_task(3);

        assert_eq!(dir.get("a"), None);
        assert_eq!(dir.get("b"), None);
        assert_eq!(dir.get("c"), Some(4));
    }

    #[test]
    fn it_only_parks_awaiters_of_unknown_names() {
        let dir = TaskDirectory::new();
        dir.register("known", 3, SecurityLevel::Kernel, |_| true).unwrap();

        assert!(!dir.await_identifier("known", 10));
        assert!(dir.await_identifier("unknown", 10));

        let mut woken = vec![];
        dir.wake_awaiters(|tid| woken.push(tid));
        assert_eq!(woken, vec![10]);
    }
}
