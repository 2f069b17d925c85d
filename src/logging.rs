/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use crate::sync::Spinlock;

use core::fmt;

pub static DEFAULT_LOGGER: Spinlock<&'static (dyn Logger + Sync)>
    = Spinlock::new(&NULL_LOGGER);

/// A log sink. The default logger's lock is held during `log`, so lines from
/// different cores never interleave.
pub trait Logger {
    fn log(&self, severity: Severity, args: fmt::Arguments);
}

pub fn set_logger(logger: &'static (dyn Logger + Sync)) {
    *DEFAULT_LOGGER.lock() = logger;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        use Severity::*;

        match self {
            Debug       => "debug",
            Info        => "info",
            Notice      => "notice",
            Warning     => "warn",
            Error       => "error",
            Critical    => "critical",
            Alert       => "alert",
            Emergency   => "emerg",
        }
    }

    /// ANSI escape sequence a terminal sink prefixes lines with.
    pub fn color(&self) -> &'static str {
        use Severity::*;

        match self {
            Debug       => "\x1b[90m",
            Info        => "\x1b[37m",
            Notice      => "\x1b[97m",
            Warning     => "\x1b[93m",
            Error       => "\x1b[31m",
            Critical    => "\x1b[1;31m",
            Alert       => "\x1b[1;97;41m",
            Emergency   => "\x1b[1;93;41m",
        }
    }
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => ({
        let logger = $crate::logging::DEFAULT_LOGGER.lock();
        logger.log($crate::logging::Severity::Debug, format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => ({
        let logger = $crate::logging::DEFAULT_LOGGER.lock();
        logger.log($crate::logging::Severity::Info, format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! notice {
    ($($arg:tt)*) => ({
        let logger = $crate::logging::DEFAULT_LOGGER.lock();
        logger.log($crate::logging::Severity::Notice, format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => ({
        let logger = $crate::logging::DEFAULT_LOGGER.lock();
        logger.log($crate::logging::Severity::Warning, format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => ({
        let logger = $crate::logging::DEFAULT_LOGGER.lock();
        logger.log($crate::logging::Severity::Error, format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! critical {
    ($($arg:tt)*) => ({
        let logger = $crate::logging::DEFAULT_LOGGER.lock();
        logger.log($crate::logging::Severity::Critical, format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! alert {
    ($($arg:tt)*) => ({
        let logger = $crate::logging::DEFAULT_LOGGER.lock();
        logger.log($crate::logging::Severity::Alert, format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! emergency {
    ($($arg:tt)*) => ({
        let logger = $crate::logging::DEFAULT_LOGGER.lock();
        logger.log($crate::logging::Severity::Emergency, format_args!($($arg)*));
    });
}

struct NullLogger;

static NULL_LOGGER: NullLogger = NullLogger;

impl Logger for NullLogger {
    fn log(&self, _severity: Severity, _args: fmt::Arguments) {
    }
}
