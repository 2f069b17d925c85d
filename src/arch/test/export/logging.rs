use core::fmt;
use std::println;
use crate::logging::{set_logger, Logger, Severity};

pub struct StdoutLogger;

pub static LOGGER_STDOUT: StdoutLogger = StdoutLogger;

impl Logger for StdoutLogger {
    fn log(&self, severity: Severity, args: fmt::Arguments) {
        println!("{}{:>8}: {}\x1b[0m", severity.color(), severity.label(), args);
    }
}

#[ctor::ctor]
fn init() {
    set_logger(&LOGGER_STDOUT);
}
