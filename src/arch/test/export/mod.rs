pub mod cpu;
pub mod logging;
pub mod sync;
pub mod task;
