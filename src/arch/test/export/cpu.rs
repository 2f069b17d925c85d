use std::cell::Cell;

// Each test thread plays the role of one core, core 0 unless told otherwise.
thread_local! {
    static CORE_ID: Cell<usize> = const { Cell::new(0) };
    static PAGE_FAULT_ADDRESS: Cell<usize> = const { Cell::new(0) };
}

pub fn core_id() -> usize {
    CORE_ID.with(|id| id.get())
}

pub fn set_core_id(core: usize) {
    CORE_ID.with(|id| id.set(core));
}

pub fn page_fault_address() -> usize {
    PAGE_FAULT_ADDRESS.with(|addr| addr.get())
}

pub fn set_page_fault_address(addr: usize) {
    PAGE_FAULT_ADDRESS.with(|cell| cell.set(addr));
}

pub fn halt() {
    std::thread::yield_now();
}

pub fn perm_halt() -> ! {
    panic!("core {} halted permanently", core_id());
}
