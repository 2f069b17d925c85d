use std::cell::Cell;

thread_local! {
    static CRITICAL_REGION_DEPTH: Cell<u32> = const { Cell::new(0) };
    static RESTORE_INTERRUPTS: Cell<bool> = const { Cell::new(false) };
    static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(true) };
}

pub fn push_critical_region() {
    let was_enabled = INTERRUPTS_ENABLED.with(|flag| flag.replace(false));
    let prev = CRITICAL_REGION_DEPTH.with(|depth| {
        let prev = depth.get();
        depth.set(prev + 1);
        prev
    });

    if prev == 0 {
        RESTORE_INTERRUPTS.with(|restore| restore.set(was_enabled));
    }
}

pub fn pop_critical_region() {
    let prev = CRITICAL_REGION_DEPTH.with(|depth| {
        let prev = depth.get();
        assert!(prev > 0, "unbalanced critical region");
        depth.set(prev - 1);
        prev
    });

    if prev == 1 && RESTORE_INTERRUPTS.with(|restore| restore.get()) {
        INTERRUPTS_ENABLED.with(|flag| flag.set(true));
    }
}

pub fn critical_region_depth() -> u32 {
    CRITICAL_REGION_DEPTH.with(|depth| depth.get())
}

pub fn interrupts_enabled() -> bool {
    INTERRUPTS_ENABLED.with(|flag| flag.get())
}

pub fn set_interrupts_enabled(enabled: bool) {
    INTERRUPTS_ENABLED.with(|flag| flag.set(enabled));
}
