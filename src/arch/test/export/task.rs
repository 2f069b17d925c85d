use std::boxed::Box;
use std::cell::{Cell, RefCell};

use crate::mem::{AddressSpace, ThreadLocal, VAddr};

thread_local! {
    static RESCHEDULE_REQUESTS: Cell<usize> = const { Cell::new(0) };
    static YIELD_HOOK: RefCell<Option<Box<dyn FnMut()>>> = RefCell::new(None);
    static ACTIVE_ADDRESS_SPACE: Cell<Option<AddressSpace>> = const { Cell::new(None) };
    static ACTIVE_THREAD_LOCAL: Cell<Option<ThreadLocal>> = const { Cell::new(None) };
}

/// Stands in for the yield trap: counts the request and runs the hook, which
/// plays the part of whatever the scheduler would run before coming back.
/// The hook is detached while it runs, nested yields only count.
pub fn request_reschedule() {
    RESCHEDULE_REQUESTS.with(|count| count.set(count.get() + 1));

    let hook = YIELD_HOOK.with(|hook| hook.borrow_mut().take());
    if let Some(mut hook) = hook {
        hook();
        YIELD_HOOK.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.is_none() {
                *slot = Some(hook);
            }
        });
    }
}

pub fn reschedule_requests() -> usize {
    RESCHEDULE_REQUESTS.with(|count| count.get())
}

pub fn set_yield_hook(hook: impl FnMut() + 'static) {
    YIELD_HOOK.with(|slot| *slot.borrow_mut() = Some(Box::new(hook)));
}

pub fn clear_yield_hook() {
    YIELD_HOOK.with(|slot| *slot.borrow_mut() = None);
}

pub fn switch_address_space(space: &AddressSpace) {
    ACTIVE_ADDRESS_SPACE.with(|active| active.set(Some(*space)));
}

pub fn active_address_space() -> Option<AddressSpace> {
    ACTIVE_ADDRESS_SPACE.with(|active| active.get())
}

pub fn set_thread_local(tls: &ThreadLocal) {
    ACTIVE_THREAD_LOCAL.with(|active| active.set(Some(*tls)));
}

pub fn active_thread_local() -> Option<ThreadLocal> {
    ACTIVE_THREAD_LOCAL.with(|active| active.get())
}

pub fn idle_entry() -> VAddr {
    VAddr(0xc000_1000)
}

pub fn spawn_entry() -> VAddr {
    VAddr(0xc000_2000)
}
