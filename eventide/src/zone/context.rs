use super::Zone;

use std::cell::RefCell;

thread_local! {
    /// The zone callbacks are currently running in. `None` means the root zone.
    ///
    /// Only [`ZoneGuard`] mutates it, in strict push/pop order.
    static CURRENT_ZONE: RefCell<Option<Zone>> = const { RefCell::new(None) };
}

/// Makes a zone current for as long as the guard lives.
///
/// The previous zone is restored on drop, so it is restored even when the
/// callback running inside the zone unwinds.
pub(crate) struct ZoneGuard {
    previous: Option<Zone>,
}

impl ZoneGuard {
    pub(crate) fn enter(zone: &Zone) -> Self {
        let next = if zone.is_root() { None } else { Some(zone.clone()) };
        let previous = CURRENT_ZONE.with(|cell| std::mem::replace(&mut *cell.borrow_mut(), next));
        Self { previous }
    }
}

impl Drop for ZoneGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_ZONE.with(|cell| {
            *cell.borrow_mut() = previous;
        });
    }
}

pub(crate) fn current() -> Option<Zone> {
    CURRENT_ZONE.with(|cell| cell.borrow().clone())
}
