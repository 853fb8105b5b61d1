//! Critical-section bracketing for single-threaded-cooperative hosts.
//!
//! Unlike a hardware spinlock, nothing here spins: the arena and the broker
//! assume one logical executor. A multi-interrupt host that
//! still wants mutual exclusion against a preempting context supplies
//! `enter`/`exit` hooks; every public operation is then bracketed
//! `enter -> body -> exit`. With no hooks supplied, the bracket is a no-op and
//! the cell behaves like a plain `RefCell`-shaped wrapper.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// A pair of optional hook functions bracketing every public operation.
///
/// Shaped like a spinlock guard (a `Deref`/`DerefMut`/`Drop` guard around an
/// `UnsafeCell`), but brackets with caller-supplied hooks instead of an
/// atomic compare-exchange loop.
#[derive(Clone, Copy)]
pub struct CriticalSection {
    enter: Option<fn()>,
    exit: Option<fn()>,
}

impl CriticalSection {
    /// No hooks: the bracket is a no-op.
    pub const NONE: CriticalSection = CriticalSection {
        enter: None,
        exit: None,
    };

    /// Installs both hooks. The bracket is only applied when *both* hooks
    /// are present.
    pub const fn new(enter: fn(), exit: fn()) -> Self {
        CriticalSection {
            enter: Some(enter),
            exit: Some(exit),
        }
    }

    #[inline]
    fn enter(&self) {
        if let (Some(enter), Some(_)) = (self.enter, self.exit) {
            enter();
        }
    }

    #[inline]
    fn exit(&self) {
        if let (Some(_), Some(exit)) = (self.enter, self.exit) {
            exit();
        }
    }

    /// Runs `f` bracketed by `enter`/`exit`, for callers that manage their
    /// own state rather than wrapping it in a [`CriticalCell`].
    #[inline]
    pub fn bracket<R>(&self, f: impl FnOnce() -> R) -> R {
        self.enter();
        let result = f();
        self.exit();
        result
    }
}

/// Interior-mutable cell bracketed by an optional [`CriticalSection`].
///
/// Single-threaded-cooperative by contract: this does not provide mutual
/// exclusion against a genuinely concurrent second core, only against a
/// preempting interrupt/task that the caller's hooks suspend.
pub struct CriticalCell<T> {
    guard: CriticalSection,
    data: UnsafeCell<T>,
}

impl<T> CriticalCell<T> {
    pub const fn new(value: T, guard: CriticalSection) -> Self {
        Self {
            guard,
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> CriticalCellGuard<'_, T> {
        self.guard.enter();
        CriticalCellGuard { cell: self }
    }
}

// SAFETY:
// - Access to `data` is only ever taken through `lock()`, which brackets every
//   access with the caller-supplied critical section.
// - The crate's concurrency model is single-threaded
//   cooperative; `Sync` here only enables sharing a `&CriticalCell` across
//   call sites within that one logical executor, not genuine multi-core
//   access.
unsafe impl<T: Send> Sync for CriticalCell<T> {}

pub struct CriticalCellGuard<'a, T> {
    cell: &'a CriticalCell<T>,
}

impl<T> Deref for CriticalCellGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the critical section brackets this access; no other guard
        // for this cell can be alive concurrently under the single-executor
        // contract.
        unsafe { &*self.cell.data.get() }
    }
}

impl<T> DerefMut for CriticalCellGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: see `Deref` above.
        unsafe { &mut *self.cell.data.get() }
    }
}

impl<T> Drop for CriticalCellGuard<'_, T> {
    fn drop(&mut self) {
        self.cell.guard.exit();
    }
}
