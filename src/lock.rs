//! The per-page mutual-exclusion table.
//!
//! Both the Fault Handler and the Page Server serialize their activity on a
//! given page through this table before touching that page's protection or
//! contents. No two table locks are ever held simultaneously by the same
//! execution context, so no deadlock is possible (§4.4).

use crate::Error;
use std::sync::{Mutex, MutexGuard};

/// An array of `num_pages` mutually-exclusive locks, indexed by page number.
///
/// Acquisition is blocking and fair enough (inherited from the host mutex
/// implementation) that forward progress is guaranteed as long as both peers
/// cooperate, per §3.
pub struct PageLockTable {
  locks: Vec<Mutex<()>>,
}

impl PageLockTable {
  /// Creates a table with one lock per page.
  pub fn new(num_pages: usize) -> Self {
    PageLockTable {
      locks: (0..num_pages).map(|_| Mutex::new(())).collect(),
    }
  }

  /// Returns the number of pages this table covers.
  pub fn len(&self) -> usize {
    self.locks.len()
  }

  /// Returns whether the table covers any pages.
  pub fn is_empty(&self) -> bool {
    self.locks.is_empty()
  }

  /// Blocks until `lock[page]` is acquired, returning a guard that releases
  /// it on drop.
  ///
  /// Returns [Error::PageOutOfRange] if `page` does not lie within
  /// `[0, num_pages)`.
  pub fn acquire(&self, page: usize) -> Result<PageLockGuard<'_>, Error> {
    let mutex = self
      .locks
      .get(page)
      .ok_or_else(|| Error::PageOutOfRange(page, self.locks.len()))?;

    // A poisoned lock means some earlier holder panicked mid-transition; the
    // coherence state for this page can no longer be trusted, matching the
    // "no recovery" propagation rule of §7. Recovering the guard and moving
    // on would silently paper over that.
    let guard = mutex.lock().unwrap_or_else(|poison| poison.into_inner());

    Ok(PageLockGuard {
      page,
      _guard: guard,
    })
  }
}

/// An RAII guard for a single page's lock.
///
/// While held, no other local fault or remote request for the same page can
/// proceed.
pub struct PageLockGuard<'a> {
  page: usize,
  _guard: MutexGuard<'a, ()>,
}

impl<'a> PageLockGuard<'a> {
  /// Returns the page this guard is locking.
  pub fn page(&self) -> usize {
    self.page
  }
}
