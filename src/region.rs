//! The Region Manager: reserves the shared virtual region, applies the
//! initial ownership split, and tracks each page's current access mode.

use crate::config::{Config, Role};
use crate::lock::{PageLockGuard, PageLockTable};
use crate::{os, page, AccessMode, Error};
use std::sync::atomic::{AtomicU8, Ordering};

/// The shared virtual region and the per-page bookkeeping needed to mediate
/// access to it.
///
/// This owns the `mmap`-ed memory for the lifetime of the process: the
/// region is created at startup and lives until the process exits, matching
/// §3's lifecycle (no dynamic resize, no teardown short of process exit).
pub struct Region {
  base: *mut u8,
  num_pages: usize,
  modes: Vec<AtomicU8>,
  locks: PageLockTable,
}

// The region is mapped memory plus atomics; both are safe to share across
// the application thread, the fault trampoline and the Page Server thread.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
  /// Reserves the region at `config.base_address` and applies the initial
  /// ownership partition described in §3: the secondary starts with the
  /// first half of the pages in [AccessMode::WRITE] and the primary the
  /// mirror image, with odd `num_pages` rounding the split toward the
  /// secondary.
  pub fn initialize(config: &Config) -> Result<Self, Error> {
    if config.num_pages == 0 {
      return Err(Error::InvalidParameter("num_pages must not be zero"));
    }

    let page_size = page::size();
    let len = config.num_pages * page_size;
    let base =
      unsafe { os::reserve_fixed(config.base_address as *mut std::os::raw::c_void, len)? };

    let region = Region {
      base,
      num_pages: config.num_pages,
      modes: (0..config.num_pages)
        .map(|_| AtomicU8::new(AccessMode::READ_WRITE.bits()))
        .collect(),
      locks: PageLockTable::new(config.num_pages),
    };

    region.apply_initial_partition(config.role)?;
    log::info!(
      "reserved {} pages ({} bytes) at {:#x}",
      config.num_pages,
      len,
      base as usize
    );

    Ok(region)
  }

  /// Tightens protection on the half of the region this role does not own,
  /// in a single call per §10.5 (the source `mprotect`s the whole
  /// non-owned half at once, not page by page).
  fn apply_initial_partition(&self, role: Role) -> Result<(), Error> {
    let half = self.num_pages / 2;
    if half == 0 {
      return Ok(());
    }

    let page_size = page::size();
    let (owned_start, unowned_start) = if role.owns_first_half() {
      (0, half)
    } else {
      (half, 0)
    };

    let unowned_ptr = unsafe { self.base.add(unowned_start * page_size) };
    self.set_protection_raw(unowned_ptr, half * page_size, AccessMode::NONE, unowned_start)?;

    for page in unowned_start..unowned_start + half {
      self.modes[page].store(AccessMode::NONE.bits(), Ordering::SeqCst);
    }
    for page in owned_start..owned_start + half {
      self.modes[page].store(AccessMode::WRITE.bits(), Ordering::SeqCst);
    }

    Ok(())
  }

  /// Returns the region's fixed base address.
  pub fn base_address(&self) -> *mut u8 {
    self.base
  }

  /// Returns the number of pages in the region.
  pub fn num_pages(&self) -> usize {
    self.num_pages
  }

  /// Returns the page index `address` falls within, or an error if it lies
  /// outside the region.
  pub fn page_of(&self, address: *const u8) -> Option<usize> {
    let base = self.base as usize;
    let addr = address as usize;
    let page_size = page::size();

    if addr < base || addr >= base + self.num_pages * page_size {
      return None;
    }

    Some((addr - base) / page_size)
  }

  /// Returns a raw pointer to the start of `page`.
  pub fn page_ptr(&self, page: usize) -> *mut u8 {
    unsafe { self.base.add(page * page::size()) }
  }

  /// Returns `page`'s bytes as a slice.
  ///
  /// # Safety
  ///
  /// The caller must hold `page`'s lock and must not race a concurrent
  /// protection change that would make the page unreadable.
  pub unsafe fn page_bytes(&self, page: usize) -> &[u8] {
    std::slice::from_raw_parts(self.page_ptr(page), page::size())
  }

  /// Returns `page`'s bytes as a mutable slice.
  ///
  /// # Safety
  ///
  /// Same contract as [Region::page_bytes], plus the page must currently be
  /// writable.
  #[allow(clippy::mut_from_ref)]
  pub unsafe fn page_bytes_mut(&self, page: usize) -> &mut [u8] {
    std::slice::from_raw_parts_mut(self.page_ptr(page), page::size())
  }

  /// Returns the locally-tracked access mode of `page`.
  pub fn mode(&self, page: usize) -> AccessMode {
    AccessMode::from_bits_truncate(self.modes[page].load(Ordering::SeqCst))
  }

  /// Changes the host protection of `page` to `mode` and updates the
  /// locally-tracked mode. Callers must hold `page`'s lock.
  pub fn set_mode(&self, page: usize, mode: AccessMode) -> Result<(), Error> {
    self.set_protection_raw(self.page_ptr(page), page::size(), mode, page)?;
    self.modes[page].store(mode.bits(), Ordering::SeqCst);
    Ok(())
  }

  fn set_protection_raw(
    &self,
    addr: *mut u8,
    len: usize,
    mode: AccessMode,
    page_for_error: usize,
  ) -> Result<(), Error> {
    unsafe { os::protect(addr, len, mode) }
      .map_err(|errno| Error::Protection(page_for_error, errno))
  }

  /// Acquires `page`'s lock, blocking until available.
  pub fn lock_page(&self, page: usize) -> Result<PageLockGuard<'_>, Error> {
    self.locks.acquire(page)
  }
}

impl Drop for Region {
  fn drop(&mut self) {
    let len = self.num_pages * page::size();
    if let Err(err) = unsafe { os::release(self.base, len) } {
      log::warn!("failed to unmap shared region at {:#x}: {}", self.base as usize, err);
    }
  }
}
