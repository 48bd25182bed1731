//! Page related functions.

use crate::os;
use std::sync::Once;

/// Returns the operating system's page size.
///
/// This function uses an internally cached page size, and can be called
/// repeatedly without incurring a significant performance penalty.
///
/// # Examples
///
/// ```
/// # use dsm::page;
/// let size = page::size(); // Most likely 4096
/// ```
#[inline]
pub fn size() -> usize {
  static INIT: Once = Once::new();
  static mut PAGE_SIZE: usize = 0;

  unsafe {
    INIT.call_once(|| PAGE_SIZE = os::page_size());
    PAGE_SIZE
  }
}

/// Rounds an address down to its closest page boundary.
///
/// # Examples
///
/// ```
/// # use dsm::page;
/// let unaligned_pointer = (page::size() + 1) as *const ();
///
/// assert_eq!(page::floor(unaligned_pointer), page::size() as *const _);
/// ```
#[inline]
pub fn floor<T>(address: *const T) -> *const T {
  (address as usize & !(size() - 1)) as *const T
}

/// Rounds an address up to its closest page boundary.
///
/// # Examples
///
/// ```
/// # use dsm::page;
/// let unaligned_pointer = (page::size() - 1) as *const ();
///
/// assert_eq!(page::ceil(unaligned_pointer), page::size() as *const _);
/// ```
#[inline]
pub fn ceil<T>(address: *const T) -> *const T {
  match (address as usize).checked_add(size()) {
    Some(offset) => ((offset - 1) & !(size() - 1)) as *const T,
    None => floor(address),
  }
}

/// Computes the page index of `address` relative to `base`, by integer
/// division of the byte offset by the host page size.
///
/// This mirrors the source's `(faultAddr - baseAddr) / pageSize` computation
/// exactly: no alignment rounding is performed beyond the division itself.
///
/// # Panics
///
/// Panics if `address` lies before `base`.
#[inline]
pub fn index_of(base: *const u8, address: *const u8) -> usize {
  let offset = (address as usize)
    .checked_sub(base as usize)
    .expect("fault address precedes region base");
  offset / size()
}

/// Returns the address of page `index` within a region based at `base`.
#[inline]
pub fn address_of(base: *const u8, index: usize) -> *const u8 {
  (base as usize + index * size()) as *const u8
}
