//! POSIX primitives backing the coherence engine: page size, `mmap`,
//! `mprotect` and raw `sigaction` installation.
//!
//! The coherence protocol depends on a raw, `siginfo_t`-carrying signal
//! trampoline for its fault interceptor, which only POSIX-family hosts expose
//! in the form the source relies on. This crate therefore only targets `unix`.

use crate::error::Error;
use crate::AccessMode;
use std::io;
use std::os::raw::c_void;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::Once;

/// Returns the host's page size, as reported by `sysconf(_SC_PAGESIZE)`.
pub fn page_size() -> usize {
  static INIT: Once = Once::new();
  static mut PAGE_SIZE: usize = 0;

  unsafe {
    INIT.call_once(|| PAGE_SIZE = libc::sysconf(libc::_SC_PAGESIZE) as usize);
    PAGE_SIZE
  }
}

/// Returns the `errno` of the most recent failed system call.
pub fn last_errno() -> errno::Errno {
  errno::errno()
}

/// Reserves an anonymous, private mapping of `len` bytes at the fixed address
/// `base`, initially readable and writable.
///
/// The source passes `base` to `mmap` without `MAP_FIXED`, which means the
/// kernel treats it as a mere placement hint and is free to return a
/// different address if the hint is unavailable. Since the entire protocol
/// depends on both peers agreeing on the same base address, this function
/// treats a relocated mapping as a reservation failure rather than silently
/// continuing with a wrong address — surfacing the fragility the design notes
/// acknowledge as a fatal bootstrap error instead of a later, harder-to-debug
/// coherence violation.
///
/// # Safety
///
/// `base` and `len` must describe a range that is safe for this process to
/// map; in practice this means `base` must not alias any existing mapping the
/// caller wants to preserve.
pub unsafe fn reserve_fixed(base: *mut c_void, len: usize) -> Result<*mut u8, Error> {
  let addr = libc::mmap(
    base,
    len,
    libc::PROT_READ | libc::PROT_WRITE,
    libc::MAP_PRIVATE | libc::MAP_ANON,
    -1,
    0,
  );

  if addr == libc::MAP_FAILED {
    return Err(Error::Reserve(base as usize, last_errno()));
  }

  if addr != base {
    // The kernel relocated the mapping; undo it and fail fast.
    libc::munmap(addr, len);
    return Err(Error::Reserve(base as usize, errno::Errno(libc::EADDRINUSE)));
  }

  Ok(addr as *mut u8)
}

/// Releases a mapping previously reserved with [reserve_fixed].
///
/// # Safety
///
/// `base`/`len` must exactly describe a mapping obtained from
/// [reserve_fixed], and no outstanding references to it may remain.
pub unsafe fn release(base: *mut u8, len: usize) -> io::Result<()> {
  if libc::munmap(base as *mut c_void, len) != 0 {
    return Err(io::Error::last_os_error());
  }
  Ok(())
}

/// Disables further I/O on `fd` in both directions via `shutdown(2)`.
///
/// Unlike `close(2)`, this does not release the descriptor: whoever actually
/// owns `fd` may still close it exactly once, later, without risking the
/// descriptor having been reused in between. A blocking read elsewhere on the
/// same socket observes a clean `Ok(0)` (EOF) once this returns, the same
/// outcome as the peer disconnecting.
pub fn shutdown_both(fd: RawFd) -> io::Result<()> {
  if unsafe { libc::shutdown(fd, libc::SHUT_RDWR) } != 0 {
    return Err(io::Error::last_os_error());
  }
  Ok(())
}

/// Changes the protection of `len` bytes starting at `addr` to `mode`.
///
/// Returns the raw `errno` on failure; callers know the page index this
/// corresponds to and are responsible for wrapping it into [Error::Protection].
///
/// # Safety
///
/// `addr` must be page-aligned and `[addr, addr + len)` must lie entirely
/// within a mapping this process owns.
pub unsafe fn protect(addr: *mut u8, len: usize, mode: AccessMode) -> Result<(), errno::Errno> {
  let prot: libc::c_int = mode.into();

  if libc::mprotect(addr as *mut c_void, len, prot) != 0 {
    return Err(last_errno());
  }

  Ok(())
}

/// Installs a `SA_SIGINFO` handler for `signum`, replacing whatever
/// disposition was previously in effect and returning it so the caller may
/// restore it (used to chain to the default disposition for faults outside
/// the shared region).
///
/// # Safety
///
/// `handler` must be safe to invoke asynchronously on the faulting thread at
/// any point after this call returns, for the remaining lifetime of the
/// process.
pub unsafe fn install_siginfo_handler(
  signum: libc::c_int,
  handler: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut c_void),
) -> Result<libc::sigaction, Error> {
  let mut action: libc::sigaction = std::mem::zeroed();
  action.sa_sigaction = handler as usize;
  action.sa_flags = libc::SA_SIGINFO;
  libc::sigemptyset(&mut action.sa_mask);

  let mut previous: libc::sigaction = std::mem::zeroed();
  if libc::sigaction(signum, &action, &mut previous) != 0 {
    return Err(Error::SignalInstall(last_errno()));
  }

  Ok(previous)
}

/// Installs a plain (non-`SA_SIGINFO`) handler for `signum`.
///
/// # Safety
///
/// Same contract as [install_siginfo_handler].
pub unsafe fn install_simple_handler(
  signum: libc::c_int,
  handler: extern "C" fn(libc::c_int),
) -> Result<(), Error> {
  let mut action: libc::sigaction = std::mem::zeroed();
  action.sa_sigaction = handler as usize;
  libc::sigemptyset(&mut action.sa_mask);

  if libc::sigaction(signum, &action, ptr::null_mut()) != 0 {
    return Err(Error::SignalInstall(last_errno()));
  }

  Ok(())
}

/// Re-raises `signum` with its default disposition and does not return.
///
/// Used by the fault trampoline when a `SIGSEGV` falls outside the shared
/// region: such faults are not this component's to handle, and must reach
/// the process' default disposition (termination) rather than being
/// swallowed.
pub unsafe fn raise_default(signum: libc::c_int) -> ! {
  let mut action: libc::sigaction = std::mem::zeroed();
  action.sa_sigaction = libc::SIG_DFL;
  libc::sigemptyset(&mut action.sa_mask);
  libc::sigaction(signum, &action, ptr::null_mut());
  libc::raise(signum);
  // SIG_DFL for SIGSEGV terminates the process; this is unreachable in
  // practice, but a well-behaved host will not return here.
  libc::_exit(128 + signum);
}
