//! Startup/shutdown wiring: the `SIGINT` handler and orderly socket teardown
//! (§4.6).
//!
//! The `SIGINT` handler is installed before the transport exists (mirroring
//! the source's `initSharedMemory`, which wires up `signal(SIGINT, atExit)`
//! before any socket is created, per §10.5): [install_handler] is safe to
//! call with no file descriptors registered yet, and [set_fds] is called once
//! the transport is bootstrapped. If `SIGINT` arrives before that, there is
//! nothing to close yet and the handler is a no-op beyond exiting.

use crate::Error;
use std::os::unix::io::RawFd;
use std::sync::{Mutex, OnceLock, PoisonError};

static FDS: OnceLock<Mutex<Option<(RawFd, RawFd)>>> = OnceLock::new();
static INSTALL: OnceLock<Result<(), errno::Errno>> = OnceLock::new();

fn fds() -> &'static Mutex<Option<(RawFd, RawFd)>> {
  FDS.get_or_init(|| Mutex::new(None))
}

/// Installs the `SIGINT` handler, if it has not been installed already.
pub(crate) fn install_handler() -> Result<(), Error> {
  fds(); // ensure the slot exists before a signal could possibly land

  let result = *INSTALL.get_or_init(|| unsafe {
    match crate::os::install_simple_handler(libc::SIGINT, on_sigint) {
      Ok(()) => Ok(()),
      Err(Error::SignalInstall(errno)) => Err(errno),
      Err(_) => unreachable!("install_simple_handler only returns SignalInstall on failure"),
    }
  });

  result.map_err(Error::SignalInstall)
}

/// Registers the transport's two socket descriptors so `SIGINT` (and
/// [close_fds]) can close them. Overwrites any previously registered pair.
pub(crate) fn set_fds(request_out_fd: RawFd, request_in_fd: RawFd) {
  *fds().lock().unwrap_or_else(PoisonError::into_inner) = Some((request_out_fd, request_in_fd));
}

extern "C" fn on_sigint(_signum: libc::c_int) {
  if let Some(slot) = FDS.get() {
    if let Some((out_fd, in_fd)) = *slot.lock().unwrap_or_else(PoisonError::into_inner) {
      unsafe {
        libc::close(out_fd);
        libc::close(in_fd);
      }
    }
  }

  // SIG_DFL would simply terminate here too, but matching the source's
  // explicit `exit(0)` keeps the exit code contract of §6 exact.
  unsafe { libc::_exit(0) };
}

/// Closes both transport sockets directly, without waiting for `SIGINT`.
///
/// Used by [`crate::Dsm::shutdown`], the explicit counterpart to the signal
/// path above.
pub(crate) fn close_fds(request_out_fd: RawFd, request_in_fd: RawFd) {
  unsafe {
    libc::close(request_out_fd);
    libc::close(request_in_fd);
  }
}
