//! The Fault Handler: a `SIGSEGV` trampoline that pulls a page from the peer
//! and installs it locally with write access (§4.2).
//!
//! The trampoline itself is installed once per process, independent of any
//! particular [`Region`](crate::region::Region); installing it this early
//! (before any region is mapped or any socket bootstrapped) mirrors the
//! source's `initSharedMemory`, which wires up `SIGSEGV` before `mmap` and
//! before the transport (§10.5). A [FaultContext] is attached afterwards, once
//! a region and its outbound stream exist, and is what the trampoline actually
//! dispatches to when a fault lands inside that region.
//!
//! Faults are matched against every currently-registered context rather than
//! a single global one, so that a process hosting more than one [Dsm] instance
//! (as the in-process two-node integration tests do, per §10.4) still routes
//! each fault to the right region.

use crate::region::Region;
use crate::{os, page, transport, AccessMode, Error};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

/// The state the trampoline needs to service a fault inside one region: the
/// region itself and the stream used to request pages from its peer.
pub(crate) struct FaultContext {
  region: Arc<Region>,
  request_out: Mutex<TcpStream>,
}

type Registry = RwLock<Vec<Arc<FaultContext>>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static INSTALL: OnceLock<Result<(), errno::Errno>> = OnceLock::new();

fn registry() -> &'static Registry {
  REGISTRY.get_or_init(|| RwLock::new(Vec::new()))
}

/// Installs the `SIGSEGV` trampoline, if it has not been installed already.
///
/// Idempotent and safe to call more than once (e.g. once per [Dsm] instance
/// sharing a process in tests); only the first call actually touches
/// `sigaction`.
pub(crate) fn install_handler() -> Result<(), Error> {
  let result = *INSTALL.get_or_init(|| unsafe {
    match os::install_siginfo_handler(libc::SIGSEGV, trampoline) {
      Ok(_previous) => Ok(()),
      Err(Error::SignalInstall(errno)) => Err(errno),
      Err(_) => unreachable!("install_siginfo_handler only returns SignalInstall on failure"),
    }
  });

  result.map_err(Error::SignalInstall)
}

/// Attaches a region and its outbound stream to the fault trampoline,
/// returning a handle the caller holds for the region's lifetime.
///
/// Calls [install_handler] itself, so a caller that skipped the early
/// standalone install (e.g. a unit test exercising only this module) still
/// gets a working trampoline.
pub(crate) fn register(region: Arc<Region>, request_out: TcpStream) -> Result<Arc<FaultContext>, Error> {
  install_handler()?;

  let ctx = Arc::new(FaultContext {
    region,
    request_out: Mutex::new(request_out),
  });

  registry()
    .write()
    .unwrap_or_else(std::sync::PoisonError::into_inner)
    .push(ctx.clone());

  Ok(ctx)
}

/// Detaches a context so the trampoline no longer considers its region.
pub(crate) fn unregister(ctx: &Arc<FaultContext>) {
  registry()
    .write()
    .unwrap_or_else(std::sync::PoisonError::into_inner)
    .retain(|candidate| !Arc::ptr_eq(candidate, ctx));
}

extern "C" fn trampoline(signum: libc::c_int, info: *mut libc::siginfo_t, _ucontext: *mut libc::c_void) {
  let fault_addr = unsafe { (*info).si_addr() } as *const u8;

  let matched = registry()
    .read()
    .unwrap_or_else(std::sync::PoisonError::into_inner)
    .iter()
    .find(|ctx| ctx.region.page_of(fault_addr).is_some())
    .cloned();

  match matched {
    Some(ctx) => {
      if let Err(err) = handle_fault(&ctx, fault_addr) {
        log::error!("fault handler failed for address {:p}: {}", fault_addr, err);
        unsafe { libc::_exit(1) };
      }
    }
    // Not our region: this signal isn't ours to handle. Chain to the default
    // disposition (process termination) rather than swallowing it (§4.2).
    None => unsafe { os::raise_default(signum) },
  }
}

/// The algorithm of §4.2, steps 1-6 (step 7, returning to the faulting
/// instruction, happens implicitly once the trampoline returns).
fn handle_fault(ctx: &FaultContext, fault_addr: *const u8) -> Result<(), Error> {
  let page = ctx
    .region
    .page_of(fault_addr)
    .expect("caller already matched this context by address");

  let _lock = ctx.region.lock_page(page)?;
  log::debug!("fault on page {}, requesting from peer", page);

  let mut buf = vec![0u8; page::size()];
  {
    let mut stream = ctx
      .request_out
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner);
    transport::send_request(&mut stream, page)?;
    transport::recv_page(&mut stream, &mut buf)?;
  }

  ctx.region.set_mode(page, AccessMode::WRITE)?;
  unsafe { ctx.region.page_bytes_mut(page) }.copy_from_slice(&buf);

  log::debug!("page {} installed with write access", page);
  Ok(())
}
