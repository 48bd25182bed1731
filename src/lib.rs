#![deny(clippy::all, missing_docs, nonstandard_style, unused, warnings)]
//! A two-node, page-granularity distributed shared memory (DSM) coherence
//! engine.
//!
//! Two peers, a **primary** and a **secondary**, cooperate over a pair of TCP
//! streams to present a single flat shared virtual region. At any instant
//! exactly one peer holds each page with write access; ownership migrates on
//! demand when a peer's application code touches a page it does not currently
//! own, via a protection fault that this crate intercepts transparently.
//!
//! # Model
//!
//! Each page is in exactly one of three [AccessMode]s locally: [NONE][AccessMode::NONE],
//! [READ][AccessMode::READ] or [WRITE][AccessMode::WRITE], mirrored by the host's
//! `mprotect` bits for that page. A write to a page in `NONE` traps into a `SIGSEGV`
//! handler, which pulls the page's contents from the peer and installs it with write
//! access. The peer, in turn, must relinquish that page: its own Page Server marks the
//! page read-only for the duration of the transfer, sends the bytes, then drops to
//! `NONE`. A per-page mutex serializes this exchange against any other local activity
//! on the same page.
//!
//! # Installation
//!
//! This crate targets POSIX hosts only: its fault interceptor depends on a raw,
//! `siginfo_t`-carrying `sigaction` trampoline that only `unix` exposes in the form the
//! protocol relies on.
//!
//! ```toml
//! [dependencies]
//! dsm = "0.1.0"
//! ```
//!
//! # Example
//!
//! ```no_run
//! use dsm::Role;
//!
//! let primary: std::net::SocketAddr = "127.0.0.1:9000".parse().unwrap();
//! let secondary: std::net::SocketAddr = "127.0.0.1:9001".parse().unwrap();
//!
//! let dsm = dsm::initialize(Role::Primary, 4, primary, secondary).unwrap();
//! let base = dsm.base_address();
//!
//! unsafe {
//!   // Page 2 is owned by the primary from the start (§3): no fault, no message.
//!   *base.add(2 * dsm::page::size()) = 0xAA;
//!   // Page 0 is owned by the secondary: this store traps, pulls the page, and
//!   // installs it with write access before the store completes.
//!   *base = 0xAA;
//! }
//! ```

#[macro_use]
extern crate bitflags;

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::thread::JoinHandle;

pub use config::{Config, Role, DEFAULT_BASE_ADDRESS};
pub use error::{Error, Result};
pub use protection::AccessMode;

mod config;
mod error;
mod fault;
mod lifecycle;
mod lock;
mod os;
pub mod page;
mod protection;
mod region;
mod server;
mod transport;

use region::Region;

/// A running coherence engine instance: the region, the fault trampoline
/// registration, and the Page Server thread backing them.
///
/// Dropping a [Dsm] performs an ordinary, local teardown: it detaches the
/// region from the fault trampoline, shuts down the inbound socket (which
/// unblocks the Page Server thread's blocking read with a clean EOF, exactly
/// as a peer-initiated disconnect would) and joins that thread, then closes
/// the outbound socket as [fault::FaultContext]'s last `Arc` reference goes
/// away. By the time [Drop::drop] returns, both transport sockets are closed
/// and the Page Server thread has exited; the region's mapping is unmapped
/// once that was the last outstanding `Arc<Region>` reference.
///
/// This is distinct from [Dsm::shutdown], which matches §4.6's "no attempt is
/// made to drain in-flight requests" rule by skipping this orderly sequence
/// entirely and exiting the whole process immediately. A live `Dsm` dropped
/// without an explicit `shutdown()` — e.g. the in-process two-node test
/// harness, where many instances share one test binary — still gets a clean,
/// leak-free teardown rather than a lingering thread or socket.
pub struct Dsm {
  region: Arc<Region>,
  fault_handle: Arc<fault::FaultContext>,
  server_handle: Option<JoinHandle<()>>,
  request_out_fd: RawFd,
  request_in_fd: RawFd,
}

impl Dsm {
  /// Brings up the coherence engine: reserves the shared region, applies the
  /// initial ownership partition, installs the fault and `SIGINT` handlers,
  /// bootstraps the peer connection, and spawns the Page Server (§4.1).
  ///
  /// Blocks until the peer is connected and the Page Server is running.
  pub fn initialize(config: Config) -> Result<Self> {
    if config.num_pages == 0 {
      return Err(Error::InvalidParameter("num_pages must not be zero"));
    }

    // Signal handlers are installed before the region is mapped or any socket
    // exists, mirroring the source's `initSharedMemory` ordering (§10.5).
    lifecycle::install_handler()?;
    fault::install_handler()?;

    let region = Arc::new(region::Region::initialize(&config)?);
    log::info!(
      "region ready: base={:#x} pages={}",
      region.base_address() as usize,
      region.num_pages()
    );

    let transport = transport::Transport::bootstrap(&config)?;
    let request_out_fd = transport.request_out.as_raw_fd();
    let request_in_fd = transport.request_in.as_raw_fd();
    let transport::Transport {
      request_out,
      request_in,
    } = transport;

    lifecycle::set_fds(request_out_fd, request_in_fd);

    let fault_handle = fault::register(region.clone(), request_out)?;

    let server_region = region.clone();
    let server_handle = match std::thread::Builder::new()
      .name("dsm-page-server".to_owned())
      .spawn(move || server::run(server_region, request_in))
    {
      Ok(handle) => handle,
      Err(err) => {
        // Undo the registration above: without a Page Server thread there is
        // no `Dsm` to own `fault_handle` and later unregister it on drop.
        fault::unregister(&fault_handle);
        return Err(Error::ThreadSpawn(err));
      }
    };

    log::info!("dsm initialized as {:?}", config.role);

    Ok(Dsm {
      region,
      fault_handle,
      server_handle: Some(server_handle),
      request_out_fd,
      request_in_fd,
    })
  }

  /// Returns the fixed base address of the shared region, identical on both
  /// peers.
  pub fn base_address(&self) -> *mut u8 {
    self.region.base_address()
  }

  /// Returns the number of pages in the shared region.
  pub fn num_pages(&self) -> usize {
    self.region.num_pages()
  }

  /// Returns `page`'s locally tracked access mode.
  ///
  /// Exposed for the two-node integration test harness (§10.4), which has no
  /// other way to observe the coherence state machine from outside the
  /// crate; not part of the otherwise-stable public API.
  #[doc(hidden)]
  pub fn page_mode(&self, page: usize) -> AccessMode {
    self.region.mode(page)
  }

  /// Closes both transport sockets and exits the process (§4.6, §6).
  ///
  /// There is no graceful handshake: the peer observes `EOF` on its own next
  /// read and exits in turn. This never returns.
  pub fn shutdown(self) -> ! {
    lifecycle::close_fds(self.request_out_fd, self.request_in_fd);
    std::process::exit(0);
  }
}

impl Drop for Dsm {
  fn drop(&mut self) {
    fault::unregister(&self.fault_handle);

    // Shutting down (not closing) the inbound socket unblocks the Page
    // Server thread's blocking read with a clean EOF, exactly like a
    // peer-initiated disconnect, so it exits its loop instead of being
    // leaked. The underlying descriptor is still owned by the thread's own
    // `TcpStream` and is closed exactly once, when that drops.
    if let Err(err) = os::shutdown_both(self.request_in_fd) {
      log::warn!("failed to shut down inbound socket during teardown: {}", err);
    }

    if let Some(handle) = self.server_handle.take() {
      let _ = handle.join();
    }
  }
}

/// The fixed virtual base address of the shared region, available
/// independent of whether [Dsm::initialize] has ever been called —
/// mirroring the source's free-standing `getBaseAddress()` (§10.5).
#[inline]
pub fn base_address() -> usize {
  DEFAULT_BASE_ADDRESS
}

/// Convenience entry point matching §6's application API literally:
/// `initialize(role, num_pages, primary_addr, secondary_addr)`.
///
/// Equivalent to `Dsm::initialize(Config::new(..))`; use [Config] directly
/// (and [Dsm::initialize]) when a non-default base address is needed.
pub fn initialize(
  role: Role,
  num_pages: usize,
  primary_addr: SocketAddr,
  secondary_addr: SocketAddr,
) -> Result<Dsm> {
  Dsm::initialize(Config::new(role, num_pages, primary_addr, secondary_addr))
}
