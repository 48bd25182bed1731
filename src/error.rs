//! Error types and utilities.

use failure::Fail;

/// The result type used by this library.
pub type Result<T> = ::std::result::Result<T, Error>;

/// A collection of possible errors.
///
/// Every fatal condition named in the coherence protocol surfaces as one of
/// these variants. There is no recovery path anywhere in the core: an `Error`
/// returned from [`crate::initialize`] is meant to be mapped directly onto a
/// non-zero process exit by the caller, and the Fault Handler / Page Server
/// report the equivalent condition to stderr and exit the process themselves,
/// since neither runs on a context that has anyone to hand a `Result` to.
#[derive(Debug, Fail)]
pub enum Error {
  /// Reserving the shared region at its fixed base address failed.
  #[fail(display = "failed to reserve the shared region at {:#x}: {}", _0, _1)]
  Reserve(usize, errno::Errno),
  /// Installing the `SIGSEGV` or `SIGINT` handler failed.
  #[fail(display = "failed to install signal handler: {}", _0)]
  SignalInstall(errno::Errno),
  /// A protection change (`mprotect` or equivalent) failed mid-protocol.
  #[fail(display = "failed to change protection of page {}: {}", _0, _1)]
  Protection(usize, errno::Errno),
  /// Bootstrapping the peer connection (bind, listen, connect or accept)
  /// failed.
  #[fail(display = "failed to bootstrap transport: {}", _0)]
  Bootstrap(#[cause] ::std::io::Error),
  /// The peer could not be reached within the configured connect deadline.
  #[fail(display = "could not connect to peer {} within the deadline", _0)]
  ConnectTimeout(::std::net::SocketAddr),
  /// A send or receive on the transport failed or returned a short frame that
  /// could not be completed (e.g. the peer disconnected mid-frame).
  #[fail(display = "transport I/O failed: {}", _0)]
  Transport(#[cause] ::std::io::Error),
  /// The peer disconnected cleanly, which this protocol treats as an
  /// unrecoverable (fatal) condition for any in-flight request.
  #[fail(display = "peer disconnected")]
  PeerDisconnected,
  /// A page index received or computed does not lie within `[0, num_pages)`.
  #[fail(display = "page index {} is out of range (0..{})", _0, _1)]
  PageOutOfRange(usize, usize),
  /// A caller-supplied parameter was invalid.
  #[fail(display = "invalid parameter: {}", _0)]
  InvalidParameter(&'static str),
  /// Spawning the Page Server thread failed.
  #[fail(display = "failed to spawn the page server thread: {}", _0)]
  ThreadSpawn(#[cause] ::std::io::Error),
}

impl From<::std::io::Error> for Error {
  fn from(error: ::std::io::Error) -> Self {
    Error::Transport(error)
  }
}
