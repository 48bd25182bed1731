//! The Page Server: services the inbound request stream for the lifetime of
//! the process (§4.3).

use crate::region::Region;
use crate::{transport, AccessMode, Error};
use std::net::TcpStream;
use std::sync::Arc;

/// Runs the Page Server loop on the calling thread until the peer
/// disconnects cleanly, or a fatal transport/protection error occurs.
///
/// Intended to be the body of a dedicated thread spawned by
/// [`crate::Dsm::initialize`]; there is no return value to hand a caller, so
/// a fatal error here terminates the process directly, matching §7's "every
/// error surfaces to the process boundary" rule for contexts that have no one
/// to hand a `Result` to.
pub(crate) fn run(region: Arc<Region>, mut stream: TcpStream) {
  loop {
    match transport::recv_request(&mut stream) {
      Ok(page) => {
        if let Err(err) = serve_page(&region, &mut stream, page) {
          log::error!("page server failed to serve page {}: {}", page, err);
          std::process::exit(1);
        }
      }
      Err(Error::PeerDisconnected) => {
        log::info!("peer disconnected; page server shutting down");
        return;
      }
      Err(err) => {
        log::error!("page server transport error: {}", err);
        std::process::exit(1);
      }
    }
  }
}

/// The algorithm of §4.3: lock, mark read-only, send, relinquish, unlock.
fn serve_page(region: &Region, stream: &mut TcpStream, page: usize) -> Result<(), Error> {
  let _lock = region.lock_page(page)?;

  region.set_mode(page, AccessMode::READ)?;
  let bytes = unsafe { region.page_bytes(page) };
  transport::send_page(stream, bytes)?;
  region.set_mode(page, AccessMode::NONE)?;

  log::debug!("served page {} to peer", page);
  Ok(())
}
