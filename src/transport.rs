//! The peer connection: bootstrap and the wire framing used once connected.
//!
//! Each node ends up with two independent [`TcpStream`]s: one it only writes
//! requests to and reads replies from (driven by its own Fault Handler), and
//! one it only reads requests from and writes replies to (driven by its own
//! Page Server). Keeping the two directions on separate sockets, each with a
//! single reader and a single writer, avoids interleaved frames without any
//! additional locking (§5).

use crate::config::{Config, Role};
use crate::{page, Error};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

/// The two directional streams wired up during bootstrap.
pub struct Transport {
  /// Used by the Fault Handler to request pages from the peer and read their
  /// replies.
  pub request_out: TcpStream,
  /// Used by the Page Server to read incoming requests and send replies.
  pub request_in: TcpStream,
}

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_DEADLINE: Duration = Duration::from_secs(10);

/// Connects to `addr`, retrying with a fixed backoff until `deadline` elapses.
///
/// This replaces the source's fixed pre-connect sleep (a known race against
/// the peer's listener coming up) with the retry-until-connected strategy
/// §9 recommends.
fn connect_with_retry(addr: std::net::SocketAddr, deadline: Duration) -> Result<TcpStream, Error> {
  let start = Instant::now();

  loop {
    match TcpStream::connect(addr) {
      Ok(stream) => return Ok(stream),
      Err(err) => {
        if start.elapsed() >= deadline {
          log::error!("failed to connect to peer {}: {}", addr, err);
          return Err(Error::ConnectTimeout(addr));
        }
        log::debug!("connect to {} failed ({}), retrying", addr, err);
        thread::sleep(CONNECT_RETRY_INTERVAL);
      }
    }
  }
}

impl Transport {
  /// Performs the asymmetric bootstrap described in §4.5.
  ///
  /// The primary binds and accepts first (becoming `request_in`), then
  /// connects to the secondary (`request_out`). The secondary connects
  /// first, then binds and accepts. This ordering alone is what breaks the
  /// listen/connect tie; afterwards the two streams are used identically by
  /// both peers.
  pub fn bootstrap(config: &Config) -> Result<Self, Error> {
    let local = config.local_addr();
    let remote = config.remote_addr();

    let transport = match config.role {
      Role::Primary => {
        let listener = TcpListener::bind(local).map_err(Error::Bootstrap)?;
        log::info!("primary listening on {}", local);

        let (request_in, peer) = listener.accept().map_err(Error::Bootstrap)?;
        log::info!("accepted connection from secondary at {}", peer);

        let request_out = connect_with_retry(remote, CONNECT_DEADLINE)?;
        log::info!("connected to secondary at {}", remote);

        Transport {
          request_out,
          request_in,
        }
      }
      Role::Secondary => {
        let request_out = connect_with_retry(remote, CONNECT_DEADLINE)?;
        log::info!("connected to primary at {}", remote);

        let listener = TcpListener::bind(local).map_err(Error::Bootstrap)?;
        log::info!("secondary listening on {}", local);

        let (request_in, peer) = listener.accept().map_err(Error::Bootstrap)?;
        log::info!("accepted connection from primary at {}", peer);

        Transport {
          request_out,
          request_in,
        }
      }
    };

    Ok(transport)
  }
}

/// Sends a request for `page` on `stream`.
///
/// The wire encoding is a fixed 8-byte little-endian `u64`, chosen over the
/// source's decimal-ASCII framing per the upgrade path §6/§9 allow (and
/// require).
pub fn send_request(stream: &mut TcpStream, page: usize) -> Result<(), Error> {
  let frame = (page as u64).to_le_bytes();
  stream.write_all(&frame)?;
  Ok(())
}

/// Reads a single request frame from `stream`, blocking until the full frame
/// arrives.
///
/// Returns [Error::PeerDisconnected] if the peer closed the connection
/// cleanly before sending a full frame (§7.5) — callers on the Page Server
/// treat this as their loop-termination signal rather than a hard failure.
pub fn recv_request(stream: &mut TcpStream) -> Result<usize, Error> {
  let mut frame = [0u8; 8];
  read_exact_or_eof(stream, &mut frame)?;
  Ok(u64::from_le_bytes(frame) as usize)
}

/// Sends exactly one page's worth of bytes, looping on short writes.
pub fn send_page(stream: &mut TcpStream, data: &[u8]) -> Result<(), Error> {
  debug_assert_eq!(data.len(), page::size());
  stream.write_all(data)?;
  Ok(())
}

/// Reads exactly one page's worth of bytes into `buf`, looping on short
/// reads.
pub fn recv_page(stream: &mut TcpStream, buf: &mut [u8]) -> Result<(), Error> {
  debug_assert_eq!(buf.len(), page::size());
  stream.read_exact(buf)?;
  Ok(())
}

/// Like [Read::read_exact], but a clean EOF before any byte is read is
/// reported as [Error::PeerDisconnected] instead of the generic
/// `UnexpectedEof` I/O error, so callers can distinguish an orderly shutdown
/// from a torn frame.
fn read_exact_or_eof(stream: &mut TcpStream, buf: &mut [u8]) -> Result<(), Error> {
  let mut filled = 0;

  while filled < buf.len() {
    let n = stream.read(&mut buf[filled..])?;
    if n == 0 {
      return if filled == 0 {
        Err(Error::PeerDisconnected)
      } else {
        Err(Error::Transport(std::io::Error::new(
          std::io::ErrorKind::UnexpectedEof,
          "peer disconnected mid-frame",
        )))
      };
    }
    filled += n;
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::TcpListener;

  fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
  }

  #[test]
  fn request_roundtrips_over_loopback() {
    let (mut client, mut server) = loopback_pair();
    send_request(&mut client, 42).unwrap();
    let page = recv_request(&mut server).unwrap();
    assert_eq!(page, 42);
  }

  #[test]
  fn page_roundtrips_over_loopback() {
    let (mut client, mut server) = loopback_pair();
    let sent = vec![0xABu8; page::size()];
    send_page(&mut client, &sent).unwrap();

    let mut received = vec![0u8; page::size()];
    recv_page(&mut server, &mut received).unwrap();
    assert_eq!(sent, received);
  }

  #[test]
  fn clean_disconnect_reports_peer_disconnected() {
    let (client, mut server) = loopback_pair();
    drop(client);
    assert!(matches!(
      recv_request(&mut server),
      Err(Error::PeerDisconnected)
    ));
  }

  #[test]
  fn connect_with_retry_succeeds_once_listener_appears() {
    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    // Bind to get a free port, then drop the listener so the first connect
    // attempt(s) fail, before spawning the real listener shortly after.
    let probe = TcpListener::bind(addr).unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let handle = thread::spawn(move || {
      thread::sleep(Duration::from_millis(150));
      TcpListener::bind(addr).unwrap()
    });

    let stream = connect_with_retry(addr, Duration::from_secs(5));
    let _listener = handle.join().unwrap();
    assert!(stream.is_ok());
  }

  #[test]
  fn connect_with_retry_times_out() {
    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let probe = TcpListener::bind(addr).unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let result = connect_with_retry(addr, Duration::from_millis(250));
    assert!(matches!(result, Err(Error::ConnectTimeout(_))));
  }
}
