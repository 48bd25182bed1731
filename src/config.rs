//! The typed configuration surface [`crate::initialize`] accepts.
//!
//! Building a [Config] from command-line arguments, environment variables or
//! a config file is the excluded "command-line parsing and IP/port
//! configuration" collaborator named in the system scope; only the typed
//! struct that collaborator would construct lives in this crate.

use std::net::SocketAddr;

/// The default fixed virtual base address shared by both peers, `2^30`.
pub const DEFAULT_BASE_ADDRESS: usize = 1 << 30;

/// Which of the two peers this process is.
///
/// The label only breaks symmetry during bootstrap (§4.5) and initial
/// ownership assignment (§3); once both peers are connected, the protocol
/// treats them identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  /// Binds and accepts first, then connects to the secondary.
  Primary,
  /// Connects to the primary first, then binds and accepts.
  Secondary,
}

impl Role {
  /// Returns whether this role owns the first half of the region in
  /// [`crate::AccessMode::WRITE`] at startup (the secondary does, per §3).
  pub fn owns_first_half(self) -> bool {
    self == Role::Secondary
  }
}

/// The configuration accepted by [`crate::initialize`].
#[derive(Debug, Clone)]
pub struct Config {
  /// Which peer this process is.
  pub role: Role,
  /// The number of pages in the shared region.
  pub num_pages: usize,
  /// The primary's address, used for bootstrap by both roles.
  pub primary_addr: SocketAddr,
  /// The secondary's address, used for bootstrap by both roles.
  pub secondary_addr: SocketAddr,
  /// The fixed virtual base address of the shared region. Both peers MUST
  /// be constructed with the same value; defaults to [DEFAULT_BASE_ADDRESS].
  pub base_address: usize,
}

impl Config {
  /// Creates a configuration with the default base address.
  pub fn new(
    role: Role,
    num_pages: usize,
    primary_addr: SocketAddr,
    secondary_addr: SocketAddr,
  ) -> Self {
    Config {
      role,
      num_pages,
      primary_addr,
      secondary_addr,
      base_address: DEFAULT_BASE_ADDRESS,
    }
  }

  /// Returns this process' local bootstrap address.
  pub fn local_addr(&self) -> SocketAddr {
    match self.role {
      Role::Primary => self.primary_addr,
      Role::Secondary => self.secondary_addr,
    }
  }

  /// Returns the peer's bootstrap address.
  pub fn remote_addr(&self) -> SocketAddr {
    match self.role {
      Role::Primary => self.secondary_addr,
      Role::Secondary => self.primary_addr,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn secondary_owns_first_half() {
    assert!(Role::Secondary.owns_first_half());
    assert!(!Role::Primary.owns_first_half());
  }

  #[test]
  fn local_and_remote_addr_are_role_relative() {
    let primary: SocketAddr = "127.0.0.1:9000".parse().unwrap();
    let secondary: SocketAddr = "127.0.0.1:9001".parse().unwrap();

    let cfg = Config::new(Role::Primary, 4, primary, secondary);
    assert_eq!(cfg.local_addr(), primary);
    assert_eq!(cfg.remote_addr(), secondary);

    let cfg = Config::new(Role::Secondary, 4, primary, secondary);
    assert_eq!(cfg.local_addr(), secondary);
    assert_eq!(cfg.remote_addr(), primary);
  }
}
