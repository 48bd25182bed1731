//! Page access mode and its translation to host protection flags.

#![allow(non_upper_case_globals)]

bitflags! {
  /// The access mode a page is currently installed with.
  ///
  /// Unlike a general-purpose protection bitflag, the coherence protocol only
  /// ever installs three states on a page: [AccessMode::NONE], [AccessMode::READ]
  /// and [AccessMode::WRITE] (there is no independent executable bit, since the
  /// shared region never holds code).
  ///
  /// # Examples
  ///
  /// ```
  /// use dsm::AccessMode;
  ///
  /// let combine = AccessMode::READ | AccessMode::WRITE;
  /// let shorthand = AccessMode::READ_WRITE;
  /// assert_eq!(combine, shorthand);
  /// ```
  #[derive(Default)]
  pub struct AccessMode: u8 {
    /// Neither readable nor writable; any access traps.
    const NONE = 0;
    /// Readable; a write traps.
    const READ = 1 << 0;
    /// Writable; implies readable on every host this crate targets.
    const WRITE = 1 << 1;
    /// Read and write shorthand, used only for the initial mapping.
    const READ_WRITE = (Self::READ.bits | Self::WRITE.bits);
  }
}

impl std::fmt::Display for AccessMode {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    const MAPPINGS: &[(AccessMode, char)] = &[(AccessMode::READ, 'r'), (AccessMode::WRITE, 'w')];

    for (flag, symbol) in MAPPINGS {
      if self.contains(*flag) {
        write!(f, "{}", symbol)?;
      } else {
        write!(f, "-")?;
      }
    }

    Ok(())
  }
}

impl From<AccessMode> for libc::c_int {
  /// Converts an [AccessMode] to the host's `PROT_*` constants for `mprotect`.
  fn from(mode: AccessMode) -> Self {
    let mut prot = libc::PROT_NONE;

    if mode.contains(AccessMode::READ) {
      prot |= libc::PROT_READ;
    }

    if mode.contains(AccessMode::WRITE) {
      prot |= libc::PROT_WRITE;
    }

    prot
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn access_mode_implements_display() {
    assert_eq!(AccessMode::NONE.to_string(), "--");
    assert_eq!(AccessMode::READ.to_string(), "r-");
    assert_eq!(AccessMode::WRITE.to_string(), "-w");
    assert_eq!(AccessMode::READ_WRITE.to_string(), "rw");
  }

  #[test]
  fn access_mode_converts_to_prot_flags() {
    assert_eq!(libc::c_int::from(AccessMode::NONE), libc::PROT_NONE);
    assert_eq!(libc::c_int::from(AccessMode::READ), libc::PROT_READ);
    assert_eq!(libc::c_int::from(AccessMode::WRITE), libc::PROT_WRITE);
    assert_eq!(
      libc::c_int::from(AccessMode::READ_WRITE),
      libc::PROT_READ | libc::PROT_WRITE
    );
  }
}
