//! Host-specific primitives.
//!
//! The coherence engine is POSIX-only: its fault interceptor depends on a raw
//! `siginfo_t`-carrying `sigaction` trampoline, which only `unix` hosts expose
//! in the form the source relies on (see `DESIGN.md`).

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use self::unix::*;
