//! Two-node integration harness (§10.4): wires two real `Dsm` instances
//! together over loopback TCP, each backed by its own real `mmap`-ed region
//! (necessarily at *different* addresses within this single test process --
//! the fixed-shared-base invariant is a cross-process guarantee this harness
//! cannot reproduce in-process; see `DESIGN.md`). Exercises the P1-P6
//! properties and the numbered scenarios of §8.

use dsm::{AccessMode, Config, Dsm, Role};
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::{Duration, Instant};

fn init_logging() {
  let _ = env_logger::builder().is_test(true).try_init();
}

fn free_port() -> u16 {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let port = listener.local_addr().unwrap().port();
  drop(listener);
  port
}

/// Brings up a primary/secondary pair over loopback sockets, each region
/// reserved at `base` (unique per test, see the call sites below, so that
/// parallel `#[test]` functions in this binary never collide in address
/// space).
fn spawn_pair(num_pages: usize, base: usize) -> (Dsm, Dsm) {
  init_logging();

  let primary_addr: SocketAddr = format!("127.0.0.1:{}", free_port()).parse().unwrap();
  let secondary_addr: SocketAddr = format!("127.0.0.1:{}", free_port()).parse().unwrap();

  let mut primary_config = Config::new(Role::Primary, num_pages, primary_addr, secondary_addr);
  primary_config.base_address = base;
  let mut secondary_config = Config::new(Role::Secondary, num_pages, primary_addr, secondary_addr);
  secondary_config.base_address = base;

  let primary_thread = thread::spawn(move || Dsm::initialize(primary_config));
  let secondary_thread = thread::spawn(move || Dsm::initialize(secondary_config));

  let primary = primary_thread.join().unwrap().expect("primary initializes");
  let secondary = secondary_thread.join().unwrap().expect("secondary initializes");

  (primary, secondary)
}

/// Spaces each test's region far enough apart that even generous page counts
/// never overlap, since all tests in this binary share one address space.
fn region_base(slot: usize) -> usize {
  dsm::base_address() + slot * 0x0100_0000
}

unsafe fn write_byte(dsm: &Dsm, offset: usize, value: u8) {
  (dsm.base_address() as *mut u8).add(offset).write_volatile(value);
}

unsafe fn read_byte(dsm: &Dsm, offset: usize) -> u8 {
  (dsm.base_address() as *const u8).add(offset).read_volatile()
}

// Scenario 1: primary writes to page 0 (owned by the secondary at startup).
#[test]
fn primary_write_pulls_page_from_secondary() {
  let (primary, secondary) = spawn_pair(2, region_base(1));

  assert_eq!(primary.page_mode(0), AccessMode::NONE);
  assert_eq!(secondary.page_mode(0), AccessMode::WRITE);

  unsafe { write_byte(&primary, 0, 0xAA) };

  assert_eq!(primary.page_mode(0), AccessMode::WRITE);
  assert_eq!(secondary.page_mode(0), AccessMode::NONE);
  assert_eq!(unsafe { read_byte(&primary, 0) }, 0xAA);
}

// Scenario 2: ping-pong ownership of the same page between the two peers.
#[test]
fn ping_pong_ownership_migrates_back_and_forth() {
  let (primary, secondary) = spawn_pair(2, region_base(2));

  unsafe { write_byte(&primary, 0, 1) };
  assert_eq!(primary.page_mode(0), AccessMode::WRITE);

  unsafe { write_byte(&secondary, 0, 2) };
  assert_eq!(secondary.page_mode(0), AccessMode::WRITE);
  assert_eq!(primary.page_mode(0), AccessMode::NONE);

  assert_eq!(unsafe { read_byte(&primary, 0) }, 2);
  assert_eq!(primary.page_mode(0), AccessMode::WRITE);
  assert_eq!(secondary.page_mode(0), AccessMode::NONE);
}

// Scenario 3: writes to distinct, already-owned pages never fault.
#[test]
fn independent_pages_need_no_transfer() {
  let page_size = dsm::page::size();
  let (primary, secondary) = spawn_pair(2, region_base(3));

  // Primary owns page 1, secondary owns page 0, from startup (§3).
  assert_eq!(primary.page_mode(1), AccessMode::WRITE);
  assert_eq!(secondary.page_mode(0), AccessMode::WRITE);

  let start = Instant::now();
  unsafe { write_byte(&primary, page_size, 0x11) };
  unsafe { write_byte(&secondary, 0, 0x22) };
  let elapsed = start.elapsed();

  // Each write hits a page its own node already owns: no fault, no network
  // round trip, so this completes in well under the time a socket
  // round-trip would take even on a loaded CI box.
  assert!(elapsed < Duration::from_millis(200));

  assert_eq!(unsafe { read_byte(&primary, page_size) }, 0x11);
  assert_eq!(unsafe { read_byte(&secondary, 0) }, 0x22);
  assert_eq!(primary.page_mode(1), AccessMode::WRITE);
  assert_eq!(secondary.page_mode(0), AccessMode::WRITE);
}

// Scenario 4: repeated local writes after the initial acquisition cost
// nothing further -- a write to an already-WRITE page never re-faults.
#[test]
fn repeated_local_writes_only_transfer_once() {
  let (primary, _secondary) = spawn_pair(2, region_base(4));

  unsafe { write_byte(&primary, 0, 0) }; // the one transfer
  assert_eq!(primary.page_mode(0), AccessMode::WRITE);

  let start = Instant::now();
  for i in 0..1000u32 {
    unsafe { write_byte(&primary, 0, (i % 256) as u8) };
  }
  let elapsed = start.elapsed();

  assert_eq!(unsafe { read_byte(&primary, 0) }, 231); // 999 % 256
  assert_eq!(primary.page_mode(0), AccessMode::WRITE);
  assert!(elapsed < Duration::from_millis(200));
}

// P4: concurrent faults on distinct pages at the same node make independent
// progress -- neither blocks on the other's page lock.
#[test]
fn concurrent_faults_on_distinct_pages_do_not_block_each_other() {
  let page_size = dsm::page::size();
  let (primary, _secondary) = spawn_pair(4, region_base(5));
  let primary = std::sync::Arc::new(primary);

  let a = primary.clone();
  let t0 = thread::spawn(move || unsafe { write_byte(&a, 0, 0xAA) });

  let b = primary.clone();
  let t1 = thread::spawn(move || unsafe { write_byte(&b, page_size, 0xBB) });

  t0.join().unwrap();
  t1.join().unwrap();

  assert_eq!(primary.page_mode(0), AccessMode::WRITE);
  assert_eq!(primary.page_mode(1), AccessMode::WRITE);
  assert_eq!(unsafe { read_byte(&primary, 0) }, 0xAA);
  assert_eq!(unsafe { read_byte(&primary, page_size) }, 0xBB);
}

// Scenario 5: primary and secondary alternate writes to the same page at a
// steady cadence; each write forces the page to migrate, and the final value
// observed is whichever side wrote last.
#[test]
fn alternation_stress_migrates_ownership_every_round() {
  let (primary, secondary) = spawn_pair(2, region_base(7));

  let mut last = 0u8;
  for i in 0..100u32 {
    let value = (i % 256) as u8;
    unsafe { write_byte(&primary, 0, value) };
    assert_eq!(primary.page_mode(0), AccessMode::WRITE);
    assert_eq!(secondary.page_mode(0), AccessMode::NONE);

    let value = value.wrapping_add(1);
    unsafe { write_byte(&secondary, 0, value) };
    assert_eq!(secondary.page_mode(0), AccessMode::WRITE);
    assert_eq!(primary.page_mode(0), AccessMode::NONE);
    last = value;

    thread::sleep(Duration::from_millis(10));
  }

  assert_eq!(unsafe { read_byte(&secondary, 0) }, last);
}

// Odd page counts round the initial split toward the secondary (§3, §9):
// with 5 pages, `half = 2` by integer division, so only 4 of the 5 pages are
// touched by the initial partition at all; the leftover page (4) is never
// `mprotect`-narrowed on either side and keeps the region's initial
// read-write mapping, exactly as the source leaves it.
#[test]
fn odd_page_count_rounds_split_toward_secondary() {
  let (primary, secondary) = spawn_pair(5, region_base(6));

  assert_eq!(secondary.page_mode(0), AccessMode::WRITE);
  assert_eq!(secondary.page_mode(1), AccessMode::WRITE);
  assert_eq!(primary.page_mode(2), AccessMode::WRITE);
  assert_eq!(primary.page_mode(3), AccessMode::WRITE);
  assert_eq!(primary.page_mode(4), AccessMode::READ_WRITE);
  assert_eq!(secondary.page_mode(4), AccessMode::READ_WRITE);
}
