//! Heap corruption detection tests for fencemalloc.
//!
//! Every scenario that should abort runs in a subprocess: the test binary
//! re-executes itself with `FENCEMALLOC_SCENARIO` set, and the parent checks
//! that the child died and printed the expected diagnostic on stderr.
//! Scenarios that run the process-wide allocator to completion are checked
//! the same way for a clean exit.

use fencemalloc::{RealAllocator, TrackingContext};

const SCENARIO_VAR: &str = "FENCEMALLOC_SCENARIO";

fn context() -> TrackingContext<RealAllocator> {
    let real = RealAllocator::new();
    real.resolve().expect("real allocator must resolve");
    TrackingContext::new(real)
}

/// Run the `scenario_driver` test of this binary in a child process with
/// `scenario` selected and assert it aborted with `expected` on stderr.
fn expect_abort(scenario: &str, expected: &[&str]) {
    let exe = std::env::current_exe().expect("cannot determine test binary path");
    let output = std::process::Command::new(&exe)
        .env(SCENARIO_VAR, scenario)
        .arg("--exact")
        .arg("scenario_driver")
        .arg("--nocapture")
        .env("RUST_TEST_THREADS", "1")
        .output()
        .expect("failed to spawn subprocess");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        !output.status.success(),
        "scenario '{scenario}' should have aborted but exited successfully. stderr:\n{stderr}"
    );
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(
            output.status.signal(),
            Some(libc::SIGABRT),
            "scenario '{scenario}' was not aborted. stderr:\n{stderr}"
        );
    }
    for needle in expected {
        assert!(
            stderr.contains(needle),
            "scenario '{scenario}' stderr does not contain '{needle}'. Full stderr:\n{stderr}"
        );
    }
}

/// Run `scenario` in a child process and assert it exited successfully,
/// printed the exit listing and reported no corruption.
fn expect_clean_exit(scenario: &str) {
    let exe = std::env::current_exe().expect("cannot determine test binary path");
    let output = std::process::Command::new(&exe)
        .env(SCENARIO_VAR, scenario)
        .env_remove("FENCEMALLOC_DISABLE")
        .env_remove("FENCEMALLOC_EXIT_REPORT")
        .arg("--exact")
        .arg("scenario_driver")
        .arg("--nocapture")
        .env("RUST_TEST_THREADS", "1")
        .output()
        .expect("failed to spawn subprocess");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        output.status.success(),
        "scenario '{scenario}' should have exited cleanly: {:?}. stderr:\n{stderr}",
        output.status
    );
    assert!(
        !stderr.contains("fencemalloc:"),
        "scenario '{scenario}' reported a fault. stderr:\n{stderr}"
    );
    assert!(
        stderr.contains("remain allocated")
            || stderr.contains("remains allocated")
            || stderr.contains("No memory allocations currently"),
        "scenario '{scenario}' printed no exit listing. stderr:\n{stderr}"
    );
}

#[repr(C, align(64))]
struct CacheLine([u8; 64]);

/// Aligned allocations from C and from std, all released through the
/// interposed `free`, then the exit report.
#[cfg(feature = "export")]
unsafe fn aligned_lifecycle() {
    use std::sync::mpsc;

    fencemalloc::init();

    let mut p = std::ptr::null_mut();
    assert_eq!(libc::posix_memalign(&mut p, 64, 100), 0);
    assert_eq!(p as usize % 64, 0);
    libc::free(p);

    let mut page = std::ptr::null_mut();
    assert_eq!(libc::posix_memalign(&mut page, 4096, 4096), 0);
    assert_eq!(page as usize % 4096, 0);
    let page = libc::realloc(page, 8192);
    assert!(!page.is_null());
    libc::free(page);

    let lines: Vec<CacheLine> = (0..32).map(|i| CacheLine([i as u8; 64])).collect();
    assert_eq!(lines.as_ptr() as usize % 64, 0);
    assert!(lines.iter().enumerate().all(|(i, l)| l.0[63] == i as u8));
    drop(lines);

    let (tx, rx) = mpsc::channel();
    let sender = std::thread::spawn(move || {
        for i in 0..100u32 {
            tx.send(i).unwrap();
        }
    });
    assert_eq!(rx.iter().sum::<u32>(), 4950);
    sender.join().unwrap();
    drop(rx);

    fencemalloc::check_integrity();
    fencemalloc::shutdown();
}

// ---------------------------------------------------------------------------
// Scenario driver
// ---------------------------------------------------------------------------

#[test]
fn scenario_driver() {
    let scenario = match std::env::var(SCENARIO_VAR) {
        Ok(s) => s,
        Err(_) => return,
    };
    let ctx = context();
    unsafe {
        match scenario.as_str() {
            "overrun_into_slack" => {
                let p = ctx.allocate(13);
                p.add(13).write(0);
                ctx.deallocate(p);
            }
            "overrun_into_trailer" => {
                let p = ctx.allocate(16);
                p.add(16).write(b'!');
                ctx.deallocate(p);
            }
            "zero_size_neighbour" => {
                let p = ctx.allocate(0);
                p.write(1);
                ctx.deallocate(p);
            }
            "first_header_guard" => {
                let p = ctx.allocate(64);
                p.sub(16).write(0);
                ctx.deallocate(p);
            }
            "second_header_guard" => {
                let p = ctx.allocate(64);
                p.sub(1).write(0);
                ctx.deallocate(p);
            }
            "overrun_then_realloc" => {
                let p = ctx.allocate(8);
                p.add(8).write(0);
                ctx.reallocate(p, 128);
            }
            "overrun_then_check" => {
                let _fine = ctx.allocate(100);
                let p = ctx.allocate(5);
                p.add(5).write(0);
                ctx.check_integrity();
            }
            "overrun_then_usage" => {
                let p = ctx.allocate(31);
                p.add(31).write(0);
                ctx.usage();
            }
            "overrun_then_listing" => {
                let p = ctx.allocate(31);
                p.add(32).write(0);
                let mut sink = String::new();
                let _ = ctx.show_allocations(&mut sink);
            }
            "trailer_distance" => {
                let p = ctx.allocate(13);
                p.add(18).write(b'A');
                ctx.deallocate(p);
            }
            "aligned_block_overrun" => {
                let p = ctx.aligned_allocate(256, 10);
                p.add(10).write(0);
                ctx.deallocate(p);
            }
            "bootstrap_exhausted" => {
                let arena = fencemalloc::allocator::bootstrap::ARENA_BYTES;
                fencemalloc::allocator::bootstrap::allocate(arena + 1);
            }
            #[cfg(feature = "export")]
            "aligned_lifecycle" => {
                aligned_lifecycle();
                return;
            }
            "detached_block_overrun" => {
                let p = ctx.allocate(20);
                ctx.ignore_current_allocations();
                p.add(20).write(0);
                ctx.deallocate(p);
            }
            other => panic!("unknown scenario: {other}"),
        }
    }
    unreachable!("scenario '{scenario}' was not detected");
}

// ---------------------------------------------------------------------------
// Overruns
// ---------------------------------------------------------------------------

#[test]
fn one_byte_overrun_into_slack_is_detected() {
    expect_abort(
        "overrun_into_slack",
        &["fencemalloc: heap corruption", "slack byte 0 past the end of the region", "size 13"],
    );
}

#[test]
fn one_byte_overrun_into_trailer_is_detected() {
    expect_abort(
        "overrun_into_trailer",
        &["heap corruption", "trailer guard word 0 after the region, byte 0 past the end"],
    );
}

#[test]
fn trailer_overrun_names_the_byte() {
    expect_abort(
        "trailer_distance",
        &["trailer guard word 0 after the region, byte 5 past the end", "size 13"],
    );
}

#[test]
fn aligned_block_overrun_is_detected() {
    expect_abort("aligned_block_overrun", &["heap corruption", "slack byte 0", "size 10"]);
}

#[test]
fn write_into_zero_size_block_is_detected() {
    expect_abort("zero_size_neighbour", &["heap corruption", "trailer guard word 0"]);
}

// ---------------------------------------------------------------------------
// Underruns
// ---------------------------------------------------------------------------

#[test]
fn first_header_guard_corruption_is_detected() {
    expect_abort(
        "first_header_guard",
        &["heap corruption", "header guard word 0 before the region", "0xdeadbeefcafef00d"],
    );
}

#[test]
fn second_header_guard_corruption_is_detected() {
    expect_abort("second_header_guard", &["header guard word 1 before the region"]);
}

// ---------------------------------------------------------------------------
// Every checking operation checks
// ---------------------------------------------------------------------------

#[test]
fn realloc_verifies_the_old_block() {
    expect_abort("overrun_then_realloc", &["trailer guard word 0"]);
}

#[test]
fn integrity_sweep_finds_the_bad_block() {
    expect_abort("overrun_then_check", &["slack byte 0", "size 5"]);
}

#[test]
fn usage_query_verifies_blocks() {
    expect_abort("overrun_then_usage", &["slack byte 0"]);
}

#[test]
fn listing_verifies_blocks() {
    expect_abort("overrun_then_listing", &["trailer guard word 0"]);
}

#[test]
fn detached_blocks_are_still_verified() {
    expect_abort("detached_block_overrun", &["heap corruption", "size 20"]);
}

// ---------------------------------------------------------------------------
// Fatal paths outside the checker, and a clean run
// ---------------------------------------------------------------------------

#[test]
fn bootstrap_exhaustion_is_fatal() {
    expect_abort(
        "bootstrap_exhausted",
        &["fencemalloc: bootstrap arena exhausted", "bytes requested"],
    );
}

#[cfg(feature = "export")]
#[test]
fn aligned_memory_frees_cleanly_through_the_interposer() {
    expect_clean_exit("aligned_lifecycle");
}
