//! Tests for time sources

use ephemeral_kv::util::clock::{now_ms, ManualClock, SystemClock, TimeSource};
use std::sync::Arc;

#[test]
fn test_manual_clock_shared_as_time_source() {
    let clock = Arc::new(ManualClock::new(100));
    let source: Arc<dyn TimeSource> = Arc::clone(&clock) as Arc<dyn TimeSource>;
    assert_eq!(source.now(), 100);

    clock.advance(5);
    assert_eq!(source.now(), 105);
    clock.set(7);
    assert_eq!(source.now(), 7);
}

#[test]
fn test_system_clock_is_relative() {
    let clock = SystemClock::default();
    assert!(clock.now() <= 1);
}

#[test]
fn test_now_ms_is_wall_clock() {
    // Well after 2020-01-01.
    assert!(now_ms() > 1_577_836_800_000);
}
