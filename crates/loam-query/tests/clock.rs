// Runs in its own test binary: freezing the clock is process-wide.

use loam_query::clock;

#[test]
fn frozen_clock_ticks_only_the_ordinal() {
    clock::reset();
    clock::freeze(1_000);
    let first = clock::now();
    let second = clock::now();
    assert_eq!((first.time, first.increment), (1_000, 1));
    assert_eq!((second.time, second.increment), (1_000, 2));

    clock::reset();
    let live = clock::now();
    assert!(live.time > 1_000);
    assert_eq!(live.increment, 1);
}
