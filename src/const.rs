/// Tuning constants for the fuzzing core.

// src/feedback.rs
/// A seed mutated more than this many times may be displaced by an
/// equal-scoring newcomer in vuln mode.
pub const STALE_SEED_THRESHOLD: u64 = 16;
/// Energy given to the synthetic branch when a contract exposes no runtime
/// branch.
pub const SYNTHETIC_BRANCH_WEIGHT: i32 = 128;

// src/fuzzer.rs
/// Campaigns slower than this many executions per second are aborted.
pub const MIN_EXEC_SPEED: u64 = 10;

// src/telemetry.rs
/// Coverage sentinel persisted for a contract that discovered no branch.
pub const NO_BRANCH_COVERAGE: i32 = 10000;
/// Scale for persisted coverage values (hundredths of a percent).
pub const COVERAGE_SCALE: f64 = 10000.0;

// src/state.rs
/// Number of per-stage find counters kept in `FuzzStat`.
pub const STAGE_COUNT: usize = 32;
/// Maximum size the havoc stage may grow an input to.
pub const MAX_INPUT_SIZE: usize = 4096;

// src/mutator.rs
/// Upper bound for deterministic arithmetic mutations.
pub const ARITH_MAX: u64 = 35;
/// Candidates emitted per havoc stage.
pub const HAVOC_ROUNDS: usize = 256;

/// Interesting 8-bit values for the deterministic interest stages.
pub const INTERESTING_8: [i8; 9] = [-128, -1, 0, 1, 16, 32, 64, 100, 127];
/// Interesting 16-bit values.
pub const INTERESTING_16: [i16; 19] = [
    -128, -1, 0, 1, 16, 32, 64, 100, 127, -32768, -129, 128, 255, 256, 512, 1000, 1024, 4096,
    32767,
];
/// Interesting 32-bit values.
pub const INTERESTING_32: [i32; 27] = [
    -128, -1, 0, 1, 16, 32, 64, 100, 127, -32768, -129, 128, 255, 256, 512, 1000, 1024, 4096,
    32767, -2147483648, -100663046, -32769, 32768, 65535, 65536, 100663045, 2147483647,
];
