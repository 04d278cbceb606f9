/// The global session state owned by one fuzz run.
///
/// Everything the interest filter, the schedulers and the reporter touch
/// lives here; the reporter gets an immutable view, the filter and the
/// schedulers a mutable one, never both at once.
use std::collections::{HashMap, HashSet};

use libafl::prelude::{current_nanos, Rand, StdRand};
use libafl::state::{HasMaxSize, HasRand};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::corpus::{EnergyRecord, Leader, PrefixRecord};
use crate::r#const::{MAX_INPUT_SIZE, STAGE_COUNT};
use crate::oracle::TOTAL;
use crate::types::BranchId;

/// Campaign totals and the scheduler cursor.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct FuzzStat {
    pub total_execs: u64,
    pub queue_cycle: u64,
    /// Elapsed seconds at the time the last new path was found.
    pub last_new_path: f64,
    pub max_depth: u64,
    /// Scheduler cursor into the branch queue.
    pub idx: usize,
    /// Leaders found per mutation stage.
    pub stage_finds: [u64; STAGE_COUNT],
}

/// The session value holding corpus, coverage and vulnerability state.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FuzzState {
    /// Best input per branch ever discovered. Entries are replaced, never
    /// merged.
    pub leaders: HashMap<BranchId, Leader>,
    /// Branches in discovery order; the pre-fuzz scheduler rotates through
    /// this.
    pub queues: Vec<BranchId>,
    /// Every branch ever covered. Grows monotonically.
    pub tracebits: HashSet<BranchId>,
    /// Open branches with a known distance. Entries leave when the branch
    /// enters `tracebits`.
    pub predicates: HashSet<BranchId>,
    pub unique_exceptions: HashSet<String>,
    /// Per-branch budget in vuln mode. Non-empty iff vuln mode loaded at
    /// least one weighted branch.
    pub energies: Vec<EnergyRecord>,
    /// Cumulative hit counts per branch in vuln mode.
    pub branch_hits: HashMap<BranchId, u64>,
    pub prefix_records: Vec<PrefixRecord>,
    /// Violation counts per oracle kind.
    pub vulnerabilities: Vec<u16>,
    /// Raising-instruction pcs per oracle kind.
    pub vuln_branches: Vec<HashSet<u16>>,
    /// Testcases that first raised each oracle.
    pub vuln_cases: Vec<HashSet<String>>,
    /// Oracle counts as of the previous execution.
    pub last_vulnerabilities: Vec<u16>,
    pub fuzz_stat: FuzzStat,
    /// Length of the first executed testcase; saved inputs longer than this
    /// are trimmed to their tail (splice / prolongation results).
    pub data0_len: usize,
    /// File stem of the contract under test, used as the key of persisted
    /// records.
    pub contract_stem: String,
    pub rand_generator: StdRand,
    pub max_size: usize,
}

impl FuzzState {
    pub fn new(seed: u64) -> Self {
        let seed = if seed == 0 { current_nanos() } else { seed };
        Self {
            leaders: HashMap::new(),
            queues: Vec::new(),
            tracebits: HashSet::new(),
            predicates: HashSet::new(),
            unique_exceptions: HashSet::new(),
            energies: Vec::new(),
            branch_hits: HashMap::new(),
            prefix_records: Vec::new(),
            vulnerabilities: vec![0; TOTAL],
            vuln_branches: vec![HashSet::new(); TOTAL],
            vuln_cases: vec![HashSet::new(); TOTAL],
            last_vulnerabilities: vec![0; TOTAL],
            fuzz_stat: FuzzStat::default(),
            data0_len: 0,
            contract_stem: String::new(),
            rand_generator: StdRand::with_seed(seed),
            max_size: MAX_INPUT_SIZE,
        }
    }

    /// Number of leaders whose branch is still uncovered.
    pub fn uncovered_branches(&self) -> usize {
        self.leaders
            .values()
            .filter(|l| !l.comparison_value.is_zero())
            .count()
    }

    /// Sum of the remaining energy weights.
    pub fn remaining_energy(&self) -> i64 {
        self.energies.iter().map(|e| e.weight as i64).sum()
    }

    pub fn update_tracebits(&mut self, bits: &HashSet<BranchId>) {
        for bit in bits {
            self.tracebits.insert(bit.clone());
        }
    }

    /// Record freshly seen predicates, then drop every predicate whose
    /// branch has been covered in the meantime.
    pub fn update_predicates(&mut self, preds: &HashMap<BranchId, U256>) {
        for branch in preds.keys() {
            self.predicates.insert(branch.clone());
        }
        let tracebits = &self.tracebits;
        self.predicates.retain(|branch| !tracebits.contains(branch));
    }

    pub fn update_exceptions(&mut self, exceptions: &HashSet<String>) {
        for exception in exceptions {
            self.unique_exceptions.insert(exception.clone());
        }
    }

    pub fn record_prefixes(&mut self, prefix_map: &HashMap<BranchId, Vec<i32>>) {
        self.prefix_records.push(PrefixRecord {
            name: self.contract_stem.clone(),
            prefix_map: prefix_map.clone(),
        });
    }
}

impl Default for FuzzState {
    fn default() -> Self {
        Self::new(0)
    }
}

impl HasRand for FuzzState {
    type Rand = StdRand;

    fn rand(&self) -> &Self::Rand {
        &self.rand_generator
    }

    fn rand_mut(&mut self) -> &mut Self::Rand {
        &mut self.rand_generator
    }
}

impl HasMaxSize for FuzzState {
    fn max_size(&self) -> usize {
        self.max_size
    }

    fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::FuzzItem;

    #[test]
    fn test_update_predicates_removes_covered() {
        let mut state = FuzzState::new(1);
        let mut bits = HashSet::new();
        bits.insert("66:0".to_string());
        state.update_tracebits(&bits);

        let mut preds = HashMap::new();
        preds.insert("66:0".to_string(), U256::from(3));
        preds.insert("66:1".to_string(), U256::from(7));
        state.update_predicates(&preds);

        assert!(!state.predicates.contains("66:0"));
        assert!(state.predicates.contains("66:1"));
    }

    #[test]
    fn test_uncovered_branches_counts_positive_distances() {
        let mut state = FuzzState::new(1);
        state.leaders.insert(
            "66:0".into(),
            Leader::new(FuzzItem::default(), U256::zero()),
        );
        state.leaders.insert(
            "66:1".into(),
            Leader::new(FuzzItem::default(), U256::from(5)),
        );
        assert_eq!(state.uncovered_branches(), 1);
    }

    #[test]
    fn test_remaining_energy_sums_weights() {
        let mut state = FuzzState::new(1);
        state.energies.push(EnergyRecord {
            branch_id: "66:0".into(),
            weight: 10,
        });
        state.energies.push(EnergyRecord {
            branch_id: "66:1".into(),
            weight: 3,
        });
        assert_eq!(state.remaining_energy(), 13);
    }
}
