/// Shared doubles and checks for the unit tests.
use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;
use primitive_types::U256;

use crate::abi::AbiCodec;
use crate::executor::{BranchProvider, TargetExecutor, TraceResult, ValidRegions};
use crate::oracle::OracleAnalysis;
use crate::state::FuzzState;
use crate::types::PcSet;

/// Executor that replays a scripted queue of trace results. Once the queue
/// is drained it keeps returning empty traces.
#[derive(Default)]
pub struct ScriptedExecutor {
    pub results: VecDeque<TraceResult>,
    pub analyses: VecDeque<OracleAnalysis>,
    pub execs: usize,
}

impl ScriptedExecutor {
    pub fn new(results: Vec<TraceResult>) -> Self {
        Self {
            results: results.into(),
            analyses: VecDeque::new(),
            execs: 0,
        }
    }
}

impl TargetExecutor for ScriptedExecutor {
    fn exec(
        &mut self,
        _data: Bytes,
        _is_splice: bool,
        _regions: &ValidRegions,
        _coverage_mode: bool,
    ) -> TraceResult {
        self.execs += 1;
        self.results.pop_front().unwrap_or_default()
    }

    fn analyze(&mut self) -> OracleAnalysis {
        self.analyses.pop_front().unwrap_or_default()
    }
}

/// Codec that passes testcases through unchanged.
pub struct IdentityAbi;

impl AbiCodec for IdentityAbi {
    fn random_testcase(&mut self) -> Vec<u8> {
        vec![0u8; 4]
    }

    fn postprocess_testdata(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }
}

/// Codec that pads testcases to a 32-byte multiple, exercising the
/// idempotence requirement of post-processing.
pub struct PaddingAbi;

impl AbiCodec for PaddingAbi {
    fn random_testcase(&mut self) -> Vec<u8> {
        vec![0u8; 32]
    }

    fn postprocess_testdata(&self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        let rem = out.len() % 32;
        if rem != 0 {
            out.resize(out.len() + 32 - rem, 0);
        }
        out
    }
}

/// Branch provider with one jumpi and no oracle regions.
pub struct SingleJumpiProvider {
    pub snippets: HashMap<u64, String>,
}

impl SingleJumpiProvider {
    pub fn new(pc: u64) -> Self {
        let mut snippets = HashMap::new();
        snippets.insert(pc, format!("if (guess == answer) // pc {}", pc));
        Self { snippets }
    }
}

impl BranchProvider for SingleJumpiProvider {
    fn find_valid_jumpis(&self) -> (PcSet, PcSet) {
        let pcs: PcSet = self.snippets.keys().copied().collect();
        (pcs.clone(), PcSet::new())
    }

    fn find_valid_timestamps(&self) -> PcSet {
        PcSet::new()
    }

    fn find_valid_block_nums(&self) -> PcSet {
        PcSet::new()
    }

    fn find_valid_delegate_calls(&self) -> PcSet {
        PcSet::new()
    }

    fn find_valid_unchecked_calls(&self) -> PcSet {
        PcSet::new()
    }

    fn find_valid_tx_origin(&self) -> PcSet {
        PcSet::new()
    }

    fn find_valid_assert(&self) -> PcSet {
        PcSet::new()
    }

    fn find_valid_suicide(&self) -> PcSet {
        PcSet::new()
    }

    fn snippets(&self) -> &HashMap<u64, String> {
        &self.snippets
    }
}

/// Build a trace covering `covered` and reporting `open` with distances.
pub fn trace(covered: &[&str], open: &[(&str, u64)]) -> TraceResult {
    let mut result = TraceResult::default();
    for branch in covered {
        result.tracebits.insert((*branch).to_string());
    }
    for (branch, distance) in open {
        result
            .predicates
            .insert((*branch).to_string(), U256::from(*distance));
    }
    result
}

/// Build a vuln-mode trace with per-branch hit counts.
pub fn reached(hits: &[(&str, u64)]) -> TraceResult {
    let mut result = TraceResult::default();
    for (branch, count) in hits {
        result.reached_branch.insert((*branch).to_string(), *count);
    }
    result
}

/// Asserts the cross-structure invariants that must hold after every
/// interest-filter call.
pub fn assert_invariants(state: &FuzzState) {
    assert!(
        state.tracebits.is_disjoint(&state.predicates),
        "tracebits and predicates overlap"
    );
    let queue_set: HashSet<&String> = state.queues.iter().collect();
    assert_eq!(
        queue_set.len(),
        state.queues.len(),
        "queue holds duplicates"
    );
    for branch in state.leaders.keys() {
        assert!(
            queue_set.contains(branch),
            "leader {} missing from queue",
            branch
        );
    }
    for branch in &state.queues {
        assert!(
            state.leaders.contains_key(branch),
            "queued branch {} has no leader",
            branch
        );
    }
    for (branch, leader) in &state.leaders {
        if leader.comparison_value.is_zero() {
            assert!(
                state.tracebits.contains(branch),
                "covered leader {} missing from tracebits",
                branch
            );
        }
    }
}
