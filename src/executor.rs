/// Interfaces to the instrumented EVM and the bytecode analysis, plus the
/// structured result of one execution.
use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::oracle::OracleAnalysis;
use crate::types::{BranchId, PcSet};

/// Everything observed while executing one input.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TraceResult {
    /// Branches actually taken.
    pub tracebits: HashSet<BranchId>,
    /// Distances for branches approached but not taken.
    pub predicates: HashMap<BranchId, U256>,
    /// Exceptions raised by the contract. Signal, not failure.
    pub unique_exceptions: HashSet<String>,
    /// Function indices on the path that reached each branch.
    pub prefix_map: HashMap<BranchId, Vec<i32>>,
    /// Hit count per branch; populated in vuln mode only.
    pub reached_branch: HashMap<BranchId, u64>,
    /// JSON of the executed testcase, for the reporter.
    pub current_testcase: String,
}

/// The pc regions the executor instruments: the two jumpi sides plus one
/// set per oracle family. Oracle sets stay empty during the coverage phase.
#[derive(Clone, Debug, Default)]
pub struct ValidRegions {
    pub jumpi_side0: PcSet,
    pub jumpi_side1: PcSet,
    pub timestamps: PcSet,
    pub block_numbers: PcSet,
    pub delegate_calls: PcSet,
    pub unchecked_calls: PcSet,
    pub tx_origin: PcSet,
    pub asserts: PcSet,
    pub suicides: PcSet,
}

impl ValidRegions {
    /// Regions for the coverage phase: jumpis only.
    pub fn coverage(jumpis: (PcSet, PcSet)) -> Self {
        Self {
            jumpi_side0: jumpis.0,
            jumpi_side1: jumpis.1,
            ..Default::default()
        }
    }

    /// Regions for the vuln phase: jumpis plus every oracle family.
    pub fn with_oracles<B: BranchProvider>(provider: &B) -> Self {
        let (jumpi_side0, jumpi_side1) = provider.find_valid_jumpis();
        Self {
            jumpi_side0,
            jumpi_side1,
            timestamps: provider.find_valid_timestamps(),
            block_numbers: provider.find_valid_block_nums(),
            delegate_calls: provider.find_valid_delegate_calls(),
            unchecked_calls: provider.find_valid_unchecked_calls(),
            tx_origin: provider.find_valid_tx_origin(),
            asserts: provider.find_valid_assert(),
            suicides: provider.find_valid_suicide(),
        }
    }

    /// Total branch count presented to the campaign.
    pub fn branch_size(&self) -> usize {
        (self.jumpi_side0.len() + self.jumpi_side1.len()) * 2
    }
}

/// In-process EVM adapter. Must be deterministic for a fixed
/// `(data, regions, coverage_mode)` triple.
pub trait TargetExecutor {
    /// Run one input to completion and report the trace. The executor takes
    /// the buffer by value; no aliasing across executions. `is_splice`
    /// marks inputs whose stored form was trimmed to the tail of a longer
    /// concatenated sequence.
    fn exec(
        &mut self,
        data: Bytes,
        is_splice: bool,
        regions: &ValidRegions,
        coverage_mode: bool,
    ) -> TraceResult;

    /// Oracle verdicts accumulated since deployment.
    fn analyze(&mut self) -> OracleAnalysis;
}

/// Static facts about the deployed runtime bytecode.
pub trait BranchProvider {
    /// Pc sets of the two jumpi sides.
    fn find_valid_jumpis(&self) -> (PcSet, PcSet);
    fn find_valid_timestamps(&self) -> PcSet;
    fn find_valid_block_nums(&self) -> PcSet;
    fn find_valid_delegate_calls(&self) -> PcSet;
    fn find_valid_unchecked_calls(&self) -> PcSet;
    fn find_valid_tx_origin(&self) -> PcSet;
    fn find_valid_assert(&self) -> PcSet;
    fn find_valid_suicide(&self) -> PcSet;
    /// Source snippet per jumpi pc, for the reachability report.
    fn snippets(&self) -> &HashMap<u64, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_size_counts_both_sides_twice() {
        let mut side0 = PcSet::new();
        side0.insert(0x42);
        let mut side1 = PcSet::new();
        side1.insert(0x42);
        side1.insert(0x66);
        let regions = ValidRegions::coverage((side0, side1));
        assert_eq!(regions.branch_size(), 6);
    }

    #[test]
    fn test_coverage_regions_have_no_oracles() {
        let regions = ValidRegions::coverage((PcSet::new(), PcSet::new()));
        assert!(regions.timestamps.is_empty());
        assert!(regions.suicides.is_empty());
        assert_eq!(regions.branch_size(), 0);
    }

    #[test]
    fn test_with_oracles_queries_every_family() {
        let provider = crate::test_utils::SingleJumpiProvider::new(0x42);
        let regions = ValidRegions::with_oracles(&provider);
        assert!(regions.jumpi_side0.contains(&0x42));
        assert!(regions.jumpi_side1.is_empty());
        assert_eq!(regions.branch_size(), 2);
        assert!(provider.snippets().contains_key(&0x42));
    }
}
