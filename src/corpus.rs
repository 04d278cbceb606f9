/// Corpus entries: the per-branch leader, the vuln-mode energy record and
/// the accumulated prefix maps.
use std::collections::HashMap;

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::input::FuzzItem;
use crate::types::BranchId;

/// The best input recorded for one branch.
///
/// In coverage mode `comparison_value` 0 means the branch is covered and any
/// positive value is the distance between the operands of the guard
/// comparison. In vuln mode the same slot stores the highest hit count seen.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Leader {
    pub item: FuzzItem,
    pub comparison_value: U256,
}

impl Leader {
    pub fn new(item: FuzzItem, comparison_value: U256) -> Self {
        Self {
            item,
            comparison_value,
        }
    }

    pub fn is_covered(&self) -> bool {
        self.comparison_value.is_zero()
    }
}

/// Remaining fuzzing budget of one branch in vuln mode.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EnergyRecord {
    pub branch_id: BranchId,
    pub weight: i32,
}

/// Prefix maps observed for one contract, accumulated per execution.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PrefixRecord {
    pub name: String,
    pub prefix_map: HashMap<BranchId, Vec<i32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leader_coverage_flag() {
        let covered = Leader::new(FuzzItem::default(), U256::zero());
        assert!(covered.is_covered());
        let open = Leader::new(FuzzItem::default(), U256::from(7));
        assert!(!open.is_covered());
    }
}
