/// Shared aliases for branch identification.
use std::collections::HashSet;

/// One side of a conditional jump, written `"<pc>:<side>"`.
pub type BranchId = String;

/// Program counters singled out by the bytecode analysis.
pub type PcSet = HashSet<u64>;

/// Branch id standing in for a contract with no runtime jumpi.
pub const SYNTHETIC_BRANCH: &str = ":";

/// Build the identifier of one side of a conditional jump.
pub fn branch_id(pc: u64, side: u8) -> BranchId {
    format!("{}:{}", pc, side)
}

/// Program counter component of a branch id, if well formed.
pub fn branch_pc(id: &str) -> Option<u64> {
    id.split(':').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_id_round_trip() {
        assert_eq!(branch_id(0x42, 0), "66:0");
        assert_eq!(branch_pc("66:0"), Some(66));
        assert_eq!(branch_pc("66:1"), Some(66));
    }

    #[test]
    fn test_synthetic_branch_has_no_pc() {
        assert_eq!(branch_pc(SYNTHETIC_BRANCH), None);
    }
}
