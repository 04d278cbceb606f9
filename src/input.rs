/// The input type flowing between mutator, executor and corpus.
use libafl::inputs::{HasBytesVec, Input};
use serde::{Deserialize, Serialize};

use crate::executor::TraceResult;

/// One encoded transaction sequence (accounts + calls) together with its
/// fuzzing bookkeeping. An item is executed exactly once; the trace of that
/// execution travels with it so the reporter can consume it later.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct FuzzItem {
    /// Encoded testcase, ready for ABI post-processing.
    pub data: Vec<u8>,
    /// Trace of the one execution this item went through.
    pub res: TraceResult,
    /// Hops of derivation from the original seed.
    pub depth: u64,
    /// Mutation rounds that already used this item as their seed.
    pub fuzzed_count: u64,
    /// 0 = covered a formerly-uncovered branch, 1/2 = improved a distance,
    /// 3 = covered a branch never seen as a predicate.
    pub hit_rank: u8,
}

impl FuzzItem {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }
}

impl Input for FuzzItem {
    fn generate_name(&self, idx: usize) -> String {
        let head = &self.data[..self.data.len().min(4)];
        format!("item-{}-{}", idx, hex::encode(head))
    }
}

impl HasBytesVec for FuzzItem {
    fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_starts_unfuzzed() {
        let item = FuzzItem::new(vec![1, 2, 3]);
        assert_eq!(item.depth, 0);
        assert_eq!(item.fuzzed_count, 0);
        assert_eq!(item.hit_rank, 0);
        assert_eq!(item.bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_generate_name_uses_payload_head() {
        let item = FuzzItem::new(vec![0xde, 0xad, 0xbe, 0xef, 0x00]);
        assert_eq!(item.generate_name(7), "item-7-deadbeef");
    }
}
