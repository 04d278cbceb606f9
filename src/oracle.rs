/// The closed set of vulnerability oracles and their report bindings.
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Number of oracle kinds; indices are fixed across reports and the UI.
pub const TOTAL: usize = 13;

/// Vulnerability oracle kinds checked during the vuln phase.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum OracleKind {
    Gasless = 0,
    UncheckedCall,
    Reentrancy,
    TimeDependency,
    NumberDependency,
    DelegateCall,
    Freezing,
    Overflow,
    Underflow,
    UnexpectedEth,
    TxOrigin,
    FalseAssert,
    FalseSuicide,
}

impl OracleKind {
    pub const ALL: [OracleKind; TOTAL] = [
        OracleKind::Gasless,
        OracleKind::UncheckedCall,
        OracleKind::Reentrancy,
        OracleKind::TimeDependency,
        OracleKind::NumberDependency,
        OracleKind::DelegateCall,
        OracleKind::Freezing,
        OracleKind::Overflow,
        OracleKind::Underflow,
        OracleKind::UnexpectedEth,
        OracleKind::TxOrigin,
        OracleKind::FalseAssert,
        OracleKind::FalseSuicide,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Key of this oracle in the final vulnerability report. Consumed by
    /// downstream tools; must not change.
    pub fn report_label(self) -> &'static str {
        match self {
            OracleKind::Gasless => "gasless",
            OracleKind::UncheckedCall => "unchecked call",
            OracleKind::Reentrancy => "reentrancy",
            OracleKind::TimeDependency => "timestamp dependency",
            OracleKind::NumberDependency => "block number dependency",
            OracleKind::DelegateCall => "dangerous delegatecall",
            OracleKind::Freezing => "freezing ether",
            OracleKind::Overflow => "integer overflow",
            OracleKind::Underflow => "integer underflow",
            OracleKind::UnexpectedEth => "unexpected ether",
            OracleKind::TxOrigin => "Authorization through tx.origin",
            OracleKind::FalseAssert => "False Assert",
            OracleKind::FalseSuicide => "False Suicide",
        }
    }
}

/// Snapshot of oracle verdicts accumulated by the executor since deployment:
/// per-kind violation counts plus the pcs of the raising instructions.
#[derive(Clone, Debug)]
pub struct OracleAnalysis {
    pub counts: Vec<u16>,
    pub branch_pcs: Vec<HashSet<u16>>,
}

impl OracleAnalysis {
    pub fn empty() -> Self {
        Self {
            counts: vec![0; TOTAL],
            branch_pcs: vec![HashSet::new(); TOTAL],
        }
    }
}

impl Default for OracleAnalysis {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_stable() {
        assert_eq!(OracleKind::Gasless.index(), 0);
        assert_eq!(OracleKind::Reentrancy.index(), 2);
        assert_eq!(OracleKind::FalseSuicide.index(), TOTAL - 1);
        for (i, kind) in OracleKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_report_labels_are_distinct() {
        let labels: HashSet<&str> = OracleKind::ALL.iter().map(|k| k.report_label()).collect();
        assert_eq!(labels.len(), TOTAL);
    }
}
