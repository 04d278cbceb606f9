/// Campaign configuration consumed by the fuzzing core.
use crate::contract_utils::ContractInfo;

/// Which transaction-order variant the attacker agent ABI uses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FuzzOrder {
    First,
    Second,
}

impl FuzzOrder {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "first" => Ok(FuzzOrder::First),
            "second" => Ok(FuzzOrder::Second),
            _ => Err(format!("Unknown order: {}", s)),
        }
    }
}

/// Where statistics snapshots go.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReporterKind {
    Terminal,
    Json,
    Both,
}

impl ReporterKind {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "terminal" => Ok(ReporterKind::Terminal),
            "json" => Ok(ReporterKind::Json),
            "both" => Ok(ReporterKind::Both),
            _ => Err(format!("Unknown reporter: {}", s)),
        }
    }

    /// Whether stats snapshots are shown while fuzzing.
    pub fn shows_stats(self) -> bool {
        matches!(self, ReporterKind::Terminal | ReporterKind::Both)
    }

    /// Whether final reports are written to disk.
    pub fn writes_json(self) -> bool {
        matches!(self, ReporterKind::Json | ReporterKind::Both)
    }
}

/// Everything the core needs to run one campaign.
#[derive(Clone, Debug)]
pub struct FuzzParam {
    /// One `is_main` contract plus at most one attacker agent.
    pub contract_info: Vec<ContractInfo>,
    /// Name fragment identifying the attacker agent contract.
    pub attacker_name: String,
    /// Coverage phase when set, vuln phase otherwise.
    pub is_prefuzz: bool,
    /// Mutator mode switch; mode 1 keeps havoc size-preserving.
    pub mode: i32,
    pub order: FuzzOrder,
    /// Seconds without a new path (pre-fuzz) or of total runtime (vuln)
    /// before the campaign stops.
    pub duration: u64,
    pub reporter: ReporterKind,
    /// Test cases kept per oracle in the final report.
    pub case_num: usize,
}

impl Default for FuzzParam {
    fn default() -> Self {
        Self {
            contract_info: Vec::new(),
            attacker_name: String::new(),
            is_prefuzz: true,
            mode: 1,
            order: FuzzOrder::First,
            duration: 600,
            reporter: ReporterKind::Both,
            case_num: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporter_kind_flags() {
        assert!(ReporterKind::Terminal.shows_stats());
        assert!(!ReporterKind::Terminal.writes_json());
        assert!(ReporterKind::Json.writes_json());
        assert!(!ReporterKind::Json.shows_stats());
        assert!(ReporterKind::Both.shows_stats() && ReporterKind::Both.writes_json());
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        assert!(FuzzOrder::from_str("third").is_err());
        assert!(ReporterKind::from_str("csv").is_err());
        assert_eq!(ReporterKind::from_str("both"), Ok(ReporterKind::Both));
    }
}
