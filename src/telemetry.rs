/// The reporter: per-execution telemetry, the persisted seed/weight files
/// exchanged between the two phases, and the final vulnerability report.
///
/// All writes are best-effort: failures are logged at debug level and never
/// stop the campaign. The JSON layouts are consumed by downstream tools and
/// must not change.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use itertools::Itertools;
use primitive_types::U256;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::abi::TestcaseView;
use crate::r#const::{COVERAGE_SCALE, NO_BRANCH_COVERAGE};
use crate::contract_utils::ContractInfo;
use crate::corpus::{EnergyRecord, Leader};
use crate::input::FuzzItem;
use crate::oracle::OracleKind;
use crate::state::FuzzState;
use crate::utils::try_write_file;

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn read_json(path: &Path) -> Map<String, Value> {
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        Err(_) => Map::new(),
    }
}

fn write_json(path: &Path, root: &Value) {
    let rendered = match serde_json::to_string_pretty(root) {
        Ok(rendered) => rendered,
        Err(e) => {
            debug!("failed to render {}: {}", path.display(), e);
            return;
        }
    };
    if let Err(e) = try_write_file(path, &rendered, false) {
        debug!("failed to write {}: {}", path.display(), e);
    }
}

/// Writes one JSON file per execution under `exec_queue/<contract-path>/`,
/// plus a one-shot `contract_info.json` per contract directory.
#[derive(Debug, Default)]
pub struct TelemetryExporter {
    counters: HashMap<PathBuf, u64>,
}

impl TelemetryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export_exec_info(
        &mut self,
        work_dir: &Path,
        item: &FuzzItem,
        contract: &ContractInfo,
        state: &FuzzState,
    ) {
        let contract_dir = work_dir.join("exec_queue").join(contract.path_part());
        if !self.counters.contains_key(&contract_dir) {
            self.counters.insert(contract_dir.clone(), 0);
            self.write_contract_info(&contract_dir, contract, state);
        }
        let exec_id = {
            let counter = self.counters.get_mut(&contract_dir).unwrap();
            let id = *counter;
            *counter += 1;
            id
        };

        let mut j = Map::new();
        j.insert("id".into(), json!(exec_id));
        j.insert("contract_short".into(), json!(contract.sanitized_short_name()));
        j.insert("contract_full".into(), json!(contract.contract_name));
        j.insert("timestamp".into(), json!(unix_now()));
        j.insert("testcase".into(), json!(item.res.current_testcase));

        match serde_json::from_str::<TestcaseView>(&item.res.current_testcase) {
            Ok(view) => Self::append_testcase_analysis(&mut j, &view),
            Err(e) => {
                j.insert("testcase_parse_error".into(), json!(e.to_string()));
                j.insert("function_count".into(), json!(0));
                j.insert("account_count".into(), json!(0));
                j.insert("has_balance".into(), json!(false));
            }
        }

        let tracebits: Vec<&String> = item.res.tracebits.iter().sorted().collect();
        j.insert("tracebits_string".into(), json!(tracebits.iter().join(",")));
        j.insert("tracebits_count".into(), json!(tracebits.len()));
        let coverage_pct = if !state.leaders.is_empty() && !tracebits.is_empty() {
            (tracebits.len() as f64 / state.leaders.len() as f64 * 100.0) as i64
        } else {
            0
        };
        j.insert("branch_coverage_pct".into(), json!(coverage_pct));

        let exceptions: Vec<&String> = item.res.unique_exceptions.iter().sorted().collect();
        j.insert("exceptions_string".into(), json!(exceptions.iter().join(",")));
        j.insert("exception_count".into(), json!(exceptions.len()));
        j.insert("has_exceptions".into(), json!(!exceptions.is_empty()));

        j.insert("predicates_count".into(), json!(item.res.predicates.len()));

        j.insert("execution_depth".into(), json!(item.depth));
        j.insert("has_nested_calls".into(), json!(item.depth > 1));
        let depth_level = match item.depth {
            0 => "simple",
            1 => "single_call",
            _ => "nested_calls",
        };
        j.insert("depth_level".into(), json!(depth_level));

        j.insert("hit_rank".into(), json!(item.hit_rank));
        j.insert("fuzzed_count".into(), json!(item.fuzzed_count));
        j.insert("data_size".into(), json!(item.data.len()));
        j.insert("total_execs".into(), json!(state.fuzz_stat.total_execs));

        let has_repeated_calls = j
            .get("has_repeated_calls")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        j.insert(
            "reentrancy_risk_indicator".into(),
            json!(has_repeated_calls && item.depth > 1),
        );
        let has_balance = j
            .get("has_balance")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        j.insert("lock_ether_risk_indicator".into(), json!(has_balance));

        let path = contract_dir.join(format!("exec_{}.json", exec_id));
        write_json(&path, &Value::Object(j));
    }

    fn write_contract_info(&self, contract_dir: &Path, contract: &ContractInfo, state: &FuzzState) {
        let coverage = if !state.leaders.is_empty() {
            (state.tracebits.len() as f64 / state.leaders.len() as f64 * 100.0) as i64
        } else {
            0
        };
        let info = json!({
            "full_name": contract.contract_name,
            "short_name": contract.sanitized_short_name(),
            "start_time": unix_now(),
            "total_branches": state.leaders.len(),
            "coverage_percentage": coverage,
        });
        write_json(&contract_dir.join("contract_info.json"), &info);
    }

    fn append_testcase_analysis(j: &mut Map<String, Value>, view: &TestcaseView) {
        j.insert("function_count".into(), json!(view.functions.len()));
        if !view.functions.is_empty() {
            let names: Vec<String> = view
                .functions
                .iter()
                .map(|f| {
                    if f.name.is_empty() {
                        "<fallback>".to_string()
                    } else {
                        f.name.clone()
                    }
                })
                .collect();
            j.insert(
                "function_sequence_string".into(),
                json!(names.iter().join(" -> ")),
            );

            let mut counts: HashMap<&String, usize> = HashMap::new();
            for name in &names {
                *counts.entry(name).or_insert(0) += 1;
            }
            let repeated: Vec<String> = counts
                .iter()
                .filter(|(_, count)| **count > 1)
                .sorted_by_key(|(name, _)| (*name).clone())
                .map(|(name, count)| format!("{} (x{})", name, count))
                .collect();
            j.insert("repeated_functions_count".into(), json!(repeated.len()));
            j.insert(
                "repeated_functions_string".into(),
                json!(repeated.iter().join(", ")),
            );
            j.insert("has_repeated_calls".into(), json!(!repeated.is_empty()));
        }

        j.insert("account_count".into(), json!(view.accounts.len()));
        let total_balance: u64 = view
            .accounts
            .iter()
            .filter_map(|account| account.balance.parse::<u64>().ok())
            .sum();
        j.insert("total_balance_wei".into(), json!(total_balance.to_string()));
        let ether = if total_balance == 0 {
            "0 ETH".to_string()
        } else if total_balance >= 1_000_000_000_000_000_000 {
            format!("{} ETH", total_balance / 1_000_000_000_000_000_000)
        } else {
            "< 1 ETH".to_string()
        };
        j.insert("total_balance_ether_string".into(), json!(ether));
        let has_balance = view
            .accounts
            .iter()
            .any(|account| !account.balance.is_empty() && account.balance != "0");
        j.insert("has_balance".into(), json!(has_balance));
    }
}

/// Persist the accumulated prefix maps plus the runtime bytecode. Existing
/// entries for other contracts are preserved.
pub fn write_prefix(
    work_dir: &Path,
    state: &FuzzState,
    contract: &ContractInfo,
    bin_runtime_hex: &str,
    branch_size: usize,
) {
    let path = work_dir.join("branch_msg/prefix.json");
    let mut root = read_json(&path);

    let mut prefix = Map::new();
    for record in &state.prefix_records {
        for (branch, sequence) in record.prefix_map.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
            prefix.insert(branch.clone(), json!(sequence));
        }
    }
    let coverage = if branch_size > 0 {
        (state.tracebits.len() as f64 / branch_size as f64 * COVERAGE_SCALE) as i64
    } else {
        0
    };
    root.insert(
        contract.file_stem(),
        json!({
            "Prefix": prefix,
            "Code": bin_runtime_hex,
            "Coverage": coverage,
        }),
    );
    write_json(&path, &Value::Object(root));

    let bin_path = work_dir.join(format!("{}.bin-runtime", contract.path_sans_sol()));
    if let Err(e) = try_write_file(&bin_path, bin_runtime_hex, false) {
        debug!("failed to write {}: {}", bin_path.display(), e);
    }
}

/// Persist the covered leaders as hex-encoded inputs, merged into the
/// existing file.
pub fn write_leaders(work_dir: &Path, state: &FuzzState, contract: &ContractInfo) {
    let path = work_dir.join("branch_msg/leaders.json");
    let mut root = read_json(&path);

    let mut entry = Map::new();
    for (branch, leader) in state.leaders.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        if leader.is_covered() {
            entry.insert(branch.clone(), json!(hex::encode(&leader.item.data)));
        }
    }
    if !entry.is_empty() {
        root.insert(contract.file_stem(), Value::Object(entry));
    }
    write_json(&path, &Value::Object(root));
}

/// Load the persisted per-branch weights into the energy vector. Returns
/// the persisted coverage, or the no-branch sentinel when the contract has
/// no `Weight` object. A missing file is unrecoverable in vuln mode.
pub fn read_weight(work_dir: &Path, state: &mut FuzzState, name: &str) -> Result<i32> {
    let path = work_dir.join("branch_msg/weight.json");
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("{} is required in vuln mode", path.display()))?;
    let root: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let weights = &root[name]["Weight"];
    if weights.is_null() {
        return Ok(NO_BRANCH_COVERAGE);
    }
    let coverage = root[name]["Coverage"].as_i64().unwrap_or(0) as i32;
    if let Some(map) = weights.as_object() {
        for (branch, weight) in map {
            state.energies.push(EnergyRecord {
                branch_id: branch.clone(),
                weight: weight.as_i64().unwrap_or(0) as i32,
            });
        }
    }
    Ok(coverage)
}

/// Load the persisted covered leaders for `name`. A missing file is
/// unrecoverable in vuln mode.
pub fn read_leaders(work_dir: &Path, state: &mut FuzzState, name: &str) -> Result<()> {
    let path = work_dir.join("branch_msg/leaders.json");
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("{} is required in vuln mode", path.display()))?;
    let root: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    if let Some(map) = root[name].as_object() {
        for (branch, encoded) in map {
            let encoded = encoded.as_str().unwrap_or_default();
            match hex::decode(encoded) {
                Ok(data) => {
                    state
                        .leaders
                        .insert(branch.clone(), Leader::new(FuzzItem::new(data), U256::zero()));
                }
                Err(e) => warn!(branch = %branch, "skipping undecodable leader: {}", e),
            }
        }
    }
    Ok(())
}

/// Write the final campaign report: totals plus, in vuln mode, the
/// per-oracle findings.
pub fn write_stats(
    work_dir: &Path,
    state: &FuzzState,
    contract: &ContractInfo,
    elapsed: f64,
    coverage: i32,
    case_num: usize,
    is_prefuzz: bool,
) {
    let speed = if elapsed > 0.0 {
        state.fuzz_stat.total_execs as f64 / elapsed
    } else {
        0.0
    };
    let mut root = Map::new();
    root.insert("totalExecs".into(), json!(state.fuzz_stat.total_execs));
    root.insert("speed".into(), json!(speed));
    root.insert("queueCycles".into(), json!(state.fuzz_stat.queue_cycle));
    root.insert(
        "uniqExceptions".into(),
        json!(state.unique_exceptions.len()),
    );
    root.insert("coverage".into(), json!(coverage as f64 / 100.0));

    if !is_prefuzz {
        let mut vulner = Map::new();
        for kind in OracleKind::ALL {
            let idx = kind.index();
            let distinction = state.vuln_branches[idx]
                .iter()
                .sorted()
                .map(|pc| format!("{:x}", pc))
                .join(" ");
            let test_cases: Vec<Value> = state.vuln_cases[idx]
                .iter()
                .sorted()
                .take(case_num)
                .map(|case| match serde_json::from_str::<Value>(case) {
                    Ok(parsed) => parsed,
                    Err(e) => json!(format!("unparsed test case: {}", e)),
                })
                .collect();
            vulner.insert(
                kind.report_label().to_string(),
                json!({
                    "number": state.vulnerabilities[idx],
                    "instruction distinction": distinction,
                    "test cases": test_cases,
                }),
            );
        }
        root.insert("vulnerabilities".into(), Value::Object(vulner));
    }

    let path = work_dir.join(format!("{}_report.json", contract.path_sans_sol()));
    let _ = fs::remove_file(&path);
    write_json(&path, &Value::Object(root));
}

/// Compact once-per-second statistics snapshot.
pub fn show_stats(state: &FuzzState, elapsed: f64, branch_size: usize, is_prefuzz: bool) {
    let speed = if elapsed > 0.0 {
        (state.fuzz_stat.total_execs as f64 / elapsed) as u64
    } else {
        0
    };
    let coverage = if branch_size > 0 {
        (state.tracebits.len() as f64 / branch_size as f64 * 100.0) as u64
    } else {
        0
    };
    if is_prefuzz {
        info!(
            execs = state.fuzz_stat.total_execs,
            speed,
            coverage,
            leaders = state.leaders.len(),
            predicates = state.predicates.len(),
            max_depth = state.fuzz_stat.max_depth,
            cycles = state.fuzz_stat.queue_cycle,
            exceptions = state.unique_exceptions.len(),
            "pre-fuzz stats"
        );
    } else {
        let findings = OracleKind::ALL
            .iter()
            .filter(|kind| state.vulnerabilities[kind.index()] > 0)
            .map(|kind| format!("{}={}", kind.report_label(), state.vulnerabilities[kind.index()]))
            .join(", ");
        info!(
            execs = state.fuzz_stat.total_execs,
            speed,
            coverage,
            energy = state.remaining_energy(),
            exceptions = state.unique_exceptions.len(),
            findings = %findings,
            "vuln-fuzz stats"
        );
    }
}
