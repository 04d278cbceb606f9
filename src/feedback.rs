/// The interest filter: after every execution it reconciles the trace with
/// the session state and decides whether the input supersedes a leader,
/// opens a new queue entry, or is dropped.
use bytes::Bytes;
use itertools::Itertools;
use primitive_types::U256;
use tracing::debug;

use crate::abi::AbiCodec;
use crate::corpus::Leader;
use crate::executor::{TargetExecutor, ValidRegions};
use crate::input::FuzzItem;
use crate::r#const::STALE_SEED_THRESHOLD;
use crate::state::FuzzState;
use crate::types::{BranchId, SYNTHETIC_BRANCH};

/// Post-process a candidate, trimming splice/prolongation results down to
/// the tail beyond the canonical testcase length. The executor still runs
/// the full sequence; only the stored seed shrinks.
fn normalise(state: &FuzzState, abi: &impl AbiCodec, data: Vec<u8>) -> (Vec<u8>, FuzzItem, bool) {
    let revised = abi.postprocess_testdata(&data);
    let mut item = FuzzItem::new(revised.clone());
    let mut is_splice = false;
    if state.data0_len != 0 && item.data.len() > state.data0_len {
        item.data = item.data[state.data0_len..].to_vec();
        is_splice = true;
    }
    (revised, item, is_splice)
}

/// Coverage-phase filter. Executes `data` once and updates leaders, queue,
/// tracebits, predicates, exceptions and prefix records.
pub fn save_if_interest<E, A>(
    state: &mut FuzzState,
    executor: &mut E,
    abi: &A,
    data: Vec<u8>,
    depth: u64,
    regions: &ValidRegions,
    elapsed: f64,
) -> FuzzItem
where
    E: TargetExecutor,
    A: AbiCodec,
{
    let (revised, mut item, is_splice) = normalise(state, abi, data);
    item.res = executor.exec(Bytes::from(revised), is_splice, regions, true);
    state.fuzz_stat.total_execs += 1;

    for tracebit in item.res.tracebits.iter().cloned().sorted() {
        if state.tracebits.contains(&tracebit) {
            continue;
        }
        // Newly covered. An entry may already exist from an earlier
        // approached-but-not-taken sighting; that best uncovered attempt
        // is obsolete now.
        if state.leaders.remove(&tracebit).is_some() {
            item.hit_rank = 0;
        } else {
            item.hit_rank = 3;
        }
        if !state.queues.iter().any(|branch| branch == &tracebit) {
            state.queues.push(tracebit.clone());
        }
        item.depth = depth + 1;
        state
            .leaders
            .insert(tracebit.clone(), Leader::new(item.clone(), U256::zero()));
        if depth + 1 > state.fuzz_stat.max_depth {
            state.fuzz_stat.max_depth = depth + 1;
        }
        state.fuzz_stat.last_new_path = elapsed;
        debug!(branch = %tracebit, "cover new branch");
        #[cfg(feature = "print_corpus")]
        println!("new covered leader {}", tracebit);
    }

    let predicates: Vec<(BranchId, U256)> = item
        .res
        .predicates
        .iter()
        .map(|(branch, distance)| (branch.clone(), *distance))
        .sorted()
        .collect();
    for (branch, distance) in predicates {
        match state.leaders.get(&branch) {
            Some(leader)
                if !leader.comparison_value.is_zero() && leader.comparison_value > distance =>
            {
                debug!(
                    branch = %branch,
                    prev = %leader.comparison_value,
                    now = %distance,
                    "better test case for uncovered branch"
                );
                state.leaders.remove(&branch);
                item.depth = depth + 1;
                if item.hit_rank < 2 {
                    item.hit_rank = 2;
                }
                state
                    .leaders
                    .insert(branch.clone(), Leader::new(item.clone(), distance));
                if depth + 1 > state.fuzz_stat.max_depth {
                    state.fuzz_stat.max_depth = depth + 1;
                }
                state.fuzz_stat.last_new_path = elapsed;
            }
            None => {
                debug!(branch = %branch, now = %distance, "new uncovered branch");
                item.depth = depth + 1;
                if item.hit_rank < 1 {
                    item.hit_rank = 1;
                }
                state
                    .leaders
                    .insert(branch.clone(), Leader::new(item.clone(), distance));
                state.queues.push(branch.clone());
                if depth + 1 > state.fuzz_stat.max_depth {
                    state.fuzz_stat.max_depth = depth + 1;
                }
                state.fuzz_stat.last_new_path = elapsed;
            }
            // The incumbent is closer or the branch is already covered.
            _ => {}
        }
    }

    state.update_tracebits(&item.res.tracebits);
    state.update_predicates(&item.res.predicates);
    state.update_exceptions(&item.res.unique_exceptions);
    state.record_prefixes(&item.res.prefix_map);
    item
}

/// Vuln-phase filter. Scores branches by hit count, drains energy by the
/// hits contributed, and tracks cumulative per-branch totals.
pub fn save_if_interest_energy<E, A>(
    state: &mut FuzzState,
    executor: &mut E,
    abi: &A,
    data: Vec<u8>,
    branch_id: &str,
    fuzzed_count: u64,
    regions: &ValidRegions,
) -> FuzzItem
where
    E: TargetExecutor,
    A: AbiCodec,
{
    let (revised, mut item, is_splice) = normalise(state, abi, data);
    item.res = executor.exec(Bytes::from(revised), is_splice, regions, false);
    state.fuzz_stat.total_execs += 1;
    item.hit_rank = 0;

    let synthetic = state
        .energies
        .first()
        .map(|record| record.branch_id == SYNTHETIC_BRANCH)
        .unwrap_or(false);
    if synthetic {
        let record = &mut state.energies[0];
        record.weight = (record.weight - 1).max(0);
        if fuzzed_count > STALE_SEED_THRESHOLD {
            // The lone seed went stale; let the newcomer take over.
            state.leaders.clear();
            state
                .leaders
                .insert(SYNTHETIC_BRANCH.to_string(), Leader::new(item.clone(), U256::zero()));
        }
    } else {
        let reached: Vec<(BranchId, u64)> = item
            .res
            .reached_branch
            .iter()
            .map(|(branch, hits)| (branch.clone(), *hits))
            .sorted()
            .collect();
        for (branch, hits) in reached {
            let hits_value = U256::from(hits);
            let replace = match state.leaders.get(&branch) {
                None => {
                    state.branch_hits.entry(branch.clone()).or_insert(0);
                    true
                }
                Some(leader)
                    if leader.comparison_value < hits_value
                        || (leader.comparison_value == hits_value
                            && fuzzed_count > STALE_SEED_THRESHOLD) =>
                {
                    if leader.comparison_value.is_zero() {
                        state.branch_hits.entry(branch.clone()).or_insert(0);
                    }
                    state.leaders.remove(&branch);
                    true
                }
                _ => false,
            };
            if replace {
                state
                    .leaders
                    .insert(branch.clone(), Leader::new(item.clone(), hits_value));
            }

            if let Some(record) = state
                .energies
                .iter_mut()
                .find(|record| record.branch_id == branch)
            {
                record.weight = (record.weight as i64 - hits as i64).max(0) as i32;
                *state.branch_hits.entry(branch.clone()).or_insert(0) += hits;
                if branch == branch_id {
                    item.hit_rank = 1;
                }
            }
        }
    }

    state.update_exceptions(&item.res.unique_exceptions);
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::EnergyRecord;
    use crate::test_utils::{assert_invariants, reached, trace, IdentityAbi, ScriptedExecutor};

    fn coverage_regions() -> ValidRegions {
        ValidRegions::default()
    }

    /// Single-branch contract: first input takes side 0 and reports side 1
    /// at distance 7.
    #[test]
    fn test_first_execution_installs_covered_and_open_leaders() {
        let mut state = FuzzState::new(1);
        let mut executor = ScriptedExecutor::new(vec![trace(&["66:0"], &[("66:1", 7)])]);
        let regions = coverage_regions();

        let item = save_if_interest(
            &mut state,
            &mut executor,
            &IdentityAbi,
            vec![0u8; 4],
            0,
            &regions,
            1.0,
        );

        assert_eq!(state.leaders.len(), 2);
        assert!(state.leaders["66:0"].is_covered());
        assert_eq!(state.leaders["66:1"].comparison_value, U256::from(7));
        assert_eq!(state.queues, vec!["66:0".to_string(), "66:1".to_string()]);
        assert!(state.tracebits.contains("66:0"));
        assert!(state.predicates.contains("66:1"));
        assert_eq!(state.fuzz_stat.total_execs, 1);
        assert_eq!(item.depth, 1);
        assert_invariants(&state);
    }

    /// Distance improvement supersedes the open leader.
    #[test]
    fn test_distance_improvement_replaces_leader() {
        let mut state = FuzzState::new(1);
        let mut executor = ScriptedExecutor::new(vec![
            trace(&["66:0"], &[("66:1", 7)]),
            trace(&["66:0"], &[("66:1", 3)]),
        ]);
        let regions = coverage_regions();

        save_if_interest(&mut state, &mut executor, &IdentityAbi, vec![0u8; 4], 0, &regions, 1.0);
        let improved = save_if_interest(
            &mut state,
            &mut executor,
            &IdentityAbi,
            vec![1u8; 4],
            0,
            &regions,
            2.0,
        );

        assert_eq!(state.leaders["66:1"].comparison_value, U256::from(3));
        assert_eq!(state.leaders["66:1"].item.data, vec![1u8; 4]);
        assert!(improved.hit_rank >= 2);
        assert_eq!(state.fuzz_stat.last_new_path, 2.0);
        assert_eq!(state.queues.len(), 2);
        assert_invariants(&state);
    }

    /// Flipping the branch empties the predicate set.
    #[test]
    fn test_branch_flip_covers_predicate() {
        let mut state = FuzzState::new(1);
        let mut executor = ScriptedExecutor::new(vec![
            trace(&["66:0"], &[("66:1", 7)]),
            trace(&["66:0", "66:1"], &[]),
        ]);
        let regions = coverage_regions();

        save_if_interest(&mut state, &mut executor, &IdentityAbi, vec![0u8; 4], 0, &regions, 1.0);
        let flipped = save_if_interest(
            &mut state,
            &mut executor,
            &IdentityAbi,
            vec![2u8; 4],
            0,
            &regions,
            2.0,
        );

        assert!(state.leaders["66:1"].is_covered());
        assert!(state.predicates.is_empty());
        assert!(state.tracebits.contains("66:0") && state.tracebits.contains("66:1"));
        // the previous open leader existed, so this counts as an upgrade
        assert_eq!(flipped.hit_rank, 0);
        assert_invariants(&state);
    }

    /// A trace that is a subset of known state changes nothing but the
    /// execution counter.
    #[test]
    fn test_subset_trace_is_a_no_op() {
        let mut state = FuzzState::new(1);
        let mut executor = ScriptedExecutor::new(vec![
            trace(&["66:0"], &[("66:1", 7)]),
            trace(&["66:0"], &[("66:1", 7)]),
        ]);
        let regions = coverage_regions();

        save_if_interest(&mut state, &mut executor, &IdentityAbi, vec![0u8; 4], 0, &regions, 1.0);
        let leaders_before = state.leaders.clone();
        let queues_before = state.queues.clone();
        let last_new_path = state.fuzz_stat.last_new_path;

        save_if_interest(&mut state, &mut executor, &IdentityAbi, vec![9u8; 4], 0, &regions, 5.0);

        assert_eq!(state.fuzz_stat.total_execs, 2);
        assert_eq!(state.queues, queues_before);
        assert_eq!(state.fuzz_stat.last_new_path, last_new_path);
        assert_eq!(state.leaders.len(), leaders_before.len());
        assert_eq!(
            state.leaders["66:1"].item.data,
            leaders_before["66:1"].item.data
        );
        assert_invariants(&state);
    }

    /// Empty trace: only the execution counter and exceptions move.
    #[test]
    fn test_empty_trace_updates_counters_only() {
        let mut state = FuzzState::new(1);
        let mut result = trace(&[], &[]);
        result.unique_exceptions.insert("OutOfGas".to_string());
        let mut executor = ScriptedExecutor::new(vec![result]);
        let regions = coverage_regions();

        save_if_interest(&mut state, &mut executor, &IdentityAbi, vec![0u8; 4], 0, &regions, 1.0);

        assert!(state.leaders.is_empty());
        assert!(state.queues.is_empty());
        assert!(state.tracebits.is_empty());
        assert!(state.predicates.is_empty());
        assert_eq!(state.fuzz_stat.total_execs, 1);
        assert!(state.unique_exceptions.contains("OutOfGas"));
    }

    /// Newly covered branch never seen as a predicate gets rank 3.
    #[test]
    fn test_fresh_cover_without_prior_predicate_ranks_three() {
        let mut state = FuzzState::new(1);
        let mut executor = ScriptedExecutor::new(vec![trace(&["66:0"], &[])]);
        let regions = coverage_regions();

        let item = save_if_interest(
            &mut state,
            &mut executor,
            &IdentityAbi,
            vec![0u8; 4],
            0,
            &regions,
            1.0,
        );

        assert_eq!(item.hit_rank, 3);
        assert_invariants(&state);
    }

    /// Equal distance in the coverage phase keeps the incumbent.
    #[test]
    fn test_equal_distance_keeps_incumbent() {
        let mut state = FuzzState::new(1);
        let mut executor = ScriptedExecutor::new(vec![
            trace(&[], &[("66:1", 7)]),
            trace(&[], &[("66:1", 7)]),
        ]);
        let regions = coverage_regions();

        save_if_interest(&mut state, &mut executor, &IdentityAbi, vec![0u8; 4], 0, &regions, 1.0);
        save_if_interest(&mut state, &mut executor, &IdentityAbi, vec![5u8; 4], 0, &regions, 2.0);

        assert_eq!(state.leaders["66:1"].item.data, vec![0u8; 4]);
        assert_invariants(&state);
    }

    /// Splice results are trimmed to the tail past the canonical length.
    #[test]
    fn test_long_inputs_are_trimmed_to_tail() {
        let mut state = FuzzState::new(1);
        state.data0_len = 4;
        let mut executor = ScriptedExecutor::new(vec![trace(&["66:0"], &[])]);
        let regions = coverage_regions();

        let item = save_if_interest(
            &mut state,
            &mut executor,
            &IdentityAbi,
            vec![1, 2, 3, 4, 5, 6],
            0,
            &regions,
            1.0,
        );

        assert_eq!(item.data, vec![5, 6]);
        assert_eq!(state.leaders["66:0"].item.data, vec![5, 6]);
    }

    /// Vuln mode: energy drains by the hit count, floored at zero.
    #[test]
    fn test_energy_drains_by_hit_count() {
        let mut state = FuzzState::new(1);
        state.energies.push(EnergyRecord {
            branch_id: "66:0".into(),
            weight: 10,
        });
        state.energies.push(EnergyRecord {
            branch_id: "70:1".into(),
            weight: 3,
        });
        let mut executor =
            ScriptedExecutor::new(vec![reached(&[("66:0", 6)]), reached(&[("66:0", 5)])]);
        let regions = coverage_regions();

        save_if_interest_energy(
            &mut state,
            &mut executor,
            &IdentityAbi,
            vec![0u8; 4],
            "66:0",
            0,
            &regions,
        );
        assert_eq!(state.energies[0].weight, 4);

        save_if_interest_energy(
            &mut state,
            &mut executor,
            &IdentityAbi,
            vec![0u8; 4],
            "66:0",
            0,
            &regions,
        );
        assert_eq!(state.energies[0].weight, 0);
        assert_eq!(state.energies[1].weight, 3);
        assert_eq!(state.branch_hits["66:0"], 11);
    }

    /// Vuln mode: higher hit count supersedes; equal count only displaces a
    /// stale seed.
    #[test]
    fn test_vuln_leader_replacement_rules() {
        let mut state = FuzzState::new(1);
        state.energies.push(EnergyRecord {
            branch_id: "66:0".into(),
            weight: 100,
        });
        let mut executor = ScriptedExecutor::new(vec![
            reached(&[("66:0", 4)]),
            reached(&[("66:0", 4)]),
            reached(&[("66:0", 4)]),
            reached(&[("66:0", 9)]),
        ]);
        let regions = coverage_regions();

        save_if_interest_energy(
            &mut state,
            &mut executor,
            &IdentityAbi,
            vec![1u8; 4],
            "66:0",
            0,
            &regions,
        );
        assert_eq!(state.leaders["66:0"].item.data, vec![1u8; 4]);

        // equal count, fresh seed: incumbent stays
        save_if_interest_energy(
            &mut state,
            &mut executor,
            &IdentityAbi,
            vec![2u8; 4],
            "66:0",
            3,
            &regions,
        );
        assert_eq!(state.leaders["66:0"].item.data, vec![1u8; 4]);

        // equal count, stale seed: newcomer wins
        save_if_interest_energy(
            &mut state,
            &mut executor,
            &IdentityAbi,
            vec![3u8; 4],
            "66:0",
            17,
            &regions,
        );
        assert_eq!(state.leaders["66:0"].item.data, vec![3u8; 4]);

        // strictly higher count always wins
        save_if_interest_energy(
            &mut state,
            &mut executor,
            &IdentityAbi,
            vec![4u8; 4],
            "66:0",
            0,
            &regions,
        );
        assert_eq!(state.leaders["66:0"].item.data, vec![4u8; 4]);
        assert_eq!(state.leaders["66:0"].comparison_value, U256::from(9));
    }

    /// Degenerate vuln mode: the synthetic branch drains one unit per
    /// execution and swaps its seed once stale.
    #[test]
    fn test_synthetic_branch_drains_and_replaces() {
        let mut state = FuzzState::new(1);
        state.energies.push(EnergyRecord {
            branch_id: SYNTHETIC_BRANCH.into(),
            weight: 128,
        });
        state.leaders.insert(
            SYNTHETIC_BRANCH.to_string(),
            Leader::new(FuzzItem::new(vec![0u8; 4]), U256::zero()),
        );
        let mut executor = ScriptedExecutor::new(vec![]);
        let regions = coverage_regions();

        save_if_interest_energy(
            &mut state,
            &mut executor,
            &IdentityAbi,
            vec![1u8; 4],
            "",
            0,
            &regions,
        );
        assert_eq!(state.energies[0].weight, 127);
        assert_eq!(state.leaders[SYNTHETIC_BRANCH].item.data, vec![0u8; 4]);

        save_if_interest_energy(
            &mut state,
            &mut executor,
            &IdentityAbi,
            vec![9u8; 4],
            "",
            17,
            &regions,
        );
        assert_eq!(state.energies[0].weight, 126);
        assert_eq!(state.leaders.len(), 1);
        assert_eq!(state.leaders[SYNTHETIC_BRANCH].item.data, vec![9u8; 4]);
    }
}
