/// Campaign drivers for the two fuzzing phases.
///
/// `pre_fuzz` chases branch coverage and persists seeds + prefix maps for
/// the second phase; `vuln_fuzz` replays with oracle instrumentation and
/// drains per-branch energy. Both phases share the interest filter and the
/// mutation stage battery, sequenced here.
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::exit;

use anyhow::{anyhow, Result};
use itertools::Itertools;
use libafl::prelude::Rand;
use libafl::state::HasRand;
use primitive_types::U256;
use tracing::{debug, info, warn};

use crate::abi::AbiCodec;
use crate::config::FuzzParam;
use crate::contract_utils::ContractInfo;
use crate::corpus::{EnergyRecord, Leader};
use crate::executor::{BranchProvider, TargetExecutor, ValidRegions};
use crate::feedback::{save_if_interest, save_if_interest_energy};
use crate::input::FuzzItem;
use crate::mutation_utils::Dicts;
use crate::mutator::{Mutation, MutationStage, SaveInput};
use crate::oracle::TOTAL;
use crate::r#const::{MIN_EXEC_SPEED, SYNTHETIC_BRANCH_WEIGHT};
use crate::scheduler::{EnergyScheduler, QueueScheduler};
use crate::state::{FuzzState, FuzzStat};
use crate::telemetry::{
    read_leaders, read_weight, show_stats, write_leaders, write_prefix, write_stats,
    TelemetryExporter,
};
use crate::types::{branch_pc, SYNTHETIC_BRANCH};
use crate::utils::Timer;

/// Pre-fuzz stops when coverage has nothing left to chase, progress has
/// stalled past the configured window, or execution crawls.
pub fn prefuzz_should_stop(
    stat: &FuzzStat,
    predicates_left: usize,
    elapsed: f64,
    duration: u64,
) -> bool {
    if predicates_left == 0 {
        return true;
    }
    if elapsed - stat.last_new_path > duration as f64 {
        return true;
    }
    elapsed > 0.0 && (stat.total_execs as f64 / elapsed) as u64 <= MIN_EXEC_SPEED
}

/// Vuln mode stops when the energy pool drains, the time budget is spent,
/// or execution crawls.
pub fn vuln_should_stop(
    stat: &FuzzStat,
    remaining_energy: i64,
    elapsed: f64,
    duration: u64,
) -> bool {
    if remaining_energy <= 0 {
        return true;
    }
    if elapsed > duration as f64 {
        return true;
    }
    elapsed > 0.0 && (stat.total_execs as f64 / elapsed) as u64 <= MIN_EXEC_SPEED
}

/// Loop-invariant context of one pre-fuzz campaign.
struct PreFuzzCtx<'a> {
    regions: &'a ValidRegions,
    branch_size: usize,
    bin_runtime: &'a str,
    snippets: &'a HashMap<u64, String>,
    contract: &'a ContractInfo,
}

/// Loop-invariant context of one vuln campaign.
struct VulnCtx<'a> {
    regions: &'a ValidRegions,
    branch_size: usize,
    coverage: i32,
    contract: &'a ContractInfo,
}

/// The save capability handed to pre-fuzz mutation stages: runs the
/// interest filter, snapshots stats once per second and evaluates the
/// termination predicate.
struct PreFuzzSaver<'a, E, A> {
    fuzzer: &'a mut Fuzzer,
    executor: &'a mut E,
    abi: &'a A,
    ctx: &'a PreFuzzCtx<'a>,
    depth: u64,
}

impl<'a, E: TargetExecutor, A: AbiCodec> SaveInput for PreFuzzSaver<'a, E, A> {
    fn save(&mut self, data: Vec<u8>) -> FuzzItem {
        let elapsed = self.fuzzer.timer.elapsed();
        let item = save_if_interest(
            &mut self.fuzzer.state,
            self.executor,
            self.abi,
            data,
            self.depth,
            self.ctx.regions,
            elapsed,
        );
        self.fuzzer.prefuzz_report_tick(self.ctx);
        item
    }
}

/// The vuln-mode save capability: interest filter, oracle accounting,
/// per-execution telemetry, stats and termination.
struct VulnSaver<'a, E, A> {
    fuzzer: &'a mut Fuzzer,
    executor: &'a mut E,
    abi: &'a A,
    ctx: &'a VulnCtx<'a>,
    branch: &'a str,
    fuzzed_count: u64,
}

impl<'a, E: TargetExecutor, A: AbiCodec> SaveInput for VulnSaver<'a, E, A> {
    fn save(&mut self, data: Vec<u8>) -> FuzzItem {
        let item = save_if_interest_energy(
            &mut self.fuzzer.state,
            self.executor,
            self.abi,
            data,
            self.branch,
            self.fuzzed_count,
            self.ctx.regions,
        );

        let analysis = self.executor.analyze();
        let state = &mut self.fuzzer.state;
        for idx in 0..TOTAL {
            for pc in &analysis.branch_pcs[idx] {
                state.vuln_branches[idx].insert(*pc);
            }
            if analysis.counts[idx] > state.last_vulnerabilities[idx] {
                state.vuln_cases[idx].insert(item.res.current_testcase.clone());
            }
        }
        state.vulnerabilities = analysis.counts.clone();
        state.last_vulnerabilities = analysis.counts;

        self.fuzzer.telemetry.export_exec_info(
            &self.fuzzer.work_dir,
            &item,
            self.ctx.contract,
            &self.fuzzer.state,
        );
        self.fuzzer.vuln_report_tick(self.ctx);
        item
    }
}

macro_rules! prefuzz_stage {
    ($fuzzer:expr, $executor:expr, $abi:expr, $ctx:expr, $depth:expr,
     $mutation:ident . $method:ident, $stage:expr, $origin:ident) => {{
        {
            let mut saver = PreFuzzSaver {
                fuzzer: &mut *$fuzzer,
                executor: &mut *$executor,
                abi: &*$abi,
                ctx: &$ctx,
                depth: $depth,
            };
            $mutation.$method(&mut saver);
        }
        $fuzzer.note_stage_finds($stage, &mut $origin);
    }};
}

macro_rules! vuln_stage {
    ($fuzzer:expr, $executor:expr, $abi:expr, $ctx:expr, $branch:expr, $fuzzed:expr,
     $mutation:ident . $method:ident, $stage:expr, $origin:ident) => {{
        {
            let mut saver = VulnSaver {
                fuzzer: &mut *$fuzzer,
                executor: &mut *$executor,
                abi: &*$abi,
                ctx: &$ctx,
                branch: $branch,
                fuzzed_count: $fuzzed,
            };
            $mutation.$method(&mut saver);
        }
        $fuzzer.note_stage_finds($stage, &mut $origin);
    }};
}

/// One fuzzing session: owns the global state, the timer and the telemetry
/// exporter for the lifetime of a run.
pub struct Fuzzer {
    param: FuzzParam,
    work_dir: PathBuf,
    pub state: FuzzState,
    timer: Timer,
    shown_seconds: HashSet<u64>,
    telemetry: TelemetryExporter,
}

impl Fuzzer {
    pub fn new(param: FuzzParam, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            param,
            work_dir: work_dir.into(),
            state: FuzzState::new(rand::random()),
            timer: Timer::new(),
            shown_seconds: HashSet::new(),
            telemetry: TelemetryExporter::new(),
        }
    }

    /// The contract under test.
    pub fn main_contract(&self) -> Result<&ContractInfo> {
        self.param
            .contract_info
            .iter()
            .find(|contract| contract.is_main)
            .ok_or_else(|| anyhow!("no main contract configured"))
    }

    /// Run the configured phase to completion. Both phases terminate the
    /// process from inside the save path; an `Ok` return is never reached
    /// in practice.
    pub fn run<E, A, B>(
        &mut self,
        executor: &mut E,
        abi: &mut A,
        branches: &B,
        dicts: &Dicts,
    ) -> Result<()>
    where
        E: TargetExecutor,
        A: AbiCodec,
        B: BranchProvider,
    {
        if self.param.is_prefuzz {
            self.pre_fuzz(executor, abi, branches, dicts)
        } else {
            self.vuln_fuzz(executor, abi, branches, dicts)
        }
    }

    fn note_stage_finds(&mut self, stage: MutationStage, origin_hit_count: &mut usize) {
        let now = self.state.leaders.len();
        self.state.fuzz_stat.stage_finds[stage as usize] +=
            now.saturating_sub(*origin_hit_count) as u64;
        *origin_hit_count = now;
    }

    fn prefuzz_report_tick(&mut self, ctx: &PreFuzzCtx<'_>) {
        let elapsed = self.timer.elapsed();
        if self.shown_seconds.insert(elapsed as u64) && self.param.reporter.shows_stats() {
            show_stats(&self.state, elapsed, ctx.branch_size, true);
        }

        if prefuzz_should_stop(
            &self.state.fuzz_stat,
            self.state.predicates.len(),
            elapsed,
            self.param.duration,
        ) {
            if self.param.reporter.shows_stats() {
                show_stats(&self.state, elapsed, ctx.branch_size, true);
            }
            write_prefix(
                &self.work_dir,
                &self.state,
                ctx.contract,
                ctx.bin_runtime,
                ctx.branch_size,
            );
            write_leaders(&self.work_dir, &self.state, ctx.contract);
            self.stop(ctx.snippets);
        }
    }

    fn vuln_report_tick(&mut self, ctx: &VulnCtx<'_>) {
        let elapsed = self.timer.elapsed();
        if self.shown_seconds.insert(elapsed as u64) && self.param.reporter.shows_stats() {
            show_stats(&self.state, elapsed, ctx.branch_size, false);
        }

        if vuln_should_stop(
            &self.state.fuzz_stat,
            self.state.remaining_energy(),
            elapsed,
            self.param.duration,
        ) {
            if self.param.reporter.shows_stats() {
                show_stats(&self.state, elapsed, ctx.branch_size, false);
            }
            if self.param.reporter.writes_json() {
                write_stats(
                    &self.work_dir,
                    &self.state,
                    ctx.contract,
                    elapsed,
                    ctx.coverage,
                    self.param.case_num,
                    false,
                );
            }
            self.stop(&HashMap::new());
        }
    }

    fn pre_fuzz<E, A, B>(
        &mut self,
        executor: &mut E,
        abi: &mut A,
        branches: &B,
        dicts: &Dicts,
    ) -> Result<()>
    where
        E: TargetExecutor,
        A: AbiCodec,
        B: BranchProvider,
    {
        let contract = self.main_contract()?.clone();
        self.state.contract_stem = contract.file_stem();
        let regions = ValidRegions::coverage(branches.find_valid_jumpis());
        let branch_size = regions.branch_size();
        let snippets = branches.snippets().clone();
        let bin_runtime = contract.bin_runtime.clone();
        if branch_size == 0 {
            info!("no valid jumpi");
            self.stop(&snippets);
        }

        let ctx = PreFuzzCtx {
            regions: &regions,
            branch_size,
            bin_runtime: &bin_runtime,
            snippets: &snippets,
            contract: &contract,
        };

        // one seed execution fixes the canonical testcase length
        let seed_case = abi.random_testcase();
        let elapsed = self.timer.elapsed();
        let first = save_if_interest(
            &mut self.state,
            executor,
            abi,
            seed_case,
            0,
            &regions,
            elapsed,
        );
        self.state.data0_len = first.data.len();

        if self.state.leaders.is_empty() {
            // jumpis exist in the bytecode but none is reachable in runtime
            info!("no branch");
            self.stop(&snippets);
        }
        if self.state.uncovered_branches() == 0 {
            show_stats(&self.state, self.timer.elapsed(), branch_size, true);
            self.stop(&snippets);
        }

        let mut origin_hit_count = self.state.leaders.len();
        loop {
            let branch = self.state.queues[self.state.fuzz_stat.idx].clone();
            let (cur_item, comparison_value) = {
                let leader = &self.state.leaders[&branch];
                (leader.item.clone(), leader.comparison_value)
            };

            if !comparison_value.is_zero() {
                debug!(
                    branch = %branch,
                    comparison = %comparison_value,
                    fuzzed = cur_item.fuzzed_count,
                    "leader"
                );
                let mutation_seed = self.state.rand_mut().next();
                let mut mutation = Mutation::new(
                    cur_item.clone(),
                    dicts,
                    self.param.mode == 1,
                    mutation_seed,
                    self.state.max_size,
                );
                let depth = cur_item.depth;

                if cur_item.fuzzed_count == 0 {
                    prefuzz_stage!(self, executor, abi, ctx, depth,
                        mutation.single_walking_bit, MutationStage::Flip1, origin_hit_count);
                    prefuzz_stage!(self, executor, abi, ctx, depth,
                        mutation.single_walking_byte, MutationStage::Flip8, origin_hit_count);
                    prefuzz_stage!(self, executor, abi, ctx, depth,
                        mutation.two_walking_bit, MutationStage::Flip2, origin_hit_count);
                    prefuzz_stage!(self, executor, abi, ctx, depth,
                        mutation.four_walking_bit, MutationStage::Flip4, origin_hit_count);
                    prefuzz_stage!(self, executor, abi, ctx, depth,
                        mutation.two_walking_byte, MutationStage::Flip16, origin_hit_count);
                    prefuzz_stage!(self, executor, abi, ctx, depth,
                        mutation.four_walking_byte, MutationStage::Flip32, origin_hit_count);
                    prefuzz_stage!(self, executor, abi, ctx, depth,
                        mutation.overwrite_with_address_dictionary, MutationStage::ExtrasAo,
                        origin_hit_count);
                    prefuzz_stage!(self, executor, abi, ctx, depth,
                        mutation.havoc, MutationStage::Havoc, origin_hit_count);
                } else {
                    prefuzz_stage!(self, executor, abi, ctx, depth,
                        mutation.single_walking_byte, MutationStage::Flip8, origin_hit_count);
                    prefuzz_stage!(self, executor, abi, ctx, depth,
                        mutation.havoc, MutationStage::Havoc, origin_hit_count);

                    let items: Vec<FuzzItem> = self
                        .state
                        .leaders
                        .values()
                        .map(|leader| leader.item.clone())
                        .collect();

                    if mutation.splice(&items) {
                        prefuzz_stage!(self, executor, abi, ctx, depth,
                            mutation.havoc, MutationStage::Splice, origin_hit_count);
                    }

                    // revisit paths gated on state set up by other leaders
                    let prolonged = {
                        let mut saver = PreFuzzSaver {
                            fuzzer: &mut *self,
                            executor: &mut *executor,
                            abi: &*abi,
                            ctx: &ctx,
                            depth,
                        };
                        mutation.prolongate(&items, &*abi, &mut saver)
                    };
                    if prolonged {
                        self.note_stage_finds(MutationStage::Prolongation, &mut origin_hit_count);
                    }
                }
            }

            if let Some(leader) = self.state.leaders.get_mut(&branch) {
                leader.item.fuzzed_count += 1;
            }
            QueueScheduler::advance(&mut self.state, &branch, branch_size);
        }
    }

    fn vuln_fuzz<E, A, B>(
        &mut self,
        executor: &mut E,
        abi: &mut A,
        branches: &B,
        dicts: &Dicts,
    ) -> Result<()>
    where
        E: TargetExecutor,
        A: AbiCodec,
        B: BranchProvider,
    {
        let contract = self.main_contract()?.clone();
        self.state.contract_stem = contract.file_stem();
        let regions = ValidRegions::with_oracles(branches);
        let mut branch_size = regions.branch_size();

        let coverage = read_weight(&self.work_dir, &mut self.state, &contract.file_stem())?;

        if branch_size == 0 || self.state.energies.is_empty() {
            // no weighted branch survived pre-fuzz: synthesize one
            branch_size = 1;
            self.state.energies.push(EnergyRecord {
                branch_id: SYNTHETIC_BRANCH.to_string(),
                weight: SYNTHETIC_BRANCH_WEIGHT,
            });
            let seed_case = abi.random_testcase();
            let item = save_if_interest_energy(
                &mut self.state,
                executor,
                abi,
                seed_case,
                "",
                0,
                &regions,
            );
            self.state
                .leaders
                .insert(SYNTHETIC_BRANCH.to_string(), Leader::new(item, U256::zero()));
        } else {
            read_leaders(&self.work_dir, &mut self.state, &contract.file_stem())?;
        }

        let ctx = VulnCtx {
            regions: &regions,
            branch_size,
            coverage,
            contract: &contract,
        };

        let mut energy_idx = EnergyScheduler::pick(&self.state.energies).unwrap_or(0);
        if let Some(resident) = EnergyScheduler::next_resident(&self.state, energy_idx) {
            energy_idx = resident;
        }
        self.state.data0_len = self
            .state
            .leaders
            .get(&self.state.energies[energy_idx].branch_id)
            .map(|leader| leader.item.data.len())
            .unwrap_or(0);

        let mut origin_hit_count = self.state.leaders.len();
        let mut fuzz_num: u64 = 0;
        loop {
            let Some(resident) = EnergyScheduler::next_resident(&self.state, energy_idx) else {
                // persisted weights reference only branches never
                // re-discovered this run
                warn!("no resident leader for any weighted branch");
                if self.param.reporter.writes_json() {
                    write_stats(
                        &self.work_dir,
                        &self.state,
                        &contract,
                        self.timer.elapsed(),
                        coverage,
                        self.param.case_num,
                        false,
                    );
                }
                self.stop(&HashMap::new());
            };
            energy_idx = resident;
            let branch = self.state.energies[energy_idx].branch_id.clone();
            let cur_item = self.state.leaders[&branch].item.clone();
            debug!(
                branch = %branch,
                energy = self.state.energies[energy_idx].weight,
                fuzzed = cur_item.fuzzed_count,
                "leader"
            );

            let mutation_seed = self.state.rand_mut().next();
            let mut mutation = Mutation::new(
                cur_item.clone(),
                dicts,
                self.param.mode == 1,
                mutation_seed,
                self.state.max_size,
            );
            let fuzzed = cur_item.fuzzed_count;

            if cur_item.fuzzed_count == 0 {
                vuln_stage!(self, executor, abi, ctx, &branch, fuzzed,
                    mutation.single_walking_byte, MutationStage::Flip8, origin_hit_count);
                vuln_stage!(self, executor, abi, ctx, &branch, fuzzed,
                    mutation.two_walking_byte, MutationStage::Flip16, origin_hit_count);
                vuln_stage!(self, executor, abi, ctx, &branch, fuzzed,
                    mutation.four_walking_byte, MutationStage::Flip32, origin_hit_count);
                vuln_stage!(self, executor, abi, ctx, &branch, fuzzed,
                    mutation.single_interest, MutationStage::Interest8, origin_hit_count);
                vuln_stage!(self, executor, abi, ctx, &branch, fuzzed,
                    mutation.two_interest, MutationStage::Interest16, origin_hit_count);
                vuln_stage!(self, executor, abi, ctx, &branch, fuzzed,
                    mutation.four_interest, MutationStage::Interest32, origin_hit_count);
                vuln_stage!(self, executor, abi, ctx, &branch, fuzzed,
                    mutation.single_arith, MutationStage::Arith8, origin_hit_count);
                vuln_stage!(self, executor, abi, ctx, &branch, fuzzed,
                    mutation.two_arith, MutationStage::Arith16, origin_hit_count);
                vuln_stage!(self, executor, abi, ctx, &branch, fuzzed,
                    mutation.four_arith, MutationStage::Arith32, origin_hit_count);
                vuln_stage!(self, executor, abi, ctx, &branch, fuzzed,
                    mutation.overwrite_with_address_dictionary, MutationStage::ExtrasAo,
                    origin_hit_count);
                vuln_stage!(self, executor, abi, ctx, &branch, fuzzed,
                    mutation.havoc, MutationStage::Havoc, origin_hit_count);
            } else {
                vuln_stage!(self, executor, abi, ctx, &branch, fuzzed,
                    mutation.single_walking_byte, MutationStage::Flip8, origin_hit_count);
                vuln_stage!(self, executor, abi, ctx, &branch, fuzzed,
                    mutation.havoc, MutationStage::Havoc, origin_hit_count);

                let items: Vec<FuzzItem> = self
                    .state
                    .leaders
                    .values()
                    .map(|leader| leader.item.clone())
                    .collect();
                let prolonged = {
                    let mut saver = VulnSaver {
                        fuzzer: &mut *self,
                        executor: &mut *executor,
                        abi: &*abi,
                        ctx: &ctx,
                        branch: &branch,
                        fuzzed_count: fuzzed,
                    };
                    mutation.prolongate(&items, &*abi, &mut saver)
                };
                if prolonged {
                    self.note_stage_finds(MutationStage::Prolongation, &mut origin_hit_count);
                }
            }

            if let Some(leader) = self.state.leaders.get_mut(&branch) {
                leader.item.fuzzed_count += 1;
            }
            energy_idx = EnergyScheduler::pick(&self.state.energies).unwrap_or(energy_idx);
            fuzz_num += 1;
            if fuzz_num % self.state.energies.len() as u64 == 1 {
                self.state.fuzz_stat.queue_cycle += 1;
            }
        }
    }

    /// Final snapshot, then process exit. There is no state to flush beyond
    /// the reports already written.
    fn stop(&self, snippets: &HashMap<u64, String>) -> ! {
        if self.param.is_prefuzz {
            let mut covered_sides: HashMap<u64, u64> = HashMap::new();
            for (branch, leader) in &self.state.leaders {
                if leader.is_covered() {
                    if let Some(pc) = branch_pc(branch) {
                        *covered_sides.entry(pc).or_insert(0) += 1;
                    }
                }
            }
            for (pc, snippet) in snippets.iter().sorted_by_key(|(pc, _)| *pc) {
                match covered_sides.get(pc) {
                    None => info!(pc = *pc, reach = "unreachable", "{}", snippet),
                    Some(1) => info!(pc = *pc, reach = "half", "{}", snippet),
                    Some(_) => info!(pc = *pc, reach = "full", "{}", snippet),
                }
            }
        } else {
            for (branch, leader) in self.state.leaders.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
                debug!(
                    branch = %branch,
                    best_hits = %leader.comparison_value,
                    total_hits = self.state.branch_hits.get(branch).copied().unwrap_or(0),
                    "final branch totals"
                );
            }
        }
        exit(1);
    }
}
