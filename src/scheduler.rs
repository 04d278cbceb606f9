/// Branch schedulers for the two fuzz phases.
///
/// Pre-fuzz rotates through the discovery queue and jumps away when the
/// rotation would land on the branch it just processed. Vuln mode always
/// picks the branch with the most remaining energy.
use crate::corpus::EnergyRecord;
use crate::state::FuzzState;

/// Round-robin cursor over the branch queue with an anti-stall jump.
pub struct QueueScheduler;

impl QueueScheduler {
    /// Advance past `current` after one mutation round, bumping the cycle
    /// counter on wrap-around. When the rotation would hand back the same
    /// branch while other uncovered branches remain, jump to a less-fuzzed
    /// open branch instead.
    pub fn advance(state: &mut FuzzState, current: &str, branch_size: usize) {
        let len = state.leaders.len();
        if len == 0 {
            return;
        }
        state.fuzz_stat.idx = (state.fuzz_stat.idx + 1) % len;
        if state.fuzz_stat.idx == 0 {
            state.fuzz_stat.queue_cycle += 1;
        }

        let next = &state.queues[state.fuzz_stat.idx];
        if next != current || branch_size.saturating_sub(state.tracebits.len()) <= 1 {
            return;
        }
        let current_fuzzed = state
            .leaders
            .get(current)
            .map(|leader| leader.item.fuzzed_count)
            .unwrap_or(0);
        let candidate = state
            .leaders
            .iter()
            .find(|(_, leader)| {
                leader.item.fuzzed_count < current_fuzzed && !leader.comparison_value.is_zero()
            })
            .map(|(branch, _)| branch.clone());
        if let Some(branch) = candidate {
            if let Some(pos) = state.queues.iter().position(|queued| queued == &branch) {
                state.fuzz_stat.idx = pos;
            }
        }
    }
}

/// Max-weight selection over the energy vector.
pub struct EnergyScheduler;

impl EnergyScheduler {
    /// Index of the first record carrying the maximum weight.
    pub fn pick(energies: &[EnergyRecord]) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (idx, record) in energies.iter().enumerate() {
            match best {
                Some(b) if energies[b].weight >= record.weight => {}
                _ => best = Some(idx),
            }
        }
        best
    }

    /// Starting at `idx`, cyclically find a record whose branch still has a
    /// resident leader (persisted weights may reference branches never
    /// re-discovered this run).
    pub fn next_resident(state: &FuzzState, start: usize) -> Option<usize> {
        let len = state.energies.len();
        if len == 0 {
            return None;
        }
        let mut idx = start % len;
        for _ in 0..len {
            if state.leaders.contains_key(&state.energies[idx].branch_id) {
                return Some(idx);
            }
            idx = (idx + 1) % len;
        }
        None
    }
}
