use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use primitive_types::U256;

use etherfuzz::abi::AbiCodec;
use etherfuzz::executor::{TargetExecutor, TraceResult, ValidRegions};
use etherfuzz::feedback::save_if_interest;
use etherfuzz::oracle::OracleAnalysis;
use etherfuzz::state::FuzzState;

/// Executor that fabricates a small rotating set of branches so the
/// interest filter exercises both the cover and the supersede paths.
struct SyntheticExecutor {
    counter: u64,
}

impl TargetExecutor for SyntheticExecutor {
    fn exec(
        &mut self,
        data: Bytes,
        _is_splice: bool,
        _regions: &ValidRegions,
        _coverage_mode: bool,
    ) -> TraceResult {
        self.counter += 1;
        let mut res = TraceResult::default();
        let pc = (data.first().copied().unwrap_or(0) as u64) % 64;
        res.tracebits.insert(format!("{}:0", pc));
        res.predicates
            .insert(format!("{}:1", pc), U256::from((self.counter % 97) + 1));
        res
    }

    fn analyze(&mut self) -> OracleAnalysis {
        OracleAnalysis::empty()
    }
}

struct RawAbi;

impl AbiCodec for RawAbi {
    fn random_testcase(&mut self) -> Vec<u8> {
        vec![0u8; 68]
    }

    fn postprocess_testdata(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }
}

fn bench_save_if_interest(c: &mut Criterion) {
    c.bench_function("save_if_interest", |b| {
        let mut state = FuzzState::new(1);
        let mut executor = SyntheticExecutor { counter: 0 };
        let regions = ValidRegions::default();
        let mut byte = 0u8;
        b.iter(|| {
            byte = byte.wrapping_add(1);
            save_if_interest(
                &mut state,
                &mut executor,
                &RawAbi,
                vec![byte; 68],
                0,
                &regions,
                0.0,
            )
        });
    });
}

criterion_group!(benches, bench_save_if_interest);
criterion_main!(benches);
