use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sgl_codec::{CELL_PASS_RECORD_BYTES, CompressedPassStore};
use sgl_types::{CellPass, MachineId, SUBGRID_DIMENSION, Timestamp, cells_column_major};

type Grid = Vec<Vec<Vec<CellPass>>>;

fn build_grid(passes_per_cell: usize) -> Grid {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut grid = vec![vec![Vec::new(); SUBGRID_DIMENSION]; SUBGRID_DIMENSION];
    for (x, y) in cells_column_major() {
        let mut seconds = 1_700_000_000_i64;
        grid[x][y] = (0..passes_per_cell)
            .map(|_| {
                seconds += rng.gen_range(1..600);
                let mut pass = CellPass::at(Timestamp::from_seconds(seconds));
                pass.height = (f64::from(rng.gen_range(100_000..120_000)) / 1000.0) as f32;
                if rng.gen_bool(0.7) {
                    pass.ccv = rng.gen_range(0..1_500);
                }
                pass.machine_speed = rng.gen_range(0..2_000);
                pass.machine_id = MachineId(rng.gen_range(0..8));
                pass
            })
            .collect();
    }
    grid
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("compressed_encode");
    for passes_per_cell in [1_usize, 8, 32] {
        let grid = build_grid(passes_per_cell);
        let raw_bytes = passes_per_cell * SUBGRID_DIMENSION * SUBGRID_DIMENSION * CELL_PASS_RECORD_BYTES;
        group.throughput(Throughput::Bytes(u64::try_from(raw_bytes).unwrap_or(u64::MAX)));
        group.bench_with_input(
            BenchmarkId::from_parameter(passes_per_cell),
            &grid,
            |b, grid| {
                b.iter(|| {
                    let store = CompressedPassStore::encode(|x, y| grid[x][y].as_slice())
                        .expect("encode should succeed");
                    criterion::black_box(store.size_in_bytes());
                });
            },
        );
    }
    group.finish();
}

fn bench_decode_cell(c: &mut Criterion) {
    let mut group = c.benchmark_group("compressed_decode_cell");
    for passes_per_cell in [8_usize, 32] {
        let grid = build_grid(passes_per_cell);
        let store = CompressedPassStore::encode(|x, y| grid[x][y].as_slice())
            .expect("encode should succeed");
        group.bench_with_input(
            BenchmarkId::from_parameter(passes_per_cell),
            &store,
            |b, store| {
                b.iter(|| {
                    let mut decoded = 0_usize;
                    for (x, y) in cells_column_major().step_by(17) {
                        decoded += store.decode_all(x, y).expect("decode should succeed").len();
                    }
                    criterion::black_box(decoded);
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode_cell);
criterion_main!(benches);
