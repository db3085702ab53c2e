use bsscr::config::MgOptions;
use bsscr::preconditioner::{Amg, Jacobi, Preconditioner};
use bsscr::solver::{LinearSolver, PcgSolver};
use bsscr::{BlockOperator, BsscrOptions, BsscrSolver, CsrMatrix, KspOptions, PcType, SchurPcType, StokesSystem};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn laplacian_2d(m: usize) -> CsrMatrix {
    let idx = |i: usize, j: usize| i * m + j;
    let mut t = Vec::new();
    for i in 0..m {
        for j in 0..m {
            t.push((idx(i, j), idx(i, j), 4.0));
            if i > 0 {
                t.push((idx(i, j), idx(i - 1, j), -1.0));
            }
            if i + 1 < m {
                t.push((idx(i, j), idx(i + 1, j), -1.0));
            }
            if j > 0 {
                t.push((idx(i, j), idx(i, j - 1), -1.0));
            }
            if j + 1 < m {
                t.push((idx(i, j), idx(i, j + 1), -1.0));
            }
        }
    }
    CsrMatrix::from_triplets(m * m, m * m, &t).unwrap()
}

/// Forward differences between consecutive velocity dofs, one column per pair.
fn difference_coupling(n: usize, stride: usize) -> CsrMatrix {
    let cols = n / stride - 1;
    let mut t = Vec::new();
    for j in 0..cols {
        t.push((j * stride, j, 1.0));
        t.push(((j + 1) * stride, j, -1.0));
    }
    CsrMatrix::from_triplets(n, cols, &t).unwrap()
}

fn bench_velocity_preconditioners(c: &mut Criterion) {
    let a = laplacian_2d(48);
    let n = a.nrows();
    let b: Vec<f64> = (0..n).map(|i| (i as f64).sin()).collect();

    let mut jacobi = Jacobi::new();
    jacobi.setup(&a).unwrap();
    c.bench_function("pcg jacobi", |ben| {
        ben.iter(|| {
            let mut x = vec![0.0; n];
            PcgSolver::new(1e-8, 2000).solve(black_box(&a), Some(&jacobi), black_box(&b), &mut x).unwrap()
        })
    });

    let mut amg = Amg::new(MgOptions::default());
    amg.setup(&a).unwrap();
    c.bench_function("pcg amg", |ben| {
        ben.iter(|| {
            let mut x = vec![0.0; n];
            PcgSolver::new(1e-8, 2000).solve(black_box(&a), Some(&amg), black_box(&b), &mut x).unwrap()
        })
    });

    c.bench_function("amg setup", |ben| {
        ben.iter(|| {
            let mut amg = Amg::new(MgOptions::default());
            amg.setup(black_box(&a)).unwrap();
            amg
        })
    });
}

fn bench_bsscr(c: &mut Criterion) {
    let k = laplacian_2d(24);
    let n = k.nrows();
    let g = difference_coupling(n, 8);
    let m = g.ncols();
    let op = BlockOperator::with_transposed_coupling(k, g, None);
    let f: Vec<f64> = (0..n).map(|i| (i as f64 * 0.1).cos()).collect();
    let h = vec![0.0; m];
    let system = StokesSystem::new(op, f, h);

    for (name, pc) in [("bsscr jacobi velocity", PcType::Jacobi), ("bsscr amg velocity", PcType::Multigrid)] {
        let opts = BsscrOptions::default()
            .with_velocity(KspOptions::cg(1e-10, 2000).with_pc(pc))
            .with_outer(KspOptions::cg(1e-8, 500))
            .with_schur_pc(SchurPcType::None)
            .with_summary(false);
        let solver = BsscrSolver::new(opts);
        c.bench_function(name, |ben| ben.iter(|| solver.solve(black_box(&system)).unwrap()));
    }
}

criterion_group!(benches, bench_velocity_preconditioners, bench_bsscr);
criterion_main!(benches);
