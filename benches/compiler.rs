mod common;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use deriva::backend::{Backend, backends, tag_model};

fn bench_compiler(c: &mut Criterion) {
    for (name, path) in common::WORKLOADS {
        let model = common::load_model(path);

        c.bench_function(&format!("tag_{name}"), |b| {
            b.iter(|| black_box(tag_model(black_box(&model)).expect("tag")))
        });

        for backend in backends() {
            c.bench_function(&format!("prepare_{}_{name}", backend.name()), |b| {
                b.iter(|| {
                    let prepared = backend.prepare(black_box(&model)).expect("prepare");
                    black_box(prepared.program().getters.len());
                })
            });
        }
    }

    let catalog = common::catalog_model();
    c.bench_function("prepare_optimizing_catalog", |b| {
        b.iter(|| {
            let prepared = deriva::backend::Optimizing
                .prepare(black_box(&catalog))
                .expect("prepare");
            black_box(prepared.program().to_string());
        })
    });
}

criterion_group!(benches, bench_compiler);
criterion_main!(benches);
