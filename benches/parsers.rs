use criterion::{black_box, criterion_group, criterion_main, Criterion};
use qgate::diagnostics::summarize_errors;
use qgate::parsers::{generic_fallback, parse_output, Tool};

fn synthetic_tsc(lines: usize) -> String {
    let mut out = String::with_capacity(lines * 96);
    for i in 0..lines {
        out.push_str(&format!(
            "src/feature_{:03}/file_{:05}.ts({},{}): error TS2322: Type 'string' is not assignable to type 'number'.\n",
            i % 120,
            i,
            i % 400 + 1,
            i % 80 + 1
        ));
    }
    out
}

fn synthetic_mypy_json(lines: usize) -> String {
    let mut out = String::with_capacity(lines * 160);
    for i in 0..lines {
        out.push_str(&format!(
            "{{\"file\": \"pkg/mod_{:04}.py\", \"line\": {}, \"column\": 4, \"message\": \"Incompatible return value type\", \"hint\": null, \"code\": \"return-value\", \"severity\": \"error\"}}\n",
            i,
            i % 300 + 1
        ));
    }
    out
}

fn synthetic_pytest(failures: usize) -> String {
    let mut out = String::from("============================= test session starts ==============================\n");
    for i in 0..failures {
        out.push_str(&format!("tests/test_mod_{:04}.py:{}: AssertionError\n", i, i % 90 + 10));
    }
    out.push_str("=========================== short test summary info ============================\n");
    for i in 0..failures {
        out.push_str(&format!(
            "FAILED tests/test_mod_{:04}.py::test_case_{} - assert 1 == 2\n",
            i, i
        ));
    }
    out.push_str(&format!("{} failed in 3.21s\n", failures));
    out
}

fn bench_parsers(c: &mut Criterion) {
    let tsc = synthetic_tsc(5_000);
    c.bench_function("parse_tsc_5k", |b| {
        b.iter(|| black_box(parse_output(&[Tool::Tsc], black_box(&tsc))).len());
    });

    let mypy = synthetic_mypy_json(5_000);
    c.bench_function("parse_mypy_json_5k", |b| {
        b.iter(|| black_box(parse_output(&[Tool::Mypy, Tool::Pyright], black_box(&mypy))).len());
    });

    let pytest = synthetic_pytest(1_000);
    c.bench_function("parse_pytest_1k", |b| {
        b.iter(|| black_box(parse_output(&[Tool::Pytest], black_box(&pytest))).len());
    });

    let noise = "warning: something odd\nbuild step failed\n".repeat(2_000);
    c.bench_function("generic_fallback_4k_lines", |b| {
        b.iter(|| black_box(generic_fallback(black_box(&noise))).len());
    });
}

fn bench_summary(c: &mut Criterion) {
    let errors = parse_output(&[Tool::Tsc], &synthetic_tsc(5_000));
    c.bench_function("summarize_errors_5k", |b| {
        b.iter(|| black_box(summarize_errors(black_box(&errors), 10)).len());
    });
}

criterion_group!(benches, bench_parsers, bench_summary);
criterion_main!(benches);
