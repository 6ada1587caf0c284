use std::hint::black_box;
use std::io::{self, Cursor};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use tawk::{Avm, AwkSettings, AwkTuples, Compiler, ExtensionRegistry, Lexer, Parser};

fn compile(program: &str) -> AwkTuples {
    Compiler::default().compile_str(program).unwrap()
}

/// Run already-linked tuples, discarding output
fn execute(tuples: &AwkTuples, input: &str) -> i32 {
    let settings = AwkSettings::new()
        .input(Cursor::new(input.to_string()))
        .output(io::sink());
    Avm::new(settings, ExtensionRegistry::new())
        .interpret(tuples)
        .unwrap()
        .code
}

const COMPLEX: &str = r#"
    function factorial(n) {
        if (n <= 1) return 1
        return n * factorial(n - 1)
    }
    BEGIN {
        FS = ":"
        for (i = 1; i <= 10; i++) print i, factorial(i)
    }
    /pattern/ {
        for (i = 1; i <= NF; i++) {
            if ($i ~ /[0-9]+/) {
                sum += $i
                count++
            }
        }
    }
    /start/,/stop/ { seen[$1]++ }
    END {
        if (count > 0) printf "Average: %.2f\n", sum / count
        for (k in seen) print k, seen[k]
    }
"#;

// ============ Compile Pipeline Benchmarks ============

fn bench_lexer(c: &mut Criterion) {
    let mut group = c.benchmark_group("lexer");

    let simple = r#"BEGIN { print "hello" }"#;
    group.bench_function("simple_program", |b| {
        b.iter(|| Lexer::new(black_box(simple)).tokenize().unwrap())
    });
    group.bench_function("complex_program", |b| {
        b.iter(|| Lexer::new(black_box(COMPLEX)).tokenize().unwrap())
    });

    group.finish();
}

fn bench_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser");

    let tokens = Lexer::new(COMPLEX).tokenize().unwrap();
    group.bench_function("parse_program", |b| {
        b.iter(|| Parser::new(black_box(tokens.clone())).parse().unwrap())
    });

    group.finish();
}

fn bench_compiler(c: &mut Criterion) {
    let mut group = c.benchmark_group("compiler");

    let compiler = Compiler::default();
    group.bench_function("compile_and_link", |b| {
        b.iter(|| compiler.compile_str(black_box(COMPLEX)).unwrap())
    });

    group.finish();
}

// ============ AVM Benchmarks ============

fn bench_avm(c: &mut Criterion) {
    let mut group = c.benchmark_group("avm");

    let arithmetic = compile("BEGIN { x = 0; for (i = 1; i <= 1000; i++) x += i * 2 - 1; exit x % 7 }");
    group.bench_function("arithmetic", |b| b.iter(|| execute(black_box(&arithmetic), "")));

    let concat = compile(r#"BEGIN { s = ""; for (i = 1; i <= 100; i++) s = s "x"; n = length(s) }"#);
    group.bench_function("string_concat", |b| b.iter(|| execute(black_box(&concat), "")));

    let fields = compile("{ print $1, $5, $10 }");
    let line = "field1 field2 field3 field4 field5 field6 field7 field8 field9 field10";
    group.bench_function("field_access", |b| {
        b.iter(|| execute(black_box(&fields), black_box(line)))
    });

    let pattern_input = (0..100)
        .map(|i| {
            if i % 10 == 0 {
                format!("error line {}", i)
            } else {
                format!("normal line {}", i)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    let patterns = compile("/error/ { count++ } END { print count }");
    group.bench_function("pattern_matching", |b| {
        b.iter(|| execute(black_box(&patterns), black_box(&pattern_input)))
    });

    let arrays = compile(
        "BEGIN { for (i = 1; i <= 100; i++) arr[i] = i * 2; for (k in arr) sum += arr[k]; print sum }",
    );
    group.bench_function("array_operations", |b| b.iter(|| execute(black_box(&arrays), "")));

    let recursion = compile("function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2) } BEGIN { x = fib(15) }");
    group.bench_function("function_calls", |b| b.iter(|| execute(black_box(&recursion), "")));

    let printf = compile(
        r#"BEGIN { for (i = 1; i <= 100; i++) printf "%05d: %-20s %8.2f\n", i, "test", i * 3.14 }"#,
    );
    group.bench_function("printf_formatting", |b| b.iter(|| execute(black_box(&printf), "")));

    group.finish();
}

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput");

    let tuples = compile("{ sum += $1 } END { print sum }");
    for size in [100, 1000, 10000] {
        let input: String = (0..size)
            .map(|i| format!("{} {} {} {}", i, i * 2, i * 3, i % 100))
            .collect::<Vec<_>>()
            .join("\n");

        group.throughput(Throughput::Bytes(input.len() as u64));
        group.bench_with_input(BenchmarkId::new("sum_column", size), &input, |b, input| {
            b.iter(|| execute(black_box(&tuples), black_box(input)))
        });
    }

    group.finish();
}

fn bench_builtin_functions(c: &mut Criterion) {
    let mut group = c.benchmark_group("builtins");

    let programs = [
        ("length", r#"BEGIN { s = "hello world"; for (i = 1; i <= 1000; i++) x += length(s) }"#),
        ("substr", r#"BEGIN { s = "hello world test string"; for (i = 1; i <= 1000; i++) x = substr(s, 5, 10) }"#),
        ("index", r#"BEGIN { s = "hello world test string"; for (i = 1; i <= 1000; i++) x = index(s, "test") }"#),
        ("split", r#"BEGIN { s = "a:b:c:d:e:f:g:h:i:j"; for (i = 1; i <= 100; i++) n = split(s, arr, ":") }"#),
        ("gsub", r#"BEGIN { s = "hello world hello world"; for (i = 1; i <= 100; i++) { t = s; gsub(/hello/, "hi", t) } }"#),
        ("sprintf", r#"BEGIN { for (i = 1; i <= 1000; i++) s = sprintf("%d %.2f %s", i, i * 3.14, "test") }"#),
        ("math_functions", "BEGIN { for (i = 1; i <= 1000; i++) x = sin(i) + cos(i) + sqrt(i) }"),
    ];
    for (name, program) in programs {
        let tuples = compile(program);
        group.bench_function(name, |b| b.iter(|| execute(black_box(&tuples), "")));
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_lexer,
    bench_parser,
    bench_compiler,
    bench_avm,
    bench_throughput,
    bench_builtin_functions,
);

criterion_main!(benches);
