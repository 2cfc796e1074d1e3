use criterion::{Criterion, black_box, criterion_group, criterion_main};
use jyro::{CompileOptions, FinallyLowering, NoopTracer, compile, compile_source, options::Mode, parse::parse};

const SOURCE: &str = r#"
"""Inventory bookkeeping."""
import os.path
from collections import defaultdict

LIMIT = 1000

class Item(object):
    """A stocked item."""
    def __init__(self, name, count=0, *tags):
        self.name = name
        self.count = count
        self.__tags = list(tags)

    def restock(self, amount):
        self.count += amount
        return self.count

def totals(items, scale=1.5):
    result = {}
    for item in items:
        if item.count > LIMIT:
            continue
        try:
            result[item.name] = item.count * scale
        except KeyError as e:
            print(e)
        finally:
            scale = scale + 0.5
    return result

def make_counter(start):
    value = [start]
    def bump(step=1):
        value[0] = value[0] + step
        return value[0]
    return bump

squares = [x * x for x in range(10) if x % 2]
pairs = [(a, b) for a in "abc" for b in (1, 2, 3)]
lookup = lambda key, default=None: totals([]).get(key, default)
while LIMIT > 0:
    LIMIT = LIMIT - 100
    if LIMIT == 500:
        break
else:
    LIMIT = -1
"#;

fn bench_compile(c: &mut Criterion) {
    let tree = parse(SOURCE, "inventory.py", Mode::Exec).unwrap();
    let options = CompileOptions::default();
    let inline = CompileOptions::default().finally(FinallyLowering::Inline);

    c.bench_function("compile_tree", |b| {
        b.iter(|| black_box(compile(&tree, "inventory", Some("inventory.py"), &options).unwrap()));
    });
    c.bench_function("compile_tree_inline_finally", |b| {
        b.iter(|| black_box(compile(&tree, "inventory", Some("inventory.py"), &inline).unwrap()));
    });
    c.bench_function("parse_and_compile", |b| {
        b.iter(|| {
            let module = compile_source(SOURCE, "inventory", "inventory.py", &options, NoopTracer).unwrap();
            black_box(module.to_bytes().unwrap())
        });
    });
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
