use criterion::{Criterion, criterion_group, criterion_main};
use docvault::embeddings::{Chunker, ChunkingConfig};
use docvault::loader::{Provenance, TextUnit};
use std::hint::black_box;
use std::path::Path;

fn sample_text() -> String {
    let paragraph = "Ownership is a set of rules that govern how a Rust program manages memory. \
                     Some languages have garbage collection that regularly looks for no-longer-used \
                     memory as the program runs; in other languages, the programmer must explicitly \
                     allocate and free the memory.\n\n";
    paragraph.repeat(400)
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let unit = TextUnit {
        text: sample_text(),
        provenance: Provenance::for_file(Path::new("ownership.txt")),
    };
    let chunker = Chunker::new(&ChunkingConfig::default()).expect("default config is valid");

    c.bench_function("chunking", |b| {
        b.iter(|| chunker.chunk_unit(black_box(&unit)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
