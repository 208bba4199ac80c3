use criterion::{criterion_group, criterion_main, Criterion};
use std::io::Write;

use mboximport::parser::mbox::MboxFile;

/// Build a synthetic mbox with `n` small messages.
fn synthetic_mbox(n: usize) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for i in 0..n {
        write!(
            file,
            "From exporter@local Thu Jan 01 00:00:00 2024\n\
             Subject: message {i}\n\
             Message-ID: <bench-{i}@example.com>\n\
             \n\
             A short body with a >From escaped line.\n\
             \n"
        )
        .unwrap();
    }
    file.flush().unwrap();
    file
}

fn bench_split_messages(c: &mut Criterion) {
    let fixture = synthetic_mbox(1000);

    c.bench_function("split_1000_messages", |b| {
        b.iter(|| {
            let mbox = MboxFile::open(fixture.path()).unwrap();
            let mut count = 0u64;
            for record in mbox.messages().unwrap() {
                record.unwrap();
                count += 1;
            }
            count
        })
    });
}

fn bench_count_messages(c: &mut Criterion) {
    let fixture = synthetic_mbox(1000);

    c.bench_function("count_1000_messages", |b| {
        b.iter(|| MboxFile::open(fixture.path()).unwrap().count().unwrap())
    });
}

criterion_group!(benches, bench_split_messages, bench_count_messages);
criterion_main!(benches);
