//! Builds an index over a small generated column and runs a few lookups.
//!
//! Run with: cargo run --example build_and_query

use cuckoo_stripe::{Column, CuckooAlgorithm, CuckooIndex, CuckooIndexConfig, IntColumn};

fn main() {
    // 100k rows with 1000 distinct values in runs of 100 rows each.
    let data: Vec<i32> = (0..100_000).map(|i| i / 100).collect();
    let column = IntColumn::new("demo", data);
    let num_rows_per_stripe = 1000;

    let config = CuckooIndexConfig {
        algorithm: CuckooAlgorithm::SkewedKicking,
        scan_rate: 0.01,
        ..CuckooIndexConfig::default()
    };
    let index =
        CuckooIndex::build(&column, num_rows_per_stripe, &config).expect("index should build");

    println!(
        "built index over {} rows / {} stripes: {} bytes ({} bytes compressed)",
        column.len(),
        index.num_stripes(),
        index.byte_size(),
        index.compressed_byte_size()
    );

    // Positive lookups are exact.
    for value in [0, 499, 999] {
        let stripes = index.qualifying_stripes(value);
        println!(
            "value {:4} -> stripes {:?}",
            value,
            stripes.true_bit_indices()
        );
    }

    // Negative lookups only rarely qualify any stripe at all.
    let mut false_positive_stripes = 0;
    let lookups = 10_000;
    for value in 1000..1000 + lookups {
        false_positive_stripes += index.qualifying_stripes(value).ones_count();
    }
    println!(
        "scan rate of {} negative lookups: {:.5}",
        lookups,
        false_positive_stripes as f64 / (lookups as usize * index.num_stripes()) as f64
    );
}
