//! Property blob codec benchmarks
//!
//! Run with: `cargo bench -p arbor-core`
//!
//! - Encoding a typical content node
//! - Full decode vs. filtered decode of a wide blob
//! - Property removal without full decode

use arbor_core::codec::{decode, decode_filtered, encode, remove_properties};
use arbor_core::{Property, PropertyType, PropertyValue};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn content_node(property_count: usize) -> Vec<Property> {
    let mut properties = vec![
        Property::primary_type("nt:unstructured"),
        Property::string("title", "A <typical> page & its title"),
        Property::boolean("published", true),
        Property::multi(
            "tags",
            PropertyType::String,
            vec![
                PropertyValue::from("news"),
                PropertyValue::from("rust"),
                PropertyValue::from("storage"),
            ],
        ),
    ];
    for i in 0..property_count {
        properties.push(Property::long(format!("field{}", i), i as i64));
    }
    properties
}

fn bench_encode(c: &mut Criterion) {
    let properties = content_node(20);
    c.bench_function("encode_24_properties", |b| {
        b.iter(|| encode(black_box(&properties)).unwrap())
    });
}

fn bench_decode(c: &mut Criterion) {
    let blob = encode(&content_node(200)).unwrap().blob;

    c.bench_function("decode_204_properties", |b| {
        b.iter(|| decode(black_box(&blob)).unwrap())
    });

    c.bench_function("decode_filtered_one_of_204", |b| {
        b.iter(|| decode_filtered(black_box(&blob), |name| name == "title").unwrap())
    });
}

fn bench_remove(c: &mut Criterion) {
    let blob = encode(&content_node(200)).unwrap().blob;
    c.bench_function("remove_two_of_204", |b| {
        b.iter(|| remove_properties(black_box(&blob), &["title", "field100"]).unwrap())
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_remove);
criterion_main!(benches);
