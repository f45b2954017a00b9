/*!
 * Stream Buffer Tests
 * Ring ordering, overwrite accounting and integrity checks
 */

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rig_kernel::stream::{IntegrityError, RecordShape, Records, StreamBuffer, StreamConfig};
use std::sync::Arc;
use std::thread;

fn record(i: usize, dim: usize) -> Vec<f64> {
    (0..dim).map(|d| (i * dim + d) as f64).collect()
}

fn ring(capacity: usize, dim: usize) -> StreamBuffer {
    StreamBuffer::new(capacity, RecordShape::flat(dim).unwrap()).unwrap()
}

proptest! {
    #[test]
    fn prop_read_returns_everything_written_in_order(
        capacity in 1usize..64,
        dim in 1usize..5,
        fill in 0usize..64,
    ) {
        let n = fill.min(capacity);
        let buffer = ring(capacity, dim);
        for i in 0..n {
            buffer.write(&record(i, dim)).unwrap();
        }

        let records = buffer.read_all().unwrap();
        let expected: Vec<Vec<f64>> = (0..n).map(|i| record(i, dim)).collect();
        prop_assert_eq!(records.to_vec(), expected);
        prop_assert_eq!(records.overwritten(), 0);
    }

    #[test]
    fn prop_overflow_keeps_newest_capacity_records(
        capacity in 1usize..32,
        dim in 1usize..4,
        extra in 1usize..100,
    ) {
        let n = capacity + extra;
        let buffer = ring(capacity, dim);
        for i in 0..n {
            buffer.write(&record(i, dim)).unwrap();
        }

        let records = buffer.read_all().unwrap();
        let expected: Vec<Vec<f64>> = (n - capacity..n).map(|i| record(i, dim)).collect();
        prop_assert_eq!(records.to_vec(), expected);
        prop_assert_eq!(records.overwritten(), extra as u64);
        prop_assert_eq!(buffer.overwritten_total(), extra as u64);
    }

    #[test]
    fn prop_read_is_destructive(capacity in 1usize..32, n in 0usize..80) {
        let buffer = ring(capacity, 2);
        for i in 0..n {
            buffer.write(&record(i, 2)).unwrap();
        }
        let _ = buffer.read_all().unwrap();

        let again = buffer.read_all().unwrap();
        prop_assert!(again.is_empty());
        prop_assert_eq!(again.overwritten(), 0);
        prop_assert_eq!(buffer.index(), 0);
    }
}

#[test]
fn test_reads_resume_after_drain() {
    let buffer = ring(4, 1);
    for i in 0..6 {
        buffer.write(&[i as f64]).unwrap();
    }
    assert_eq!(buffer.read_all().unwrap().as_flat(), &[2.0, 3.0, 4.0, 5.0]);

    buffer.write(&[6.0]).unwrap();
    buffer.write(&[7.0]).unwrap();
    assert_eq!(buffer.len(), 2);
    assert_eq!(buffer.read_all().unwrap().as_flat(), &[6.0, 7.0]);
    assert_eq!(buffer.overwritten_total(), 2);
}

#[test]
fn test_wrong_record_width_rejected() {
    let buffer = ring(8, 3);
    buffer.write(&[1.0, 2.0, 3.0]).unwrap();

    let err = buffer.write(&[1.0, 2.0, 3.0, 4.0]).unwrap_err();
    assert_eq!(err, IntegrityError::DimensionMismatch { expected: 3, actual: 4 });

    // Nothing from the bad record landed
    assert_eq!(buffer.index(), 1);
}

#[test]
fn test_ragged_region_rejected_whole() {
    let buffer = ring(8, 3);
    let err = buffer.extend(&[0.0; 7]).unwrap_err();
    assert_eq!(err, IntegrityError::RaggedRegion { len: 7, dim: 3 });
    assert!(buffer.is_empty());

    buffer.extend(&[0.0; 6]).unwrap();
    assert_eq!(buffer.len(), 2);
}

#[test]
fn test_records_refuse_partial_record() {
    let shape = RecordShape::flat(3).unwrap();
    let err = Records::from_flat(shape.clone(), vec![0.0; 4], 0).unwrap_err();
    assert_eq!(err, IntegrityError::RaggedRegion { len: 4, dim: 3 });

    let records = Records::from_flat(shape, vec![0.0; 6], 0).unwrap();
    assert_eq!(records.len(), 2);
}

#[test]
fn test_zero_capacity_rejected() {
    assert!(StreamBuffer::new(0, RecordShape::flat(2).unwrap()).is_err());
}

#[test]
fn test_motion_records_are_markers_by_axes() {
    let config = StreamConfig::motion(2).with_buffer_seconds(1);
    let buffer = StreamBuffer::from_config(&config).unwrap();
    assert_eq!(buffer.capacity(), 480);

    let sample: Vec<f64> = (0..6).map(f64::from).collect();
    buffer.write(&sample).unwrap();
    let records = buffer.read_all().unwrap();
    assert_eq!(records.shape().dims(), &[2, 3]);
    assert_eq!(records.get(0), Some(sample.as_slice()));
}

#[test]
fn test_filter_by_retain() {
    let buffer = ring(16, 1);
    for i in 0..10 {
        buffer.write(&[i as f64]).unwrap();
    }
    let even = buffer.read_all().unwrap().retain(|r| r[0] % 2.0 == 0.0);
    assert_eq!(even.as_flat(), &[0.0, 2.0, 4.0, 6.0, 8.0]);
}

#[test]
fn test_concurrent_writer_and_reader_lose_nothing_unaccounted() {
    const TOTAL: usize = 20_000;
    let buffer = Arc::new(ring(64, 2));

    let writer = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || {
            for i in 0..TOTAL {
                buffer.write(&[i as f64, -(i as f64)]).unwrap();
            }
        })
    };

    let mut seen = 0u64;
    let mut last = -1.0;
    while !writer.is_finished() {
        let records = buffer.read_all().unwrap();
        for r in &records {
            // Each read is chronological and never repeats an earlier record
            assert!(r[0] > last);
            assert_eq!(r[1], -r[0]);
            last = r[0];
        }
        seen += records.len() as u64 + records.overwritten();
    }
    writer.join().unwrap();
    let records = buffer.read_all().unwrap();
    seen += records.len() as u64 + records.overwritten();

    assert_eq!(seen, TOTAL as u64);
}
