//! Issue buffer flush law
//!
//! The callback must fire exactly when the buffered count reaches SIZE or
//! when FILLUP_ATTEMPTS pushes arrive without reaching it.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::issue;
use gridscan::grid::issues::{Issue, IssueBuffer};

fn batch(prefix: &str, count: usize) -> Vec<Issue> {
    (0..count)
        .map(|i| issue(&format!("{prefix}-{i}")))
        .collect()
}

fn counted_buffer() -> (IssueBuffer, Arc<AtomicUsize>, Arc<Mutex<Vec<usize>>>) {
    let flushes = Arc::new(AtomicUsize::new(0));
    let sizes = Arc::new(Mutex::new(Vec::new()));

    let mut buffer = IssueBuffer::new();
    let flush_counter = flushes.clone();
    let flush_sizes = sizes.clone();
    buffer.on_flush(Box::new(move |issues| {
        flush_counter.fetch_add(1, Ordering::SeqCst);
        flush_sizes.lock().unwrap().push(issues.len());
    }));

    (buffer, flushes, sizes)
}

#[test]
fn test_ten_small_batches_then_one_large_batch() {
    let (mut buffer, flushes, sizes) = counted_buffer();

    // 10 batches of 9: the 10th push trips the attempt threshold at 90.
    for i in 0..9 {
        assert!(buffer.push(batch(&format!("b{i}"), 9)).is_none());
        assert_eq!(flushes.load(Ordering::SeqCst), 0);
    }
    let flushed = buffer.push(batch("b9", 9)).expect("attempt flush");
    assert_eq!(flushed.len(), 90);
    assert_eq!(flushes.load(Ordering::SeqCst), 1);

    // A single batch of 100 flushes immediately on size.
    let flushed = buffer.push(batch("big", 100)).expect("size flush");
    assert_eq!(flushed.len(), 100);
    assert_eq!(flushes.load(Ordering::SeqCst), 2);

    assert_eq!(*sizes.lock().unwrap(), vec![90, 100]);
    assert!(buffer.is_empty());
}

#[test]
fn test_size_flush_resets_attempt_counter() {
    let (mut buffer, flushes, _) = counted_buffer();

    // 5 pushes, the 5th crossing SIZE.
    for i in 0..4 {
        buffer.push(batch(&format!("a{i}"), 20));
    }
    buffer.push(batch("a4", 20));
    assert_eq!(flushes.load(Ordering::SeqCst), 1);
    assert_eq!(buffer.attempts(), 0);

    // The attempt window starts over: 9 more small pushes stay buffered.
    for i in 0..9 {
        assert!(buffer.push(batch(&format!("c{i}"), 1)).is_none());
    }
    assert_eq!(buffer.len(), 9);

    // The 10th trips it again.
    assert!(buffer.push(batch("c9", 1)).is_some());
    assert_eq!(flushes.load(Ordering::SeqCst), 2);
}

#[test]
fn test_no_flush_below_both_thresholds() {
    let (mut buffer, flushes, _) = counted_buffer();

    for i in 0..9 {
        assert!(buffer.push(batch(&format!("q{i}"), 10)).is_none());
    }

    assert_eq!(flushes.load(Ordering::SeqCst), 0);
    assert_eq!(buffer.len(), 90);
    assert_eq!(buffer.attempts(), 9);
}

#[test]
fn test_take_bypasses_callback() {
    let (mut buffer, flushes, _) = counted_buffer();

    buffer.push(batch("t", 5));
    let drained = buffer.take();

    assert_eq!(drained.len(), 5);
    assert_eq!(flushes.load(Ordering::SeqCst), 0);
    assert_eq!(buffer.attempts(), 0);
}
