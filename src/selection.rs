//! Replacement selection run generator.
//!
//! The heap is a plain array split into two regions: `[0, active)` holds the min-heap of
//! values that may still join the current run, `[active, len)` holds values frozen for the
//! next run because they sort before the last value emitted. Frozen slots are carried over
//! and seed the following pass.

use std::cmp::Ordering;
use std::mem;

use crate::buffer::EntryBuffer;
use crate::chunk::RunSink;
use crate::sort::SortStats;
use crate::{Cancellation, SortError};

/// Restores the heap property of `heap[..size]` below `root`.
pub fn sift_down<T, F>(heap: &mut [T], mut root: usize, size: usize, compare: &F)
where
    F: Fn(&T, &T) -> Ordering,
{
    loop {
        let left = 2 * root + 1;
        if left >= size {
            return;
        }

        let right = left + 1;
        let child = if right < size && compare(&heap[right], &heap[left]) == Ordering::Less {
            right
        } else {
            left
        };

        if compare(&heap[child], &heap[root]) != Ordering::Less {
            return;
        }

        heap.swap(root, child);
        root = child;
    }
}

/// Builds a min-heap over `heap[..size]` bottom-up.
pub fn heapify<T, F>(heap: &mut [T], size: usize, compare: &F)
where
    F: Fn(&T, &T) -> Ordering,
{
    for root in (0..size / 2).rev() {
        sift_down(heap, root, size, compare);
    }
}

/// Splits `input` into sorted runs of at most `capacity` items and stores them in `sink`.
///
/// At most `capacity` items are held in the heap at any time.
pub fn run_replacement_selection<T, I, S, F>(
    input: I,
    capacity: usize,
    sink: &mut S,
    compare: F,
    cancellation: &Cancellation,
) -> Result<SortStats, SortError>
where
    I: IntoIterator<Item = Result<T, SortError>>,
    S: RunSink<T> + ?Sized,
    F: Fn(&T, &T) -> Ordering,
{
    if capacity == 0 {
        return Err(SortError::Capacity("run capacity must hold at least one entry".into()));
    }

    let mut input = input.into_iter();
    let mut exhausted = false;
    let mut heap: Vec<T> = Vec::with_capacity(capacity);
    let mut run = EntryBuffer::with_capacity(capacity);
    let mut stats = SortStats::default();

    loop {
        cancellation.check()?;

        while heap.len() < capacity && !exhausted {
            match input.next() {
                Some(item) => heap.push(item?),
                None => exhausted = true,
            }
        }

        if heap.is_empty() {
            break;
        }

        let mut active = heap.len();
        heapify(&mut heap, active, &compare);

        while active > 0 && !run.is_full() {
            cancellation.check()?;

            let next = if exhausted {
                None
            } else {
                match input.next() {
                    Some(item) => Some(item?),
                    None => {
                        exhausted = true;
                        None
                    }
                }
            };

            let root = match next {
                Some(item) if compare(&item, &heap[0]) != Ordering::Less => mem::replace(&mut heap[0], item),
                Some(item) => {
                    let root = mem::replace(&mut heap[0], item);
                    heap.swap(0, active - 1);
                    active -= 1;
                    root
                }
                None => {
                    heap.swap(0, active - 1);
                    active -= 1;
                    // the last frozen slot, if any, takes the place of the removed one
                    heap.swap_remove(active)
                }
            };

            sift_down(&mut heap, 0, active, &compare);
            run.push(root);
        }

        cancellation.check()?;
        sink.store_run(run.as_slice())?;

        stats.runs += 1;
        stats.entries += run.len() as u64;
        log::debug!("run {} stored ({} entries, {} carried over)", stats.runs, run.len(), heap.len());
        run.clear();
    }

    return Ok(stats);
}
