//! Binary heap merger.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::{Cancellation, SortError};

/// Chunk head tagged with the index of the chunk it came from.
struct HeapItem<T, F> {
    item: T,
    idx: usize,
    compare: F,
}

impl<T, F> Ord for HeapItem<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    // binary heap is max-heap by default so the order is reversed to get a min-heap
    fn cmp(&self, other: &Self) -> Ordering {
        (self.compare)(&self.item, &other.item)
            .then(self.idx.cmp(&other.idx))
            .reverse()
    }
}

impl<T, F> PartialOrd for HeapItem<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, F> PartialEq for HeapItem<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T, F> Eq for HeapItem<T, F> where F: Fn(&T, &T) -> Ordering {}

/// Binary heap merger implementation.
/// Merges multiple sorted inputs into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of items,
/// *n* is the number of chunks (inputs).
///
/// The merger stops after the first error or cancellation and releases every chunk as soon
/// as the merge is over, so chunk backing handles are closed before the merger is dropped.
pub struct BinaryHeapMerger<T, C, F>
where
    C: IntoIterator<Item = Result<T, SortError>>,
    F: Fn(&T, &T) -> Ordering + Copy,
{
    items: BinaryHeap<HeapItem<T, F>>,
    chunks: Vec<C::IntoIter>,
    compare: F,
    cancellation: Cancellation,
    initiated: bool,
    finished: bool,
}

impl<T, C, F> BinaryHeapMerger<T, C, F>
where
    C: IntoIterator<Item = Result<T, SortError>>,
    F: Fn(&T, &T) -> Ordering + Copy,
{
    /// Creates an instance of a binary heap merger using chunks as inputs.
    /// Chunk items should be sorted according to `compare` otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `chunks` - Chunks to be merged in a single sorted one
    /// * `compare` - Function used to compare items
    pub fn new<I>(chunks: I, compare: F) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        Self::with_cancellation(chunks, compare, Cancellation::new())
    }

    pub fn with_cancellation<I>(chunks: I, compare: F, cancellation: Cancellation) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let chunks = Vec::from_iter(chunks.into_iter().map(|c| c.into_iter()));
        let items = BinaryHeap::with_capacity(chunks.len());

        return BinaryHeapMerger {
            chunks,
            items,
            compare,
            cancellation,
            initiated: false,
            finished: false,
        };
    }

    /// Number of chunks still held by the merger.
    pub fn chunks_count(&self) -> usize {
        self.chunks.len()
    }

    fn push(&mut self, item: T, idx: usize) {
        self.items.push(HeapItem {
            item,
            idx,
            compare: self.compare,
        });
    }

    fn next_item(&mut self) -> Result<Option<T>, SortError> {
        self.cancellation.check()?;

        if !self.initiated {
            for idx in 0..self.chunks.len() {
                if let Some(item) = self.chunks[idx].next() {
                    self.push(item?, idx);
                }
            }
            self.initiated = true;
            log::debug!("merging {} chunks", self.items.len());
        }

        let head = match self.items.pop() {
            Some(head) => head,
            None => return Ok(None),
        };

        if let Some(item) = self.chunks[head.idx].next() {
            self.push(item?, head.idx);
        }

        return Ok(Some(head.item));
    }

    /// Drops all chunks and pending items.
    fn release(&mut self) {
        self.finished = true;
        self.items.clear();
        self.chunks.clear();
    }
}

impl<T, C, F> Iterator for BinaryHeapMerger<T, C, F>
where
    C: IntoIterator<Item = Result<T, SortError>>,
    F: Fn(&T, &T) -> Ordering + Copy,
{
    type Item = Result<T, SortError>;

    /// Returns the next item from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.next_item() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.release();
                None
            }
            Err(err) => {
                self.release();
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use rand::Rng;
    use rstest::*;

    use super::BinaryHeapMerger;
    use crate::{compare_entries, Cancellation, Entry, SortError};

    fn test_error() -> SortError {
        SortError::Format("test error".into())
    }

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![]
        ],
        vec![],
    )]
    #[case(
        vec![
            vec![Ok(4), Ok(5), Ok(7)],
            vec![Ok(1), Ok(6)],
            vec![Ok(3)],
            vec![],
        ],
        vec![Ok(1), Ok(3), Ok(4), Ok(5), Ok(6), Ok(7)],
    )]
    #[case(
        vec![
            vec![Result::Err(test_error())]
        ],
        vec![
            Result::Err(test_error())
        ],
    )]
    #[case(
        vec![
            vec![Ok(3), Result::Err(test_error()), Ok(4)],
            vec![Ok(1), Ok(2)],
        ],
        vec![
            Ok(1),
            Ok(2),
            Result::Err(test_error()),
        ],
    )]
    fn test_merger(
        #[case] chunks: Vec<Vec<Result<i32, SortError>>>,
        #[case] expected_result: Vec<Result<i32, SortError>>,
    ) {
        let merger = BinaryHeapMerger::new(chunks, i32::cmp);
        let actual_result: Vec<Result<i32, SortError>> = merger.collect();
        assert!(
            compare_vectors_of_result(&actual_result, &expected_result),
            "actual={:?}, expected={:?}",
            actual_result,
            expected_result
        );
    }

    #[test]
    fn test_merge_case_folded_entries() {
        let entry = |line: &str| Entry::from_bytes(line.as_bytes()).unwrap();
        let chunks = vec![
            vec![Ok(entry("1. Apple")), Ok(entry("3. Banana"))],
            vec![Ok(entry("2. apple")), Ok(entry("4. Cherry"))],
        ];

        let merged: Vec<Entry> = BinaryHeapMerger::new(chunks, compare_entries)
            .collect::<Result<_, _>>()
            .unwrap();

        let mut apples: Vec<u32> = merged[..2].iter().map(Entry::number).collect();
        apples.sort();
        assert_eq!(apples, vec![1, 2]);
        assert!(merged[..2].iter().all(|entry| entry.phrase().eq_ignore_ascii_case(b"apple")));
        assert_eq!(merged[2], entry("3. Banana"));
        assert_eq!(merged[3], entry("4. Cherry"));
    }

    #[test]
    fn test_merge_random_partition() {
        let mut rng = rand::thread_rng();
        let mut sorted: Vec<i32> = (0..500).map(|_| rng.gen_range(0..100)).collect();
        sorted.sort();

        let mut chunks: Vec<Vec<Result<i32, SortError>>> = (0..rng.gen_range(1..20)).map(|_| Vec::new()).collect();
        for item in &sorted {
            let idx = rng.gen_range(0..chunks.len());
            chunks[idx].push(Ok(*item));
        }

        let merged: Vec<i32> = BinaryHeapMerger::new(chunks, i32::cmp)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(merged, sorted);
    }

    #[test]
    fn test_merge_cancellation_releases_chunks() {
        let cancellation = Cancellation::new();
        let chunks = vec![vec![Ok(1), Ok(3)], vec![Ok(2)]];
        let mut merger = BinaryHeapMerger::with_cancellation(chunks, i32::cmp, cancellation.clone());

        assert_eq!(merger.next().unwrap().unwrap(), 1);
        cancellation.cancel();

        assert!(merger.next().unwrap().unwrap_err().is_cancelled());
        assert!(merger.next().is_none());
        assert_eq!(merger.chunks_count(), 0);
    }

    fn compare_vectors_of_result<T: PartialEq>(
        actual: &Vec<Result<T, SortError>>,
        expected: &Vec<Result<T, SortError>>,
    ) -> bool {
        actual.len() == expected.len()
            && actual
                .iter()
                .zip(expected)
                .all(|(actual_result, expected_result)| match (actual_result, expected_result) {
                    (Ok(actual_result), Ok(expected_result)) if actual_result == expected_result => true,
                    (Err(actual_err), Err(expected_err)) => actual_err.to_string() == expected_err.to_string(),
                    _ => false,
                })
    }
}
