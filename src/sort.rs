//! External sorter.

use std::cmp::Ordering;
use std::fs;
use std::io::prelude::*;
use std::mem;
use std::path::Path;

use parking_lot::Mutex;

use crate::buffer::{ChunkBudget, EntryBuffer};
use crate::chunk::{ChunkRepository, ChunkView, RunSink};
use crate::entry::MAX_ENCODED_LEN;
use crate::merger::BinaryHeapMerger;
use crate::selection::run_replacement_selection;
use crate::{compare_entries, Cancellation, Entry, EntryReader, SortError};

/// Entry comparison function used by the external sorter.
pub type EntryCompare = fn(&Entry, &Entry) -> Ordering;

/// Merged stream of a spill file.
pub type SpillMerger = BinaryHeapMerger<Entry, EntryReader<ChunkView<fs::File>>, EntryCompare>;

const DEFAULT_READ_BUF_SIZE: usize = 1 << 20;
const DEFAULT_MERGE_BUF_SIZE: usize = 1 << 16;
const DEFAULT_RW_BUF_SIZE: usize = 1 << 20;

/// Strategy used to produce sorted runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortStrategy {
    /// Single-threaded replacement selection over a heap of the chunk capacity.
    #[default]
    ReplacementSelection,
    /// Independent batches of the chunk capacity sorted on a worker pool.
    ParallelBatch,
}

/// Summary of a sort phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Number of entries written to runs.
    pub entries: u64,
    /// Number of runs produced.
    pub runs: usize,
}

/// Bounded-memory sorter turning an item stream into sorted runs.
pub struct ChunkSorter {
    /// Maximum number of items held in memory and stored per run.
    capacity: usize,
    strategy: SortStrategy,
    /// Batch sorting thread pool, only built for [`SortStrategy::ParallelBatch`].
    thread_pool: Option<rayon::ThreadPool>,
    cancellation: Cancellation,
}

impl ChunkSorter {
    /// Creates a new chunk sorter.
    ///
    /// # Arguments
    /// * `budget` - Per-run memory budget, must hold at least one entry.
    /// * `strategy` - Run generation strategy.
    /// * `threads_number` - Number of batch sorting workers. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `cancellation` - Flag checked at every record and run boundary.
    pub fn new(
        budget: ChunkBudget,
        strategy: SortStrategy,
        threads_number: Option<usize>,
        cancellation: Cancellation,
    ) -> Result<Self, SortError> {
        let thread_pool = match strategy {
            SortStrategy::ReplacementSelection => None,
            SortStrategy::ParallelBatch => Some(Self::init_thread_pool(threads_number)?),
        };

        return Ok(ChunkSorter {
            capacity: budget.capacity()?,
            strategy,
            thread_pool,
            cancellation,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new().thread_name(|idx| format!("sort-worker-{}", idx));

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    /// Splits the input into sorted runs and stores them in `sink`.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    /// * `sink` - Destination of the sorted runs
    /// * `compare` - Function be be used to compare items
    pub fn sort_by<T, I, S, F>(&self, input: I, sink: &mut S, compare: F) -> Result<SortStats, SortError>
    where
        T: Send,
        I: IntoIterator<Item = Result<T, SortError>>,
        S: RunSink<T> + Send,
        F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
    {
        let stats = match self.strategy {
            SortStrategy::ReplacementSelection => {
                run_replacement_selection(input, self.capacity, sink, compare, &self.cancellation)?
            }
            SortStrategy::ParallelBatch => self.sort_batches(input, sink, compare)?,
        };

        log::debug!("{} entries sorted into {} runs", stats.entries, stats.runs);
        return Ok(stats);
    }

    fn sort_batches<T, I, S, F>(&self, input: I, sink: &mut S, compare: F) -> Result<SortStats, SortError>
    where
        T: Send,
        I: IntoIterator<Item = Result<T, SortError>>,
        S: RunSink<T> + Send,
        F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
    {
        let thread_pool = self
            .thread_pool
            .as_ref()
            .ok_or(SortError::State("thread pool is not initialized"))?;

        // one token per batch in flight; sending blocks once every worker is busy
        let (admission, completion) = crossbeam_channel::bounded::<()>(thread_pool.current_num_threads());
        let sink_slot = Mutex::new(sink);
        let failure_slot: Mutex<Option<SortError>> = Mutex::new(None);
        let (sink, failure) = (&sink_slot, &failure_slot);
        let mut stats = SortStats::default();

        let produced = thread_pool.in_place_scope(|scope| -> Result<(), SortError> {
            let mut submit = |mut batch: EntryBuffer<T>| -> Result<(), SortError> {
                admission
                    .send(())
                    .map_err(|_| SortError::State("worker admission channel closed"))?;

                stats.runs += 1;
                stats.entries += batch.len() as u64;

                let completion = completion.clone();
                let cancellation = self.cancellation.clone();
                scope.spawn(move |_| {
                    batch.as_mut_slice().sort_by(compare);

                    if !cancellation.is_cancelled() && failure.lock().is_none() {
                        if let Err(err) = sink.lock().store_run(batch.as_slice()) {
                            let mut failure = failure.lock();
                            if failure.is_none() {
                                *failure = Some(err);
                            }
                        }
                    }

                    let _ = completion.recv();
                });

                Ok(())
            };

            let mut batch = EntryBuffer::with_capacity(self.capacity);
            for item in input {
                self.cancellation.check()?;
                if failure.lock().is_some() {
                    break;
                }

                batch.push(item?);
                if batch.is_full() {
                    submit(mem::replace(&mut batch, EntryBuffer::with_capacity(self.capacity)))?;
                }
            }

            if !batch.is_empty() && failure.lock().is_none() {
                submit(batch)?;
            }

            Ok(())
        });

        produced?;
        if let Some(err) = failure_slot.into_inner() {
            return Err(err);
        }
        self.cancellation.check()?;

        return Ok(stats);
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone, Default)]
pub struct ExternalSorterBuilder {
    /// Per-run memory budget.
    budget: ChunkBudget,
    /// Run generation strategy.
    strategy: SortStrategy,
    /// Number of threads to be used to sort batches in parallel.
    threads_number: Option<usize>,
    /// Spill file location.
    spill_path: Option<Box<Path>>,
    /// Directory to be used to create a spill file if no spill path is set.
    tmp_dir: Option<Box<Path>>,
    /// Input read buffer size.
    read_buf_size: Option<usize>,
    /// Per-chunk read buffer size during merge.
    merge_buf_size: Option<usize>,
    /// Spill file write buffer size.
    rw_buf_size: Option<usize>,
    cancellation: Option<Cancellation>,
}

impl ExternalSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter, SortError> {
        let cancellation = self.cancellation.unwrap_or_default();

        return Ok(ExternalSorter {
            sorter: ChunkSorter::new(self.budget, self.strategy, self.threads_number, cancellation.clone())?,
            spill_path: self.spill_path,
            tmp_dir: self.tmp_dir,
            read_buf_size: self.read_buf_size.unwrap_or(DEFAULT_READ_BUF_SIZE),
            // every merge cursor must hold the longest spilled record
            merge_buf_size: self
                .merge_buf_size
                .unwrap_or(DEFAULT_MERGE_BUF_SIZE)
                .max(MAX_ENCODED_LEN),
            rw_buf_size: self.rw_buf_size.unwrap_or(DEFAULT_RW_BUF_SIZE),
            cancellation,
        });
    }

    /// Sets per-run memory budget.
    pub fn with_budget(mut self, budget: ChunkBudget) -> ExternalSorterBuilder {
        self.budget = budget;
        return self;
    }

    /// Sets run generation strategy.
    pub fn with_strategy(mut self, strategy: SortStrategy) -> ExternalSorterBuilder {
        self.strategy = strategy;
        return self;
    }

    /// Sets number of threads to be used to sort data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets spill file path. The file is created (or truncated) and deleted afterwards.
    pub fn with_spill_path(mut self, path: &Path) -> ExternalSorterBuilder {
        self.spill_path = Some(path.into());
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets input read buffer size, the upper bound of a single line length.
    pub fn with_read_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder {
        self.read_buf_size = Some(buf_size);
        return self;
    }

    /// Sets per-chunk read buffer size used during merge.
    /// Sizes below the longest encoded entry are raised to it.
    pub fn with_merge_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder {
        self.merge_buf_size = Some(buf_size);
        return self;
    }

    /// Sets spill file write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets cancellation flag.
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> ExternalSorterBuilder {
        self.cancellation = Some(cancellation);
        return self;
    }
}

/// External sorter.
pub struct ExternalSorter {
    sorter: ChunkSorter,
    spill_path: Option<Box<Path>>,
    tmp_dir: Option<Box<Path>>,
    read_buf_size: usize,
    merge_buf_size: usize,
    rw_buf_size: usize,
    cancellation: Cancellation,
}

impl ExternalSorter {
    /// Attaches the spill file to `repository`: the configured path, or a uniquely named file
    /// that is removed again unless the repository took it over.
    fn select_spill_file(&self, repository: &mut ChunkRepository) -> Result<(), SortError> {
        if let Some(spill_path) = &self.spill_path {
            return repository.select_temp_file(spill_path);
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix("phrase-sort-").suffix(".spill");
        let tmp_file = if let Some(tmp_dir) = &self.tmp_dir {
            builder.tempfile_in(tmp_dir)
        } else {
            builder.tempfile()
        }
        .map_err(SortError::TempFile)?;

        let tmp_path = tmp_file.into_temp_path();
        repository.select_temp_file(&tmp_path)?;
        tmp_path.keep().map_err(|err| SortError::TempFile(err.error))?;

        return Ok(());
    }

    /// Sorts entries read from the input.
    /// Returns an iterator that can be used to get sorted data stream.
    ///
    /// The spill file lives as long as the returned iterator.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    pub fn sort<R: Read>(&self, input: R) -> Result<SortedEntries, SortError> {
        let mut repository = ChunkRepository::new(self.rw_buf_size);
        self.select_spill_file(&mut repository)?;

        let entries = EntryReader::with_cancellation(input, self.read_buf_size, self.cancellation.clone());
        let stats = self.sorter.sort_by(entries, &mut repository, compare_entries)?;

        log::debug!("external sort preparation done");

        let readers = repository
            .chunks()?
            .into_iter()
            .map(|view| EntryReader::with_cancellation(view, self.merge_buf_size, self.cancellation.clone()));
        let merger = BinaryHeapMerger::with_cancellation(
            readers,
            compare_entries as EntryCompare,
            self.cancellation.clone(),
        );

        return Ok(SortedEntries {
            merger,
            repository,
            stats,
            finished: false,
        });
    }

    /// Sorts entries read from the input and writes them to the output.
    /// The output is flushed once after the last entry.
    pub fn sort_to<R: Read, W: Write>(&self, input: R, mut output: W) -> Result<SortStats, SortError> {
        let mut sorted = self.sort(input)?;

        for entry in &mut sorted {
            entry?.write_to(&mut output)?;
        }
        output.flush()?;

        log::debug!("sorted data written");
        return Ok(sorted.stats());
    }
}

/// Globally sorted entry stream backed by a spill file.
///
/// Chunk views are closed and the spill file is removed once the stream ends, fails,
/// or is dropped.
pub struct SortedEntries {
    merger: SpillMerger,
    repository: ChunkRepository,
    stats: SortStats,
    finished: bool,
}

impl SortedEntries {
    pub fn stats(&self) -> SortStats {
        self.stats
    }
}

impl Iterator for SortedEntries {
    type Item = Result<Entry, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.merger.next() {
            Some(Ok(entry)) => Some(Ok(entry)),
            Some(Err(err)) => {
                self.finished = true;
                if let Err(close_err) = self.repository.close() {
                    log::warn!("spill file teardown failed: {}", close_err);
                }
                Some(Err(err))
            }
            None => {
                self.finished = true;
                self.repository.close().err().map(Err)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;
    use std::fs;
    use std::io;

    use rand::seq::SliceRandom;
    use rand::Rng;
    use rstest::*;

    use super::{ChunkSorter, ExternalSorter, ExternalSorterBuilder, SortStrategy};
    use crate::{compare_entries, Cancellation, ChunkBudget, ChunkRepository, Entry, EntryReader, SortError};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn random_input(count: usize) -> (Vec<Entry>, Vec<u8>) {
        let mut rng = rand::thread_rng();
        let alphabet = b"aAbBcC z";

        let mut entries: Vec<Entry> = (0..count)
            .map(|_| {
                let len = rng.gen_range(0..8);
                let phrase: Vec<u8> = (0..len).map(|_| alphabet[rng.gen_range(0..alphabet.len())]).collect();
                Entry::new(rng.gen_range(0..50), &phrase).unwrap()
            })
            .collect();
        entries.shuffle(&mut rng);

        let mut data = Vec::new();
        for entry in &entries {
            entry.write_to(&mut data).unwrap();
        }

        return (entries, data);
    }

    fn assert_sorted_like(actual: &[Entry], mut expected: Vec<Entry>) {
        expected.sort_by(compare_entries);

        assert_eq!(actual.len(), expected.len());
        for (actual, expected) in actual.iter().zip(&expected) {
            assert_eq!(compare_entries(actual, expected), Ordering::Equal, "{} != {}", actual, expected);
        }
    }

    fn build_sorter(tmp_dir: &tempfile::TempDir, strategy: SortStrategy, capacity: usize) -> ExternalSorter {
        ExternalSorterBuilder::new()
            .with_budget(ChunkBudget::Entries(capacity))
            .with_strategy(strategy)
            .with_threads_number(2)
            .with_tmp_dir(tmp_dir.path())
            .with_read_buf_size(64)
            .with_merge_buf_size(64)
            .build()
            .unwrap()
    }

    #[rstest]
    #[case(SortStrategy::ReplacementSelection, 1)]
    #[case(SortStrategy::ReplacementSelection, 8)]
    #[case(SortStrategy::ReplacementSelection, 10_000)]
    #[case(SortStrategy::ParallelBatch, 1)]
    #[case(SortStrategy::ParallelBatch, 8)]
    #[case(SortStrategy::ParallelBatch, 10_000)]
    fn test_external_sorter(tmp_dir: tempfile::TempDir, #[case] strategy: SortStrategy, #[case] capacity: usize) {
        let (entries, data) = random_input(300);
        let sorter = build_sorter(&tmp_dir, strategy, capacity);

        let mut output = Vec::new();
        let stats = sorter.sort_to(io::Cursor::new(data), &mut output).unwrap();
        assert_eq!(stats.entries, 300);

        let sorted: Vec<Entry> = EntryReader::new(io::Cursor::new(output), 64)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_sorted_like(&sorted, entries);

        // spill file removed
        assert_eq!(std::fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    fn test_sorted_entries_iterator(tmp_dir: tempfile::TempDir) {
        let (entries, data) = random_input(50);
        let spill_path = tmp_dir.path().join("spill");
        let sorter = ExternalSorterBuilder::new()
            .with_budget(ChunkBudget::Entries(4))
            .with_spill_path(&spill_path)
            .build()
            .unwrap();

        let sorted = sorter.sort(io::Cursor::new(data)).unwrap();
        assert!(sorted.stats().runs > 1);
        assert!(spill_path.exists());

        let sorted: Vec<Entry> = sorted.collect::<Result<_, _>>().unwrap();
        assert_sorted_like(&sorted, entries);
        assert!(!spill_path.exists());
    }

    #[rstest]
    fn test_dropped_iterator_removes_spill_file(tmp_dir: tempfile::TempDir) {
        let (_, data) = random_input(50);
        let spill_path = tmp_dir.path().join("spill");
        let sorter = ExternalSorterBuilder::new()
            .with_budget(ChunkBudget::Entries(4))
            .with_spill_path(&spill_path)
            .build()
            .unwrap();

        let mut sorted = sorter.sort(io::Cursor::new(data)).unwrap();
        assert!(sorted.next().unwrap().is_ok());
        drop(sorted);

        assert!(!spill_path.exists());
    }

    #[rstest]
    #[case(SortStrategy::ReplacementSelection)]
    #[case(SortStrategy::ParallelBatch)]
    fn test_empty_input(tmp_dir: tempfile::TempDir, #[case] strategy: SortStrategy) {
        let sorter = build_sorter(&tmp_dir, strategy, 4);

        let mut output = Vec::new();
        let stats = sorter.sort_to(io::empty(), &mut output).unwrap();

        assert!(output.is_empty());
        assert_eq!(stats.runs, 0);
    }

    #[rstest]
    fn test_output_format(tmp_dir: tempfile::TempDir) {
        let sorter = build_sorter(&tmp_dir, SortStrategy::ReplacementSelection, 2);
        let input = b"4. Cherry\n1. Apple\r\n\n3. Banana\n2. apple";

        let mut output = Vec::new();
        sorter.sort_to(&input[..], &mut output).unwrap();

        // the retained '\r' makes "apple" a prefix of "Apple\r"
        assert_eq!(output, b"2. apple\n1. Apple\r\n3. Banana\n4. Cherry\n");
    }

    #[rstest]
    #[case(SortStrategy::ReplacementSelection)]
    #[case(SortStrategy::ParallelBatch)]
    fn test_format_error_removes_spill_file(tmp_dir: tempfile::TempDir, #[case] strategy: SortStrategy) {
        let sorter = build_sorter(&tmp_dir, strategy, 1);
        let input = b"1. ok\n2. fine\nbroken\n3. never\n";

        let result = sorter.sort_to(&input[..], io::sink());

        assert!(matches!(result, Err(SortError::Format(_))));
        assert_eq!(std::fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    #[case(SortStrategy::ReplacementSelection)]
    #[case(SortStrategy::ParallelBatch)]
    fn test_cancellation_removes_spill_file(tmp_dir: tempfile::TempDir, #[case] strategy: SortStrategy) {
        let (_, data) = random_input(100);
        let cancellation = Cancellation::new();
        let sorter = ExternalSorterBuilder::new()
            .with_budget(ChunkBudget::Entries(4))
            .with_strategy(strategy)
            .with_threads_number(2)
            .with_tmp_dir(tmp_dir.path())
            .with_cancellation(cancellation.clone())
            .build()
            .unwrap();

        cancellation.cancel();
        let result = sorter.sort_to(io::Cursor::new(data), io::sink());

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(std::fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    #[case(16, 1024)]
    #[case(64, 64)]
    fn test_merge_buffer_smaller_than_entry(
        tmp_dir: tempfile::TempDir,
        #[case] merge_buf_size: usize,
        #[case] read_buf_size: usize,
    ) {
        let sorter = ExternalSorterBuilder::new()
            .with_budget(ChunkBudget::Entries(1))
            .with_tmp_dir(tmp_dir.path())
            .with_read_buf_size(read_buf_size)
            .with_merge_buf_size(merge_buf_size)
            .build()
            .unwrap();

        // the non-digit prefix is spilled as a longer number than it was read
        let phrase = "x".repeat(57);
        let input = format!("1. another long phrase here\nzzzz. {}\n2. short\n", phrase);

        let mut output = Vec::new();
        let stats = sorter.sort_to(input.as_bytes(), &mut output).unwrap();
        assert_eq!(stats.runs, 3);

        let sorted: Vec<Entry> = EntryReader::new(io::Cursor::new(output), 1024)
            .collect::<Result<_, _>>()
            .unwrap();
        let phrases: Vec<&[u8]> = sorted.iter().map(Entry::phrase).collect();
        assert_eq!(phrases, vec![&b"another long phrase here"[..], b"short", phrase.as_bytes()]);
    }

    #[rstest]
    fn test_unselected_spill_file_removed(tmp_dir: tempfile::TempDir) {
        // a repository whose previous spill file cannot be removed fails to select a new one
        let blocker = tmp_dir.path().join("blocker");
        let mut repository = ChunkRepository::new(64);
        repository.select_temp_file(&blocker).unwrap();
        fs::remove_file(&blocker).unwrap();
        fs::create_dir(&blocker).unwrap();

        let sorter = build_sorter(&tmp_dir, SortStrategy::ReplacementSelection, 4);
        assert!(sorter.select_spill_file(&mut repository).is_err());

        let remaining: Vec<_> = fs::read_dir(tmp_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(remaining, vec![blocker]);
    }

    #[test]
    fn test_budget_too_small() {
        let result = ExternalSorterBuilder::new().with_budget(ChunkBudget::Bytes(16)).build();
        assert!(matches!(result, Err(SortError::Capacity(_))));
    }

    #[test]
    fn test_parallel_batches() {
        let sorter = ChunkSorter::new(
            ChunkBudget::Entries(7),
            SortStrategy::ParallelBatch,
            Some(3),
            Cancellation::new(),
        )
        .unwrap();

        let mut input = Vec::from_iter(0..100);
        input.shuffle(&mut rand::thread_rng());

        let mut runs: Vec<Vec<i32>> = Vec::new();
        let stats = sorter
            .sort_by(input.into_iter().map(Ok), &mut runs, i32::cmp)
            .unwrap();

        assert_eq!(stats.runs, 15);
        assert_eq!(runs.len(), 15);
        for run in &runs {
            assert!(run.len() <= 7);
            assert!(run.windows(2).all(|pair| pair[0] <= pair[1]));
        }

        let mut restored = Vec::from_iter(runs.into_iter().flatten());
        restored.sort();
        assert_eq!(restored, Vec::from_iter(0..100));
    }
}
