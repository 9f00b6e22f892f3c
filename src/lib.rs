//! `phrase-sort` is an external sort for line-oriented files of `<number>. <phrase>` records.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. Sorting is achieved in two passes. During the
//! first pass it produces sorted runs bounded by a memory budget, during the second pass it merges the sorted runs
//! together. For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Record order:**
//!   entries are ordered by phrase with ASCII case folding, a phrase sorts before any longer phrase it
//!   prefixes, ties are broken by number.
//! * **Replacement selection:**
//!   by default runs are produced by a single-threaded heap that recycles slots as values are drained.
//! * **Multithreading support:**
//!   alternatively the input is cut into batches sorted in parallel on a bounded worker pool.
//! * **Single spill file:**
//!   all runs are appended to one temporary file and read back through independent views,
//!   the file is removed whatever the outcome.
//! * **Cooperative cancellation:**
//!   every stage checks a shared [`Cancellation`] flag at record boundaries.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io;
//! use std::path;
//!
//! use phrase_sort::{ChunkBudget, ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     let input_reader = fs::File::open("input.txt").unwrap();
//!     let output_writer = io::BufWriter::new(fs::File::create("output.txt").unwrap());
//!
//!     let sorter: ExternalSorter = ExternalSorterBuilder::new()
//!         .with_tmp_dir(path::Path::new("./"))
//!         .with_budget(ChunkBudget::Bytes(50 * 1024 * 1024))
//!         .build()
//!         .unwrap();
//!
//!     sorter.sort_to(input_reader, output_writer).unwrap();
//! }
//! ```

pub mod buffer;
pub mod cancel;
pub mod chunk;
pub mod entry;
pub mod error;
pub mod merger;
pub mod reader;
pub mod selection;
pub mod sort;

pub use buffer::{ChunkBudget, EntryBuffer};
pub use cancel::Cancellation;
pub use chunk::{ChunkDescriptor, ChunkRepository, ChunkView, RunSink};
pub use entry::{compare_entries, compare_phrases, Entry, MAX_PHRASE_LEN};
pub use error::SortError;
pub use merger::BinaryHeapMerger;
pub use reader::EntryReader;
pub use sort::{ChunkSorter, ExternalSorter, ExternalSorterBuilder, SortStats, SortStrategy, SortedEntries};
