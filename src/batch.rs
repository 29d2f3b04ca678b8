//! Importing many report files at once.
//!
//! Files are independent of each other, so they are spread over a pool of worker
//! threads. A file that fails never stops the batch.

use crate::error::ImportError;
use crate::import;
use crate::store::{ReportId, ReportStore};
use std::fmt;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// What happened to one input path.
#[derive(Debug)]
pub enum Outcome {
	Imported(ReportId),
	/// The report id was already stored.
	Duplicate,
	/// Directories are not report files.
	Skipped,
	Failed(ImportError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
	pub imported: usize,
	pub duplicates: usize,
	pub failed: usize,
}

impl AddAssign for BatchSummary {
	fn add_assign(&mut self, other: Self) {
		self.imported += other.imported;
		self.duplicates += other.duplicates;
		self.failed += other.failed;
	}
}

impl fmt::Display for BatchSummary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{} report(s) imported, {} already imported, {} failed",
			self.imported, self.duplicates, self.failed
		)
	}
}

impl BatchSummary {
	fn tally(&mut self, outcome: &Outcome) {
		match outcome {
			Outcome::Imported(_) => self.imported += 1,
			Outcome::Duplicate => self.duplicates += 1,
			Outcome::Skipped => {}
			Outcome::Failed(_) => self.failed += 1,
		}
	}
}

/// Imports a single path, logging the outcome.
pub fn import_path<S: ReportStore + ?Sized>(store: &S, path: &Path) -> Outcome {
	if path.is_dir() {
		tracing::debug!(path = %path.display(), "skipping directory");
		return Outcome::Skipped;
	}

	match import::import_file(store, path) {
		Ok(id) => {
			tracing::debug!(path = %path.display(), %id, "file imported");
			Outcome::Imported(id)
		}
		Err(err) if err.is_duplicate() => {
			tracing::debug!(path = %path.display(), "{err}");
			Outcome::Duplicate
		}
		Err(err) => {
			tracing::error!(path = %path.display(), "{err}");
			Outcome::Failed(err)
		}
	}
}

fn worker_count(jobs: usize, files: usize) -> usize {
	let jobs = match jobs {
		0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
		n => n,
	};
	jobs.min(files).max(1)
}

/// Imports every path on up to `jobs` threads (0 picks one per CPU).
pub fn import_paths<S: ReportStore + ?Sized>(
	store: &S,
	paths: &[PathBuf],
	jobs: usize,
) -> BatchSummary {
	let next = AtomicUsize::new(0);
	let workers = worker_count(jobs, paths.len());
	tracing::debug!(files = paths.len(), workers, "starting batch import");

	let mut summary = BatchSummary::default();
	std::thread::scope(|scope| {
		let mut handles = Vec::with_capacity(workers);
		for _ in 0..workers {
			handles.push(scope.spawn(|| {
				let mut summary = BatchSummary::default();
				while let Some(path) = paths.get(next.fetch_add(1, Ordering::Relaxed)) {
					summary.tally(&import_path(store, path));
				}
				summary
			}));
		}

		for handle in handles {
			match handle.join() {
				Ok(partial) => summary += partial,
				Err(_) => tracing::error!("import worker panicked"),
			}
		}
	});
	summary
}
