use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;

use crate::BuildResult;
use crate::Builder;
use crate::PageBuilderError;
use crate::PageBuilderResult;

/// Where the rebuild queue is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	/// No pending changes.
	Idle,
	/// Changes are pending and the debounce timer is running.
	Debouncing,
	/// A batch is being processed. Changes arriving now are recorded with a
	/// fresh deadline but the phase stays `Rebuilding` until the batch
	/// finishes, then moves straight to `Debouncing`.
	Rebuilding,
}

#[derive(Debug)]
struct QueueState {
	phase: Phase,
	pending: BTreeSet<PathBuf>,
	deadline: Option<Instant>,
	shutdown: bool,
}

#[derive(Debug)]
struct Shared {
	state: Mutex<QueueState>,
	signal: Condvar,
	debounce: Duration,
}

impl Shared {
	fn lock(&self) -> MutexGuard<'_, QueueState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Coalesces change events and hands them, one batch at a time, to a single
/// worker thread.
///
/// Every push resets the debounce timer. When the timer expires the whole
/// pending set is taken as one batch. At most one batch is processed at a
/// time and changes pushed meanwhile are kept for the next batch.
#[derive(Debug)]
pub struct RebuildQueue {
	shared: Arc<Shared>,
	worker: Option<JoinHandle<()>>,
}

/// A cheap handle for pushing changes into a [`RebuildQueue`] from another
/// thread.
#[derive(Debug, Clone)]
pub struct QueueSender {
	shared: Arc<Shared>,
}

impl QueueSender {
	/// Record changed paths and restart the debounce timer. Never waits for a
	/// running batch.
	pub fn push(&self, paths: impl IntoIterator<Item = PathBuf>) {
		let mut state = self.shared.lock();
		let before = state.pending.len();
		state.pending.extend(paths);
		if state.pending.len() == before && state.deadline.is_none() {
			return;
		}

		state.deadline = Some(Instant::now() + self.shared.debounce);
		if state.phase == Phase::Idle {
			state.phase = Phase::Debouncing;
		}
		drop(state);
		self.shared.signal.notify_all();
	}
}

impl RebuildQueue {
	/// Start the worker thread. `process` receives each batch.
	pub fn spawn<F>(debounce: Duration, process: F) -> Self
	where
		F: FnMut(BTreeSet<PathBuf>) + Send + 'static,
	{
		let shared = Arc::new(Shared {
			state: Mutex::new(QueueState {
				phase: Phase::Idle,
				pending: BTreeSet::new(),
				deadline: None,
				shutdown: false,
			}),
			signal: Condvar::new(),
			debounce,
		});

		let worker = {
			let shared = Arc::clone(&shared);
			std::thread::Builder::new()
				.name("pagebuilder-rebuild".into())
				.spawn(move || run_worker(&shared, process))
				.ok()
		};

		if worker.is_none() {
			tracing::error!("failed to spawn the rebuild worker thread");
		}

		Self { shared, worker }
	}

	pub fn sender(&self) -> QueueSender {
		QueueSender {
			shared: Arc::clone(&self.shared),
		}
	}

	/// See [`QueueSender::push`].
	pub fn push(&self, paths: impl IntoIterator<Item = PathBuf>) {
		self.sender().push(paths);
	}

	pub fn phase(&self) -> Phase {
		self.shared.lock().phase
	}

	/// Stop the worker after any in-flight batch completes. Pending changes
	/// that have not started processing are discarded.
	pub fn shutdown(&mut self) {
		self.shared.lock().shutdown = true;
		self.shared.signal.notify_all();

		if let Some(worker) = self.worker.take() {
			if worker.join().is_err() {
				tracing::error!("rebuild worker panicked");
			}
		}
	}
}

impl Drop for RebuildQueue {
	fn drop(&mut self) {
		self.shutdown();
	}
}

fn run_worker<F>(shared: &Shared, mut process: F)
where
	F: FnMut(BTreeSet<PathBuf>),
{
	let mut state = shared.lock();

	loop {
		if state.shutdown {
			break;
		}

		let Some(deadline) = state.deadline else {
			state = shared
				.signal
				.wait(state)
				.unwrap_or_else(PoisonError::into_inner);
			continue;
		};

		let now = Instant::now();
		if now < deadline {
			state = shared
				.signal
				.wait_timeout(state, deadline - now)
				.unwrap_or_else(PoisonError::into_inner)
				.0;
			continue;
		}

		let batch = std::mem::take(&mut state.pending);
		state.deadline = None;
		state.phase = Phase::Rebuilding;
		drop(state);

		tracing::debug!(changes = batch.len(), "processing change batch");
		process(batch);

		state = shared.lock();
		state.phase = if state.deadline.is_some() {
			Phase::Debouncing
		} else {
			Phase::Idle
		};
	}
}

type SharedWatcher = Arc<Mutex<Option<RecommendedWatcher>>>;

/// Keeps a watch session alive. Dropping it stops the file watcher and then
/// the rebuild worker.
pub struct WatchHandle {
	watcher: SharedWatcher,
	queue: RebuildQueue,
	roots: Vec<PathBuf>,
}

impl std::fmt::Debug for WatchHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WatchHandle")
			.field("roots", &self.roots)
			.field("phase", &self.queue.phase())
			.finish_non_exhaustive()
	}
}

impl WatchHandle {
	/// The source roots that existed when watching started.
	pub fn roots(&self) -> &[PathBuf] {
		&self.roots
	}

	pub fn phase(&self) -> Phase {
		self.queue.phase()
	}
}

impl Drop for WatchHandle {
	fn drop(&mut self) {
		lock_watcher(&self.watcher).take();
		self.queue.shutdown();
	}
}

/// Watch the source roots of `builder` and rebuild incrementally on change.
///
/// `builder` should already hold a completed [`Builder::build`]. Each batch of
/// changes is classified and passed to [`Builder::rebuild`], and the result
/// handed to `on_rebuild`. Batches that contain no source changes are
/// skipped.
///
/// A source root that does not exist yet is found through its nearest
/// existing parent directory and watched as soon as it is created.
pub fn watch<F>(builder: Builder, mut on_rebuild: F) -> PageBuilderResult<WatchHandle>
where
	F: FnMut(PageBuilderResult<BuildResult>) + Send + 'static,
{
	let roots = builder.watched_roots();
	let missing = builder.missing_roots();
	let debounce = builder.options().debounce;
	let shared_watcher: SharedWatcher = Arc::new(Mutex::new(None));
	let mut builder = builder;

	let queue = {
		let shared_watcher = Arc::clone(&shared_watcher);
		let mut missing = missing.clone();
		RebuildQueue::spawn(debounce, move |paths| {
			attach_created_roots(&shared_watcher, &mut missing);
			let changes = builder.classify(paths);
			if changes.is_empty() {
				return;
			}

			tracing::debug!(
				pages = changes.pages.len(),
				templates = changes.templates.len(),
				assets = changes.assets.len(),
				"sources changed"
			);
			on_rebuild(builder.rebuild(&changes));
		})
	};

	let sender = queue.sender();
	let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
		match res {
			Ok(event) => {
				if matches!(
					event.kind,
					notify::EventKind::Modify(_)
						| notify::EventKind::Create(_)
						| notify::EventKind::Remove(_)
						| notify::EventKind::Any
				) {
					sender.push(event.paths);
				}
			}
			Err(error) => tracing::warn!(%error, "file watcher error"),
		}
	})
	.map_err(|e| watch_error(roots.first(), &e))?;

	for root in &roots {
		watcher
			.watch(root, RecursiveMode::Recursive)
			.map_err(|e| watch_error(Some(root), &e))?;
		tracing::debug!(root = %root.display(), "watching");
	}

	let mut parents = BTreeSet::new();
	for root in &missing {
		let Some(parent) = root.ancestors().skip(1).find(|dir| dir.is_dir()) else {
			tracing::warn!(root = %root.display(), "source directory does not exist and cannot be watched");
			continue;
		};
		tracing::warn!(
			root = %root.display(),
			parent = %parent.display(),
			"source directory does not exist yet, waiting for it to be created"
		);
		let covered = roots.iter().any(|watched| parent.starts_with(watched));
		if !covered && parents.insert(parent.to_path_buf()) {
			watcher
				.watch(parent, RecursiveMode::NonRecursive)
				.map_err(|e| watch_error(Some(root), &e))?;
		}
	}

	*lock_watcher(&shared_watcher) = Some(watcher);

	Ok(WatchHandle {
		watcher: shared_watcher,
		queue,
		roots,
	})
}

fn lock_watcher(watcher: &SharedWatcher) -> MutexGuard<'_, Option<RecommendedWatcher>> {
	watcher.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Start watching every missing root that has since been created.
fn attach_created_roots(watcher: &SharedWatcher, missing: &mut Vec<PathBuf>) {
	if missing.iter().all(|root| !root.is_dir()) {
		return;
	}

	let mut guard = lock_watcher(watcher);
	let Some(active) = guard.as_mut() else {
		return;
	};

	missing.retain(|root| {
		if !root.is_dir() {
			return true;
		}

		match active.watch(root, RecursiveMode::Recursive) {
			Ok(()) => {
				tracing::info!(root = %root.display(), "watching new source directory");
				false
			}
			Err(error) => {
				tracing::warn!(root = %root.display(), %error, "failed to watch source directory");
				true
			}
		}
	});
}

fn watch_error(path: Option<&PathBuf>, error: &notify::Error) -> PageBuilderError {
	PageBuilderError::Watch {
		path: path.cloned().unwrap_or_default(),
		reason: error.to_string(),
	}
}
