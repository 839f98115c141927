use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use std::time::UNIX_EPOCH;

use rayon::prelude::*;

use crate::BuildOptions;
use crate::ContextStore;
use crate::Loaded;
use crate::MustacheRenderer;
use crate::OnPageError;
use crate::PageBuilderError;
use crate::PageBuilderResult;
use crate::Render;
use crate::RootScanner;
use crate::SourceKind;
use crate::TemplateGraph;
use crate::has_extension;
use crate::merge;
use crate::render_chain;

/// A page rendered to its final output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
	pub source: PathBuf,
	pub destination: PathBuf,
	pub content: String,
}

/// A page or asset that could not be produced.
#[derive(Debug)]
pub struct PageFailure {
	pub path: PathBuf,
	pub error: PageBuilderError,
}

/// Outcome of a full build or an incremental rebuild.
#[derive(Debug, Default)]
pub struct BuildResult {
	pub succeeded: Vec<RenderedPage>,
	pub failed: Vec<PageFailure>,
	/// Number of assets copied.
	pub assets: usize,
	/// Output files deleted because no source produces them anymore.
	pub pruned: Vec<PathBuf>,
	/// Whether any output was written. A full build that aborts on a page
	/// failure writes nothing.
	pub written: bool,
}

impl BuildResult {
	/// `true` when every page and asset was produced.
	pub fn is_ok(&self) -> bool {
		self.failed.is_empty()
	}
}

/// The templates a page was last resolved through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PageResolution {
	/// Names reached by following `template` keys, including an unknown one.
	pub templates: Vec<String>,
	/// Set when resolution stopped at an unknown template name.
	pub missing: Option<String>,
}

struct PageOutcome {
	path: PathBuf,
	resolution: PageResolution,
	result: PageBuilderResult<RenderedPage>,
}

/// Builds every page in the pages root into the dist root.
///
/// A `Builder` keeps the parsed sources and the template graph between
/// builds, so that [`rebuild`](Self::rebuild) only has to reload what changed.
pub struct Builder {
	pub(crate) options: BuildOptions,
	pub(crate) renderer: Arc<dyn Render>,
	pub(crate) pages: RootScanner,
	pub(crate) templates: RootScanner,
	pub(crate) assets: RootScanner,
	pub(crate) store: ContextStore,
	pub(crate) graph: TemplateGraph,
	/// Set when the last graph build failed and must be retried.
	pub(crate) graph_stale: bool,
	pub(crate) resolutions: BTreeMap<PathBuf, PageResolution>,
	/// Asset sources copied by the last build or rebuild.
	pub(crate) asset_sources: BTreeSet<PathBuf>,
}

impl std::fmt::Debug for Builder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Builder")
			.field("options", &self.options)
			.field("templates", &self.graph.len())
			.field("sources", &self.store.len())
			.finish_non_exhaustive()
	}
}

impl Builder {
	/// Create a builder using the [`MustacheRenderer`].
	pub fn new(options: BuildOptions) -> PageBuilderResult<Self> {
		Self::with_renderer(options, Arc::new(MustacheRenderer::new()))
	}

	pub fn with_renderer(options: BuildOptions, renderer: Arc<dyn Render>) -> PageBuilderResult<Self> {
		let pages = RootScanner::new(&options.pages_dir, &options.exclude_patterns)?;
		let templates = RootScanner::new(&options.templates_dir, &options.exclude_patterns)?;
		let assets = RootScanner::new(&options.assets_dir, &options.exclude_patterns)?;

		Ok(Self {
			store: ContextStore::new(options.frontmatter.clone()),
			options,
			renderer,
			pages,
			templates,
			assets,
			graph: TemplateGraph::default(),
			graph_stale: false,
			resolutions: BTreeMap::new(),
			asset_sources: BTreeSet::new(),
		})
	}

	pub fn options(&self) -> &BuildOptions {
		&self.options
	}

	pub fn store(&self) -> &ContextStore {
		&self.store
	}

	pub fn graph(&self) -> &TemplateGraph {
		&self.graph
	}

	/// Reload every source and rebuild the whole output tree.
	///
	/// Duplicate template names, template cycles and unreadable roots are
	/// returned as `Err` before anything is written. Per-page failures are
	/// collected in [`BuildResult::failed`]; what happens to the remaining
	/// pages then depends on [`OnPageError`].
	pub fn build(&mut self) -> PageBuilderResult<BuildResult> {
		let started = Instant::now();

		self.load()?;

		let pages: Vec<PathBuf> = self.store.paths_of(SourceKind::Page).cloned().collect();
		let mut result = self.render_pages(&pages);

		if !result.failed.is_empty() && self.options.on_page_error == OnPageError::Abort {
			tracing::warn!(
				failed = result.failed.len(),
				"build aborted; no output was written"
			);
			return Ok(result);
		}

		self.write_pages(&mut result);

		let asset_files = self.assets.collect(|_| true)?;
		self.asset_sources.clear();
		for asset in asset_files {
			match self.copy_asset(&asset) {
				Ok(_) => {
					result.assets += 1;
					self.asset_sources.insert(asset);
				}
				Err(error) => result.failed.push(PageFailure { path: asset, error }),
			}
		}

		if self.options.prune {
			let keep: BTreeSet<PathBuf> = pages
				.iter()
				.map(|page| self.destination_for(page))
				.chain(self.asset_sources.iter().map(|asset| self.asset_destination(asset)))
				.collect();
			result.pruned = prune_output(&self.options.dist_dir, &keep)?;
		}

		result.written = true;
		tracing::info!(
			pages = result.succeeded.len(),
			failed = result.failed.len(),
			assets = result.assets,
			pruned = result.pruned.len(),
			elapsed_ms = started.elapsed().as_millis(),
			"build finished"
		);

		Ok(result)
	}

	/// Read every page and template and index the templates, without
	/// rendering anything.
	pub fn load(&mut self) -> PageBuilderResult<()> {
		self.load_sources()?;
		self.rebuild_graph()
	}

	/// Re-index templates. On failure the previous graph is kept and marked
	/// stale so the next rebuild retries.
	pub(crate) fn rebuild_graph(&mut self) -> PageBuilderResult<()> {
		match TemplateGraph::build(&self.store) {
			Ok(graph) => {
				self.graph = graph;
				self.graph_stale = false;
				Ok(())
			}
			Err(error) => {
				self.graph_stale = true;
				Err(error)
			}
		}
	}

	fn load_sources(&mut self) -> PageBuilderResult<()> {
		let extension = self.options.extension.clone();
		let is_source = |path: &Path| has_extension(path, &extension);

		let templates = self.templates.collect(is_source)?;
		let pages = self.pages.collect(is_source)?;

		self.store.clear_kind(SourceKind::Template);
		self.store.clear_kind(SourceKind::Page);
		self.resolutions.clear();

		for path in templates {
			self.store
				.load(&path, &self.options.templates_dir, SourceKind::Template);
		}
		for path in pages {
			self.store.load(&path, &self.options.pages_dir, SourceKind::Page);
		}

		tracing::debug!(
			templates = self.store.paths_of(SourceKind::Template).count(),
			pages = self.store.paths_of(SourceKind::Page).count(),
			"loaded sources"
		);

		Ok(())
	}

	/// Render `pages` in parallel and record how each one resolved. Nothing
	/// is written.
	pub(crate) fn render_pages(&mut self, pages: &[PathBuf]) -> BuildResult {
		let this = &*self;
		let outcomes: Vec<PageOutcome> = pages
			.par_iter()
			.map(|path| this.render_page(path))
			.collect();

		let mut result = BuildResult::default();
		for outcome in outcomes {
			self.resolutions.insert(outcome.path.clone(), outcome.resolution);
			match outcome.result {
				Ok(page) => result.succeeded.push(page),
				Err(error) => {
					tracing::debug!(path = %outcome.path.display(), %error, "page failed");
					result.failed.push(PageFailure {
						path: outcome.path,
						error,
					});
				}
			}
		}

		result
	}

	fn render_page(&self, path: &Path) -> PageOutcome {
		let mut resolution = PageResolution::default();
		let result = self.try_render_page(path, &mut resolution);

		PageOutcome {
			path: path.to_path_buf(),
			resolution,
			result,
		}
	}

	fn try_render_page(
		&self,
		path: &Path,
		resolution: &mut PageResolution,
	) -> PageBuilderResult<RenderedPage> {
		let page = match self.store.get(path) {
			Some(Loaded::Parsed(page)) => page,
			Some(failed @ Loaded::Failed { .. }) => {
				return Err(failed.error(path).unwrap_or_else(|| missing_source(path)));
			}
			None => return Err(missing_source(path)),
		};

		resolution.templates = self.graph.chain_names(page);
		let chain = self
			.graph
			.resolve_chain(&self.store, page)
			.inspect_err(|error| {
				if let PageBuilderError::UnknownTemplate { name, .. } = error {
					resolution.missing = Some(name.clone());
				}
			})?;

		let context = merge(&chain, &self.options.shared_data);
		let content = render_chain(
			&chain,
			&context,
			self.renderer.as_ref(),
			self.options.slot_policy,
		)?;

		Ok(RenderedPage {
			source: path.to_path_buf(),
			destination: self.destination_for(path),
			content,
		})
	}

	/// Write every succeeded page. A page that cannot be written moves to
	/// `failed`.
	pub(crate) fn write_pages(&self, result: &mut BuildResult) {
		let rendered = std::mem::take(&mut result.succeeded);
		for page in rendered {
			match write_atomic(&page.destination, page.content.as_bytes()) {
				Ok(written) => {
					if written {
						tracing::debug!(destination = %page.destination.display(), "page written");
					}
					result.succeeded.push(page);
				}
				Err(error) => {
					result.failed.push(PageFailure {
						path: page.source,
						error,
					});
				}
			}
		}
	}

	/// Copy one asset byte-for-byte and return its destination.
	pub(crate) fn copy_asset(&self, asset: &Path) -> PageBuilderResult<PathBuf> {
		let destination = self.asset_destination(asset);
		let bytes = std::fs::read(asset).map_err(|e| PageBuilderError::io(asset, "read", e))?;
		write_atomic(&destination, &bytes)?;
		Ok(destination)
	}

	/// Where the page at `path` is written.
	///
	/// `pages/blog/post.html` becomes `dist/blog/post.html`, or
	/// `dist/blog/post/index.html` with pretty URLs.
	pub fn destination_for(&self, path: &Path) -> PathBuf {
		let relative = path.strip_prefix(&self.options.pages_dir).unwrap_or(path);
		let extension = self.options.output_extension.as_str();
		let stem = relative
			.file_stem()
			.map(|stem| stem.to_string_lossy().into_owned())
			.unwrap_or_default();
		let parent = self.options.dist_dir.join(relative.parent().unwrap_or(Path::new("")));

		if self.options.pretty_urls && stem != "index" {
			parent.join(stem).join(with_extension("index", extension))
		} else {
			parent.join(with_extension(&stem, extension))
		}
	}

	/// Where the asset at `path` is copied.
	pub fn asset_destination(&self, path: &Path) -> PathBuf {
		let relative = path.strip_prefix(&self.options.assets_dir).unwrap_or(path);
		self.options.dist_dir.join(relative)
	}

	/// Every page path, whether or not it parsed.
	pub fn pages(&self) -> impl Iterator<Item = &PathBuf> {
		self.store.paths_of(SourceKind::Page)
	}
}

fn missing_source(path: &Path) -> PageBuilderError {
	PageBuilderError::io(
		path,
		"read",
		std::io::Error::new(std::io::ErrorKind::NotFound, "source is not loaded"),
	)
}

fn with_extension(stem: &str, extension: &str) -> String {
	if extension.is_empty() {
		stem.to_string()
	} else {
		format!("{stem}.{extension}")
	}
}

/// Write `bytes` to a temporary sibling of `path` and rename it into place,
/// so readers never observe a partial file. Returns `false` without touching
/// the file when it already has this content.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> PageBuilderResult<bool> {
	if std::fs::read(path).is_ok_and(|existing| existing == bytes) {
		return Ok(false);
	}

	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)
			.map_err(|e| PageBuilderError::io(parent, "create directory", e))?;
	}

	let file_name = path
		.file_name()
		.map(|name| name.to_string_lossy().into_owned())
		.unwrap_or_default();
	let temp_path = path.with_file_name(format!(
		".{file_name}.tmp-{}-{}",
		std::process::id(),
		std::time::SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map_or(0, |duration| duration.as_nanos())
	));

	std::fs::write(&temp_path, bytes).map_err(|e| PageBuilderError::io(&temp_path, "write", e))?;

	if let Err(e) = std::fs::rename(&temp_path, path) {
		let _ = std::fs::remove_file(&temp_path);
		return Err(PageBuilderError::io(path, "rename", e));
	}

	Ok(true)
}

/// Delete every file under `dist` not in `keep`, then any directories left
/// empty. Returns the deleted files, sorted.
fn prune_output(dist: &Path, keep: &BTreeSet<PathBuf>) -> PageBuilderResult<Vec<PathBuf>> {
	let mut pruned = Vec::new();
	if dist.is_dir() {
		prune_dir(dist, keep, &mut pruned)?;
	}
	pruned.sort();

	for path in &pruned {
		tracing::debug!(path = %path.display(), "pruned stale output");
	}

	Ok(pruned)
}

fn prune_dir(dir: &Path, keep: &BTreeSet<PathBuf>, pruned: &mut Vec<PathBuf>) -> PageBuilderResult<()> {
	let entries = std::fs::read_dir(dir).map_err(|e| PageBuilderError::io(dir, "read directory", e))?;

	for entry in entries {
		let entry = entry.map_err(|e| PageBuilderError::io(dir, "read directory", e))?;
		let path = entry.path();
		let file_type = entry
			.file_type()
			.map_err(|e| PageBuilderError::io(&path, "read metadata", e))?;

		if file_type.is_dir() {
			prune_dir(&path, keep, pruned)?;
			if is_empty_dir(&path) {
				std::fs::remove_dir(&path)
					.map_err(|e| PageBuilderError::io(&path, "remove directory", e))?;
			}
		} else if !keep.contains(&path) {
			std::fs::remove_file(&path).map_err(|e| PageBuilderError::io(&path, "remove", e))?;
			pruned.push(path);
		}
	}

	Ok(())
}

fn is_empty_dir(path: &Path) -> bool {
	std::fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}

/// Remove one output file and any parent directories it leaves empty, up to
/// `dist`.
pub(crate) fn remove_output(dist: &Path, path: &Path) -> PageBuilderResult<bool> {
	match std::fs::remove_file(path) {
		Ok(()) => {}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
		Err(e) => return Err(PageBuilderError::io(path, "remove", e)),
	}

	let mut current = path.parent();
	while let Some(dir) = current {
		if dir == dist || !dir.starts_with(dist) || !is_empty_dir(dir) {
			break;
		}
		let _ = std::fs::remove_dir(dir);
		current = dir.parent();
	}

	Ok(true)
}
