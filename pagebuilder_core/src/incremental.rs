use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::time::Instant;

use crate::Builder;
use crate::BuildResult;
use crate::PageBuilderResult;
use crate::PageFailure;
use crate::SourceKind;
use crate::has_extension;
use crate::is_temporary_file;
use crate::pipeline::remove_output;
use crate::template_name;

/// Changed source paths grouped by the root they belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
	pub pages: BTreeSet<PathBuf>,
	pub templates: BTreeSet<PathBuf>,
	pub assets: BTreeSet<PathBuf>,
}

impl ChangeSet {
	pub fn is_empty(&self) -> bool {
		self.pages.is_empty() && self.templates.is_empty() && self.assets.is_empty()
	}

	pub fn len(&self) -> usize {
		self.pages.len() + self.templates.len() + self.assets.len()
	}
}

impl Builder {
	/// The source roots that exist on disk and should be watched.
	pub fn watched_roots(&self) -> Vec<PathBuf> {
		self.source_roots().filter(|root| root.is_dir()).cloned().collect()
	}

	/// The source roots that do not exist yet.
	pub fn missing_roots(&self) -> Vec<PathBuf> {
		self.source_roots().filter(|root| !root.is_dir()).cloned().collect()
	}

	fn source_roots(&self) -> impl Iterator<Item = &PathBuf> {
		[&self.options.pages_dir, &self.options.templates_dir, &self.options.assets_dir].into_iter()
	}

	/// Sort raw change paths into pages, templates and assets. Paths outside
	/// every root, excluded paths and editor temporary files are dropped. A
	/// directory expands to the sources under it, on disk and in the store.
	pub fn classify(&self, paths: impl IntoIterator<Item = PathBuf>) -> ChangeSet {
		let mut changes = ChangeSet::default();

		for path in paths {
			if is_temporary_file(&path) {
				continue;
			}

			let Some(kind) = self.kind_of(&path) else {
				continue;
			};

			for file in self.expand(&path, kind) {
				let is_source = has_extension(&file, &self.options.extension);
				match kind {
					SourceKind::Page if is_source => changes.pages.insert(file),
					SourceKind::Template if is_source => changes.templates.insert(file),
					SourceKind::Asset => changes.assets.insert(file),
					SourceKind::Page | SourceKind::Template => false,
				};
			}
		}

		changes
	}

	fn kind_of(&self, path: &Path) -> Option<SourceKind> {
		let is_dir = path.is_dir();
		[
			(&self.templates, SourceKind::Template),
			(&self.pages, SourceKind::Page),
			(&self.assets, SourceKind::Asset),
		]
		.into_iter()
		.find(|(scanner, _)| scanner.contains(path))
		.filter(|(scanner, _)| !scanner.is_excluded(path, is_dir))
		.map(|(_, kind)| kind)
	}

	fn expand(&self, path: &Path, kind: SourceKind) -> Vec<PathBuf> {
		let known: Vec<&PathBuf> = match kind {
			SourceKind::Asset => self.asset_sources.iter().collect(),
			SourceKind::Page | SourceKind::Template => self.store.paths_of(kind).collect(),
		};
		let mut files: BTreeSet<PathBuf> = known
			.into_iter()
			.filter(|known| known.starts_with(path) && known.as_path() != path)
			.cloned()
			.collect();

		if path.is_dir() {
			let scanner = match kind {
				SourceKind::Page => &self.pages,
				SourceKind::Template => &self.templates,
				SourceKind::Asset => &self.assets,
			};
			if let Ok(found) = scanner.collect(|file| file.starts_with(path)) {
				files.extend(found);
			}
		} else if files.is_empty() {
			files.insert(path.to_path_buf());
		}

		files.into_iter().collect()
	}

	/// Apply `changes` and re-render only the pages they affect.
	///
	/// Template changes re-index the graph; a duplicate name or cycle is
	/// returned as `Err` and nothing is re-rendered. Pages re-render when
	/// they changed themselves, when their previous or current chain passes
	/// through a changed template, or, if templates were added or removed,
	/// when their last resolution hit an unknown template. Failed pages keep
	/// their previous output.
	pub fn rebuild(&mut self, changes: &ChangeSet) -> PageBuilderResult<BuildResult> {
		let started = Instant::now();
		let mut result = BuildResult::default();

		self.apply_asset_changes(&changes.assets, &mut result);

		let mut changed_names = BTreeSet::new();
		let mut structural = false;
		for path in &changes.templates {
			changed_names.insert(template_name(path));
			if path.is_file() {
				structural |= !self.store.contains(path);
				self.store
					.load(path, &self.options.templates_dir, SourceKind::Template);
			} else {
				structural |= self.store.remove(path).is_some();
			}
		}

		for path in &changes.pages {
			if path.is_file() {
				self.store.load(path, &self.options.pages_dir, SourceKind::Page);
			} else if self.store.remove(path).is_some() {
				self.resolutions.remove(path);
				if self.options.prune {
					let destination = self.destination_for(path);
					match remove_output(&self.options.dist_dir, &destination) {
						Ok(true) => result.pruned.push(destination),
						Ok(false) => {}
						Err(error) => {
							result.failed.push(PageFailure {
								path: path.clone(),
								error,
							});
						}
					}
				}
			}
		}

		let was_stale = self.graph_stale;
		if !changes.templates.is_empty() || was_stale {
			self.rebuild_graph()?;
		}

		let mut affected: BTreeSet<PathBuf> = self
			.resolutions
			.iter()
			.filter(|(_, resolution)| {
				resolution
					.templates
					.iter()
					.any(|name| changed_names.contains(name))
					|| (structural && resolution.missing.is_some())
			})
			.map(|(path, _)| path.clone())
			.collect();

		// Changes made while the graph was invalid were never rendered.
		if was_stale {
			affected.extend(self.store.paths_of(SourceKind::Page).cloned());
		}
		affected.extend(changes.pages.iter().cloned());
		affected.extend(self.graph.reverse_dependencies(&self.store, &changed_names));
		affected.retain(|path| self.store.contains(path));

		let pages: Vec<PathBuf> = affected.into_iter().collect();
		let mut rendered = self.render_pages(&pages);
		self.write_pages(&mut rendered);

		result.succeeded = rendered.succeeded;
		result.failed.extend(rendered.failed);
		result.written = true;

		tracing::info!(
			changes = changes.len(),
			pages = result.succeeded.len(),
			failed = result.failed.len(),
			assets = result.assets,
			elapsed_ms = started.elapsed().as_millis(),
			"rebuild finished"
		);

		Ok(result)
	}

	fn apply_asset_changes(&mut self, assets: &BTreeSet<PathBuf>, result: &mut BuildResult) {
		for asset in assets {
			if asset.is_file() {
				match self.copy_asset(asset) {
					Ok(_) => {
						result.assets += 1;
						self.asset_sources.insert(asset.clone());
					}
					Err(error) => {
						result.failed.push(PageFailure {
							path: asset.clone(),
							error,
						});
					}
				}
				continue;
			}

			if !self.asset_sources.remove(asset) || !self.options.prune {
				continue;
			}

			let destination = self.asset_destination(asset);
			match remove_output(&self.options.dist_dir, &destination) {
				Ok(true) => result.pruned.push(destination),
				Ok(false) => {}
				Err(error) => {
					result.failed.push(PageFailure {
						path: asset.clone(),
						error,
					});
				}
			}
		}
	}
}
