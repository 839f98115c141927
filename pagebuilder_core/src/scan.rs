use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use ignore::gitignore::Gitignore;
use ignore::gitignore::GitignoreBuilder;

use crate::PageBuilderError;
use crate::PageBuilderResult;

/// Walks one source root, skipping hidden entries and anything matched by the
/// `[exclude]` patterns.
#[derive(Debug, Clone)]
pub struct RootScanner {
	root: PathBuf,
	exclude: Gitignore,
}

impl RootScanner {
	pub fn new(root: impl Into<PathBuf>, exclude_patterns: &[String]) -> PageBuilderResult<Self> {
		let root = root.into();
		let exclude = build_exclude_matcher(&root, exclude_patterns)?;
		Ok(Self { root, exclude })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Whether `path` lies under this root.
	pub fn contains(&self, path: &Path) -> bool {
		path.starts_with(&self.root)
	}

	/// Whether `path` (or one of its parents below the root) is hidden or
	/// excluded. Paths outside the root are always excluded.
	pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
		let Ok(relative) = path.strip_prefix(&self.root) else {
			return true;
		};

		if relative.components().any(|component| {
			component
				.as_os_str()
				.to_str()
				.is_some_and(is_hidden_name)
		}) {
			return true;
		}

		self.exclude
			.matched_path_or_any_parents(path, is_dir)
			.is_ignore()
	}

	/// Collect every file under the root accepted by `accept`, sorted. A
	/// missing root yields no files.
	pub fn collect(&self, accept: impl Fn(&Path) -> bool) -> PageBuilderResult<Vec<PathBuf>> {
		let mut files = Vec::new();
		let mut visited_dirs = HashSet::new();
		self.walk_dir(&self.root, &accept, &mut files, &mut visited_dirs)?;
		files.sort();
		Ok(files)
	}

	fn walk_dir(
		&self,
		dir: &Path,
		accept: &impl Fn(&Path) -> bool,
		files: &mut Vec<PathBuf>,
		visited_dirs: &mut HashSet<PathBuf>,
	) -> PageBuilderResult<()> {
		if !dir.is_dir() {
			return Ok(());
		}

		// Detect symlink cycles by tracking canonical paths.
		let canonical = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
		if !visited_dirs.insert(canonical) {
			return Err(PageBuilderError::SymlinkCycle {
				path: dir.to_path_buf(),
			});
		}

		let entries =
			std::fs::read_dir(dir).map_err(|e| PageBuilderError::io(dir, "read directory", e))?;

		for entry in entries {
			let entry = entry.map_err(|e| PageBuilderError::io(dir, "read directory", e))?;
			let path = entry.path();

			if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
				if is_hidden_name(name) {
					continue;
				}
			}

			let is_dir = path.is_dir();
			if self.exclude.matched(&path, is_dir).is_ignore() {
				continue;
			}

			if is_dir {
				self.walk_dir(&path, accept, files, visited_dirs)?;
			} else if accept(&path) {
				files.push(path);
			}
		}

		Ok(())
	}
}

/// Build a `Gitignore` matcher from `[exclude]` patterns, relative to `root`.
fn build_exclude_matcher(root: &Path, patterns: &[String]) -> PageBuilderResult<Gitignore> {
	let config_path = PathBuf::from("pagebuilder.toml");
	let mut builder = GitignoreBuilder::new(root);
	for pattern in patterns {
		builder.add_line(None, pattern).map_err(|e| {
			PageBuilderError::ConfigParse {
				path: config_path.clone(),
				reason: format!("invalid exclude pattern `{pattern}`: {e}"),
			}
		})?;
	}
	builder.build().map_err(|e| {
		PageBuilderError::ConfigParse {
			path: config_path,
			reason: format!("failed to build exclude rules: {e}"),
		}
	})
}

fn is_hidden_name(name: &str) -> bool {
	name.starts_with('.')
}

/// Whether `path` has the source extension `extension` (without the dot).
pub fn has_extension(path: &Path, extension: &str) -> bool {
	path.extension()
		.and_then(|ext| ext.to_str())
		.is_some_and(|ext| ext == extension)
}

/// Editor swap files, backups and other transient files that never count as
/// source changes.
pub fn is_temporary_file(path: &Path) -> bool {
	let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
		return true;
	};

	is_hidden_name(name)
		|| name.ends_with('~')
		|| name.starts_with('#')
		|| [".swp", ".swx", ".swo", ".tmp", ".bak", ".crdownload"]
			.iter()
			.any(|suffix| name.ends_with(suffix))
}
