use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use crate::FrontmatterConfig;
use crate::PageBuilderError;
use crate::PageBuilderResult;
use crate::parse_frontmatter;

/// Metadata key naming the parent template.
pub const TEMPLATE_KEY: &str = "template";
/// Placeholder filled with the previous chain element's output.
pub const SLOT_KEY: &str = "slot";

/// Free-form metadata values, ordered by key.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Which source root a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
	Page,
	Template,
	Asset,
}

/// Reserved structural keys, kept apart from the data that gets merged into
/// the render context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
	/// Name of the parent template, if any.
	pub template: Option<String>,
}

/// A parsed page or template.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
	pub path: PathBuf,
	/// Path relative to the source root it was loaded from.
	pub relative_path: PathBuf,
	pub kind: SourceKind,
	pub header: Header,
	/// Metadata without the reserved keys.
	pub data: Metadata,
	pub body: String,
}

impl SourceFile {
	/// Parse raw file content. `root` is the source root `path` lives under.
	pub fn parse(
		path: &Path,
		root: &Path,
		kind: SourceKind,
		raw: &str,
		delimiters: &FrontmatterConfig,
	) -> PageBuilderResult<Self> {
		let frontmatter = parse_frontmatter(raw, delimiters, path)?;
		let mut data = frontmatter.metadata;

		let template = match data.remove(TEMPLATE_KEY) {
			None | Some(serde_json::Value::Null) => None,
			Some(serde_json::Value::String(name)) => {
				let name = name.trim().to_string();
				(!name.is_empty()).then_some(name)
			}
			Some(other) => {
				return Err(PageBuilderError::Parse {
					path: path.to_path_buf(),
					reason: format!("`{TEMPLATE_KEY}` must be a template name, found `{other}`"),
				});
			}
		};

		if data.remove(SLOT_KEY).is_some() {
			tracing::warn!(
				path = %path.display(),
				"`{SLOT_KEY}` is reserved and is ignored in metadata"
			);
		}

		Ok(Self {
			path: path.to_path_buf(),
			relative_path: path.strip_prefix(root).unwrap_or(path).to_path_buf(),
			kind,
			header: Header { template },
			data,
			body: frontmatter.body,
		})
	}

	/// The name other files use to reference this file as a template.
	pub fn name(&self) -> String {
		template_name(&self.path)
	}
}

/// Derive a template name from its file name: `layouts/main.html` → `main`.
pub fn template_name(path: &Path) -> String {
	path.file_stem()
		.map(|stem| stem.to_string_lossy().into_owned())
		.unwrap_or_default()
}

/// A cached load result.
#[derive(Debug, Clone)]
pub enum Loaded {
	Parsed(Arc<SourceFile>),
	/// The file could not be read or its metadata block was malformed.
	Failed { kind: SourceKind, reason: String },
}

impl Loaded {
	/// Turn a failed load into the error reported for `path`.
	pub fn error(&self, path: &Path) -> Option<PageBuilderError> {
		match self {
			Self::Parsed(_) => None,
			Self::Failed { reason, .. } => {
				Some(PageBuilderError::Parse {
					path: path.to_path_buf(),
					reason: reason.clone(),
				})
			}
		}
	}

	pub fn kind(&self) -> SourceKind {
		match self {
			Self::Parsed(file) => file.kind,
			Self::Failed { kind, .. } => *kind,
		}
	}
}

/// Cache of parsed pages and templates keyed by path. Entries are replaced
/// wholesale whenever the underlying file is reloaded.
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
	delimiters: FrontmatterConfig,
	entries: BTreeMap<PathBuf, Loaded>,
}

impl ContextStore {
	pub fn new(delimiters: FrontmatterConfig) -> Self {
		Self {
			delimiters,
			entries: BTreeMap::new(),
		}
	}

	/// Read and parse `path`, replacing any previous entry. Failures are
	/// cached too, so that anything depending on the file can report them.
	pub fn load(&mut self, path: &Path, root: &Path, kind: SourceKind) -> &Loaded {
		let loaded = match self.read(path, root, kind) {
			Ok(file) => Loaded::Parsed(Arc::new(file)),
			Err(error) => {
				tracing::debug!(path = %path.display(), %error, "failed to load source file");
				let reason = match error {
					PageBuilderError::Parse { reason, .. } => reason,
					other => other.to_string(),
				};
				Loaded::Failed { kind, reason }
			}
		};

		self.entries.insert(path.to_path_buf(), loaded);
		&self.entries[path]
	}

	fn read(&self, path: &Path, root: &Path, kind: SourceKind) -> PageBuilderResult<SourceFile> {
		let raw = std::fs::read_to_string(path).map_err(|e| PageBuilderError::io(path, "read", e))?;
		SourceFile::parse(path, root, kind, &raw, &self.delimiters)
	}

	/// Insert an already parsed file.
	pub fn insert(&mut self, file: SourceFile) {
		self.entries
			.insert(file.path.clone(), Loaded::Parsed(Arc::new(file)));
	}

	pub fn remove(&mut self, path: &Path) -> Option<Loaded> {
		self.entries.remove(path)
	}

	pub fn get(&self, path: &Path) -> Option<&Loaded> {
		self.entries.get(path)
	}

	/// The parsed file at `path`, if it loaded successfully.
	pub fn parsed(&self, path: &Path) -> Option<&Arc<SourceFile>> {
		match self.entries.get(path) {
			Some(Loaded::Parsed(file)) => Some(file),
			_ => None,
		}
	}

	pub fn contains(&self, path: &Path) -> bool {
		self.entries.contains_key(path)
	}

	/// Paths of every entry of `kind`, in path order.
	pub fn paths_of(&self, kind: SourceKind) -> impl Iterator<Item = &PathBuf> {
		self.entries
			.iter()
			.filter(move |(_, loaded)| loaded.kind() == kind)
			.map(|(path, _)| path)
	}

	pub fn entries_of(&self, kind: SourceKind) -> impl Iterator<Item = (&PathBuf, &Loaded)> {
		self.entries
			.iter()
			.filter(move |(_, loaded)| loaded.kind() == kind)
	}

	/// Drop every entry of `kind`.
	pub fn clear_kind(&mut self, kind: SourceKind) {
		self.entries.retain(|_, loaded| loaded.kind() != kind);
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
