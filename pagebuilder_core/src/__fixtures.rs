use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use tempfile::TempDir;

use crate::BuildOptions;
use crate::Builder;
use crate::FrontmatterConfig;
use crate::Metadata;
use crate::MustacheRenderer;
use crate::Render;
use crate::RenderContext;
use crate::SourceFile;
use crate::SourceKind;

/// A throwaway site with `pages/`, `templates/`, `assets/` and `dist/`.
pub struct Site {
	dir: TempDir,
}

impl Site {
	pub fn new() -> Self {
		let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
		for root in ["pages", "templates", "assets"] {
			std::fs::create_dir_all(dir.path().join(root)).unwrap_or_else(|e| panic!("mkdir: {e}"));
		}
		Self { dir }
	}

	pub fn root(&self) -> &Path {
		self.dir.path()
	}

	pub fn path(&self, relative: &str) -> PathBuf {
		self.dir.path().join(relative)
	}

	pub fn write(&self, relative: &str, content: impl AsRef<[u8]>) -> PathBuf {
		let path = self.path(relative);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).unwrap_or_else(|e| panic!("mkdir: {e}"));
		}
		std::fs::write(&path, content).unwrap_or_else(|e| panic!("write {relative}: {e}"));
		path
	}

	pub fn remove(&self, relative: &str) -> PathBuf {
		let path = self.path(relative);
		std::fs::remove_file(&path).unwrap_or_else(|e| panic!("remove {relative}: {e}"));
		path
	}

	pub fn read(&self, relative: &str) -> String {
		std::fs::read_to_string(self.path(relative)).unwrap_or_else(|e| panic!("read {relative}: {e}"))
	}

	pub fn exists(&self, relative: &str) -> bool {
		self.path(relative).exists()
	}

	pub fn options(&self) -> BuildOptions {
		BuildOptions::new(
			self.path("pages"),
			self.path("templates"),
			self.path("assets"),
			self.path("dist"),
		)
	}

	pub fn builder(&self) -> Builder {
		self.builder_with(self.options())
	}

	pub fn builder_with(&self, options: BuildOptions) -> Builder {
		Builder::new(options).unwrap_or_else(|e| panic!("builder: {e}"))
	}

	/// Every file under `dist/` with its bytes.
	pub fn dist_files(&self) -> BTreeMap<PathBuf, Vec<u8>> {
		let mut files = BTreeMap::new();
		collect_files(&self.path("dist"), &self.path("dist"), &mut files);
		files
	}
}

fn collect_files(root: &Path, dir: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
	let Ok(entries) = std::fs::read_dir(dir) else {
		return;
	};

	for entry in entries.flatten() {
		let path = entry.path();
		if path.is_dir() {
			collect_files(root, &path, files);
		} else {
			let bytes = std::fs::read(&path).unwrap_or_else(|e| panic!("read: {e}"));
			let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
			files.insert(relative, bytes);
		}
	}
}

/// One recorded render call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCall {
	pub source: String,
	pub slot: Option<String>,
}

/// Renders with [`MustacheRenderer`] and records every call.
#[derive(Debug, Default)]
pub struct CountingRenderer {
	inner: MustacheRenderer,
	calls: Mutex<Vec<RenderCall>>,
}

impl CountingRenderer {
	pub fn shared() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn calls(&self) -> Vec<RenderCall> {
		self.calls
			.lock()
			.unwrap_or_else(|e| panic!("lock: {e}"))
			.clone()
	}
}

impl Render for CountingRenderer {
	fn render(&self, source: &str, context: &RenderContext<'_>) -> Result<String, String> {
		self.calls
			.lock()
			.unwrap_or_else(|e| panic!("lock: {e}"))
			.push(RenderCall {
				source: source.to_string(),
				slot: context.slot.map(str::to_string),
			});
		self.inner.render(source, context)
	}

	fn references_slot(&self, source: &str) -> bool {
		self.inner.references_slot(source)
	}
}

/// Parse an in-memory source file rooted at `/site`.
pub fn source(kind: SourceKind, path: &str, raw: &str) -> SourceFile {
	SourceFile::parse(
		Path::new(path),
		Path::new("/site"),
		kind,
		raw,
		&FrontmatterConfig::default(),
	)
	.unwrap_or_else(|e| panic!("parse {path}: {e}"))
}

/// A page whose `theme` overrides its template's, wrapped in a template
/// using escaped, raw and slot tags.
pub fn end_to_end_site() -> Site {
	let site = Site::new();
	site.write(
		"pages/index.html",
		"---\ntitle: Page Title\ntheme: light\ntemplate: main_template\n---\n<p>hello world</p>",
	);
	site.write(
		"templates/main_template.html",
		"---\ntheme: dark\n---\n<html><head><title>{{title}}</title></head><body \
		 class=\"{{{theme}}}\"><main>{{{slot}}}</main></body></html>\n",
	);
	site
}

/// Convert a JSON object literal into [`Metadata`].
pub fn metadata(value: serde_json::Value) -> Metadata {
	match value {
		serde_json::Value::Object(map) => map.into_iter().collect(),
		other => panic!("expected an object, found {other}"),
	}
}
