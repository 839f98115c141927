use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::Metadata;
use crate::PageBuilderError;
use crate::PageBuilderResult;

/// Supported config file locations in discovery order (highest precedence
/// first).
pub const CONFIG_FILE_CANDIDATES: [&str; 3] = [
	"pagebuilder.toml",
	".pagebuilder.toml",
	".config/pagebuilder.toml",
];

/// Default extension for pages and templates.
pub const DEFAULT_EXTENSION: &str = "html";

/// Default debounce interval for watch mode.
pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// Configuration loaded from a `pagebuilder.toml` file.
///
/// ```toml
/// [paths]
/// pages = "pages"
/// templates = "templates"
/// assets = "assets"
/// dist = "dist"
///
/// [build]
/// extension = "html"
/// pretty_urls = false
/// prune = false
/// slot_without_template = "fail"
/// on_page_error = "abort"
///
/// [frontmatter]
/// start = "---\n"
/// end = "---\n"
///
/// [watch]
/// debounce_ms = 200
///
/// [exclude]
/// patterns = ["drafts/"]
///
/// [data]
/// site_name = "Example"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct PageBuilderConfig {
	/// Source and output directories, relative to the project root.
	#[serde(default)]
	pub paths: PathsConfig,
	/// Build behavior.
	#[serde(default)]
	pub build: BuildConfig,
	/// Metadata block delimiters.
	#[serde(default)]
	pub frontmatter: FrontmatterConfig,
	/// Watch mode settings.
	#[serde(default)]
	pub watch: WatchConfig,
	/// Gitignore-style patterns excluded from scanning.
	#[serde(default)]
	pub exclude: ExcludeConfig,
	/// Site-wide data available to every page with the lowest precedence.
	#[serde(default)]
	pub data: toml::Table,
}

#[derive(Debug, Deserialize)]
pub struct PathsConfig {
	#[serde(default = "default_pages_dir")]
	pub pages: PathBuf,
	#[serde(default = "default_templates_dir")]
	pub templates: PathBuf,
	#[serde(default = "default_assets_dir")]
	pub assets: PathBuf,
	#[serde(default = "default_dist_dir")]
	pub dist: PathBuf,
}

impl Default for PathsConfig {
	fn default() -> Self {
		Self {
			pages: default_pages_dir(),
			templates: default_templates_dir(),
			assets: default_assets_dir(),
			dist: default_dist_dir(),
		}
	}
}

fn default_pages_dir() -> PathBuf {
	PathBuf::from("pages")
}

fn default_templates_dir() -> PathBuf {
	PathBuf::from("templates")
}

fn default_assets_dir() -> PathBuf {
	PathBuf::from("assets")
}

fn default_dist_dir() -> PathBuf {
	PathBuf::from("dist")
}

#[derive(Debug, Deserialize)]
pub struct BuildConfig {
	/// Extension (without the dot) of page and template files.
	#[serde(default = "default_extension")]
	pub extension: String,
	/// Extension (without the dot) given to rendered pages.
	#[serde(default = "default_extension")]
	pub output_extension: String,
	/// Write `about.html` as `about/index.html`.
	#[serde(default)]
	pub pretty_urls: bool,
	/// Delete output files that no source produced after a full build.
	#[serde(default)]
	pub prune: bool,
	/// What to do with a template-less page whose body references `slot`.
	#[serde(default)]
	pub slot_without_template: SlotPolicy,
	/// Whether a failing page stops a full build from writing any output.
	#[serde(default)]
	pub on_page_error: OnPageError,
}

impl Default for BuildConfig {
	fn default() -> Self {
		Self {
			extension: default_extension(),
			output_extension: default_extension(),
			pretty_urls: false,
			prune: false,
			slot_without_template: SlotPolicy::default(),
			on_page_error: OnPageError::default(),
		}
	}
}

fn default_extension() -> String {
	DEFAULT_EXTENSION.to_string()
}

/// Handling of the `slot` placeholder in a page that has no template, and so
/// nothing to fill it with.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotPolicy {
	/// Reject the page with [`PageBuilderError::SlotWithoutTemplate`].
	#[default]
	Fail,
	/// Leave the placeholder text in the output verbatim.
	Passthrough,
}

/// How a build treats per-page failures.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnPageError {
	/// Render every page and collect every failure, but write nothing when
	/// any page failed.
	#[default]
	Abort,
	/// Write the pages that succeeded; failed pages keep their previous
	/// output.
	Skip,
}

/// Delimiters surrounding the metadata block at the top of a page or
/// template.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FrontmatterConfig {
	#[serde(default = "default_delimiter")]
	pub start: String,
	#[serde(default = "default_delimiter")]
	pub end: String,
}

impl Default for FrontmatterConfig {
	fn default() -> Self {
		Self {
			start: default_delimiter(),
			end: default_delimiter(),
		}
	}
}

fn default_delimiter() -> String {
	"---\n".to_string()
}

#[derive(Debug, Deserialize)]
pub struct WatchConfig {
	/// Quiet period after the last change event before a rebuild starts.
	#[serde(default = "default_debounce_ms")]
	pub debounce_ms: u64,
}

impl Default for WatchConfig {
	fn default() -> Self {
		Self {
			debounce_ms: default_debounce_ms(),
		}
	}
}

fn default_debounce_ms() -> u64 {
	DEFAULT_DEBOUNCE_MS
}

/// Configuration for excluding files and directories from scanning.
///
/// Patterns follow gitignore syntax, relative to each source root. Supports
/// negation (`!pattern`), directory markers (trailing `/`), and all standard
/// gitignore wildcards.
#[derive(Debug, Default, Deserialize)]
pub struct ExcludeConfig {
	#[serde(default)]
	pub patterns: Vec<String>,
}

impl PageBuilderConfig {
	/// Resolve the config path from known discovery candidates.
	#[must_use]
	pub fn resolve_path(root: &Path) -> Option<PathBuf> {
		CONFIG_FILE_CANDIDATES
			.iter()
			.map(|candidate| root.join(candidate))
			.find(|path| path.is_file())
	}

	/// Load the config from the first discovered config file at `root`.
	/// Returns `None` if no config file exists.
	pub fn load(root: &Path) -> PageBuilderResult<Option<PageBuilderConfig>> {
		let Some(config_path) = Self::resolve_path(root) else {
			return Ok(None);
		};

		let content = std::fs::read_to_string(&config_path)
			.map_err(|e| PageBuilderError::io(&config_path, "read", e))?;
		let config: PageBuilderConfig =
			toml::from_str(&content).map_err(|e| {
				PageBuilderError::ConfigParse {
					path: config_path.clone(),
					reason: e.to_string(),
				}
			})?;

		Ok(Some(config))
	}

	/// Convert the `[data]` table into metadata values.
	pub fn shared_data(&self) -> Metadata {
		self.data
			.iter()
			.map(|(key, value)| (key.clone(), toml_to_json(value.clone())))
			.collect()
	}
}

/// Fully resolved settings for a [`Builder`](crate::Builder).
#[derive(Debug, Clone)]
pub struct BuildOptions {
	pub pages_dir: PathBuf,
	pub templates_dir: PathBuf,
	/// Optional; a missing directory is skipped.
	pub assets_dir: PathBuf,
	pub dist_dir: PathBuf,
	pub extension: String,
	pub output_extension: String,
	pub pretty_urls: bool,
	pub prune: bool,
	pub slot_policy: SlotPolicy,
	pub on_page_error: OnPageError,
	pub frontmatter: FrontmatterConfig,
	pub shared_data: Metadata,
	pub exclude_patterns: Vec<String>,
	pub debounce: Duration,
}

impl BuildOptions {
	/// Options with default settings for the four directories.
	pub fn new(
		pages_dir: impl Into<PathBuf>,
		templates_dir: impl Into<PathBuf>,
		assets_dir: impl Into<PathBuf>,
		dist_dir: impl Into<PathBuf>,
	) -> Self {
		let build = BuildConfig::default();
		Self {
			pages_dir: pages_dir.into(),
			templates_dir: templates_dir.into(),
			assets_dir: assets_dir.into(),
			dist_dir: dist_dir.into(),
			extension: build.extension,
			output_extension: build.output_extension,
			pretty_urls: build.pretty_urls,
			prune: build.prune,
			slot_policy: build.slot_without_template,
			on_page_error: build.on_page_error,
			frontmatter: FrontmatterConfig::default(),
			shared_data: BTreeMap::new(),
			exclude_patterns: Vec::new(),
			debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
		}
	}

	/// Construct [`BuildOptions`] for the project at `root`, with directories
	/// resolved against it.
	pub fn from_config(root: &Path, config: Option<&PageBuilderConfig>) -> Self {
		let Some(config) = config else {
			let paths = PathsConfig::default();
			return Self::new(
				root.join(paths.pages),
				root.join(paths.templates),
				root.join(paths.assets),
				root.join(paths.dist),
			);
		};

		Self {
			pages_dir: root.join(&config.paths.pages),
			templates_dir: root.join(&config.paths.templates),
			assets_dir: root.join(&config.paths.assets),
			dist_dir: root.join(&config.paths.dist),
			extension: normalize_extension(&config.build.extension),
			output_extension: normalize_extension(&config.build.output_extension),
			pretty_urls: config.build.pretty_urls,
			prune: config.build.prune,
			slot_policy: config.build.slot_without_template,
			on_page_error: config.build.on_page_error,
			frontmatter: config.frontmatter.clone(),
			shared_data: config.shared_data(),
			exclude_patterns: config.exclude.patterns.clone(),
			debounce: Duration::from_millis(config.watch.debounce_ms),
		}
	}

	/// Discover and load the project config at `root`.
	pub fn load(root: &Path) -> PageBuilderResult<Self> {
		let config = PageBuilderConfig::load(root)?;
		Ok(Self::from_config(root, config.as_ref()))
	}
}

/// Accept both `html` and `.html`.
fn normalize_extension(extension: &str) -> String {
	extension.trim().trim_start_matches('.').to_string()
}

/// Convert a `toml::Value` to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
	match value {
		toml::Value::String(s) => serde_json::Value::String(s),
		toml::Value::Integer(i) => serde_json::Value::from(i),
		toml::Value::Float(f) => {
			serde_json::Number::from_f64(f)
				.map_or(serde_json::Value::Null, serde_json::Value::Number)
		}
		toml::Value::Boolean(b) => serde_json::Value::Bool(b),
		toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
		toml::Value::Array(arr) => {
			serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
		}
		toml::Value::Table(table) => {
			serde_json::Value::Object(
				table
					.into_iter()
					.map(|(k, v)| (k, toml_to_json(v)))
					.collect(),
			)
		}
	}
}
