use std::path::Path;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum PageBuilderError {
	#[error("failed to {operation} `{}`: {source}", path.display())]
	#[diagnostic(code(pagebuilder::io_error))]
	Io {
		path: PathBuf,
		operation: &'static str,
		#[source]
		source: std::io::Error,
	},

	#[error("malformed metadata block in `{}`: {reason}", path.display())]
	#[diagnostic(
		code(pagebuilder::parse),
		help("the metadata block must be a YAML mapping between the configured delimiters")
	)]
	Parse { path: PathBuf, reason: String },

	#[error("unknown template `{name}` referenced by `{}`", path.display())]
	#[diagnostic(
		code(pagebuilder::unknown_template),
		help("create `{name}.html` in the templates directory or fix the `template` key")
	)]
	UnknownTemplate { name: String, path: PathBuf },

	#[error("template cycle detected: {}", format_chain(chain))]
	#[diagnostic(
		code(pagebuilder::template_cycle),
		help("a template must not (directly or indirectly) extend itself")
	)]
	Cycle { chain: Vec<PathBuf> },

	#[error("duplicate template name `{name}`: defined in {}", format_paths(paths))]
	#[diagnostic(
		code(pagebuilder::duplicate_template),
		help("template names are derived from file names and must be unique across the templates directory")
	)]
	DuplicateTemplateName { name: String, paths: Vec<PathBuf> },

	#[error("failed to render `{}`: {message}", path.display())]
	#[diagnostic(code(pagebuilder::render))]
	Render { path: PathBuf, message: String },

	#[error("`{}` uses the `slot` placeholder but has no template", path.display())]
	#[diagnostic(
		code(pagebuilder::slot_without_template),
		help("add a `template` key, or set `slot_without_template = \"passthrough\"` in pagebuilder.toml")
	)]
	SlotWithoutTemplate { path: PathBuf },

	#[error("failed to parse config file `{}`: {reason}", path.display())]
	#[diagnostic(
		code(pagebuilder::config_parse),
		help("check that pagebuilder.toml is valid TOML")
	)]
	ConfigParse { path: PathBuf, reason: String },

	#[error("symlink cycle detected at: `{}`", path.display())]
	#[diagnostic(
		code(pagebuilder::symlink_cycle),
		help("remove the circular symlink or exclude this path")
	)]
	SymlinkCycle { path: PathBuf },

	#[error("file watcher failed for `{}`: {reason}", path.display())]
	#[diagnostic(code(pagebuilder::watch))]
	Watch { path: PathBuf, reason: String },
}

impl PageBuilderError {
	pub fn io(path: impl Into<PathBuf>, operation: &'static str, source: std::io::Error) -> Self {
		Self::Io {
			path: path.into(),
			operation,
			source,
		}
	}

	/// Errors that invalidate the whole template configuration. A build that
	/// hits one of these writes nothing.
	pub fn is_global(&self) -> bool {
		matches!(
			self,
			Self::Cycle { .. } | Self::DuplicateTemplateName { .. } | Self::ConfigParse { .. }
		)
	}

	/// The file this error originated from.
	pub fn path(&self) -> &Path {
		match self {
			Self::Io { path, .. }
			| Self::Parse { path, .. }
			| Self::UnknownTemplate { path, .. }
			| Self::Render { path, .. }
			| Self::SlotWithoutTemplate { path }
			| Self::ConfigParse { path, .. }
			| Self::SymlinkCycle { path }
			| Self::Watch { path, .. } => path,
			Self::Cycle { chain } => chain.first().map_or(Path::new(""), PathBuf::as_path),
			Self::DuplicateTemplateName { paths, .. } => {
				paths.first().map_or(Path::new(""), PathBuf::as_path)
			}
		}
	}
}

fn format_chain(chain: &[PathBuf]) -> String {
	chain
		.iter()
		.map(|path| format!("`{}`", path.display()))
		.collect::<Vec<_>>()
		.join(" -> ")
}

fn format_paths(paths: &[PathBuf]) -> String {
	paths
		.iter()
		.map(|path| format!("`{}`", path.display()))
		.collect::<Vec<_>>()
		.join(", ")
}

pub type PageBuilderResult<T> = Result<T, PageBuilderError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
