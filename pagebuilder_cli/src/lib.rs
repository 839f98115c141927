use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;

pub use serve::*;

mod serve;

#[derive(Parser)]
#[command(
	author,
	version,
	about = "Build static HTML pages from nested templates.",
	long_about = "pagebuilder renders every page under `pages/` through its chain of named \
	              templates and writes the result to `dist/`, copying `assets/` alongside.\n\nA \
	              page names its template with a `template` key in its metadata block, and each \
	              template receives the rendered page as `{{{ slot }}}`.\n\nQuick start:\n  \
	              pagebuilder init   Create a sample site\n  pagebuilder build  Render every \
	              page once\n  pagebuilder watch  Rebuild on change and serve `dist/`\n  \
	              pagebuilder list   Show pages and their template chains"
)]
pub struct PageBuilderCli {
	#[command(subcommand)]
	pub command: Option<Commands>,

	/// Path to the project root directory.
	#[arg(long, short, global = true)]
	pub path: Option<PathBuf>,

	/// Enable verbose output.
	#[arg(long, short, global = true, default_value_t = false)]
	pub verbose: bool,

	/// Disable colored output.
	#[arg(long, global = true, default_value_t = false)]
	pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Create a sample site in the project root.
	///
	/// Writes a `pagebuilder.toml`, a base template, an index page and a
	/// stylesheet. Existing files are left untouched.
	Init,
	/// Render every page and copy every asset into the output directory.
	///
	/// Exits with status 1 when any page failed and 2 when the build could
	/// not run at all (for example a template cycle or a duplicate template
	/// name).
	Build {
		/// Delete files in the output directory that no page or asset
		/// produces anymore.
		#[arg(long, default_value_t = false)]
		prune: bool,
	},
	/// Build once, then rebuild incrementally whenever a source changes.
	///
	/// Only the pages affected by a change are re-rendered. The output
	/// directory is served over HTTP unless `--no-serve` is given.
	Watch {
		/// Address the development server listens on.
		#[arg(long, default_value = "localhost:5000")]
		addr: String,

		/// Do not start the development server.
		#[arg(long, default_value_t = false)]
		no_serve: bool,
	},
	/// List every page with its template chain, and every template.
	List,
}
