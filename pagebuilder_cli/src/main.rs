use std::path::Path;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use clap::Parser;
use owo_colors::OwoColorize;
use pagebuilder_cli::Commands;
use pagebuilder_cli::DevServer;
use pagebuilder_cli::PageBuilderCli;
use pagebuilder_core::AnyError;
use pagebuilder_core::AnyResult;
use pagebuilder_core::BuildOptions;
use pagebuilder_core::BuildResult;
use pagebuilder_core::Builder;
use pagebuilder_core::Loaded;
use pagebuilder_core::OnPageError;
use pagebuilder_core::PageBuilderConfig;
use pagebuilder_core::PageBuilderError;
use pagebuilder_core::PageBuilderResult;
use pagebuilder_core::SourceKind;
use pagebuilder_core::template_name;
use tracing_subscriber::EnvFilter;

static USE_COLOR: AtomicBool = AtomicBool::new(true);

fn color_enabled() -> bool {
	USE_COLOR.load(Ordering::Relaxed)
}

/// Apply ANSI color codes only when color is enabled.
macro_rules! colored {
	($text:expr,red) => {
		if color_enabled() {
			format!("{}", $text.red())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,green) => {
		if color_enabled() {
			format!("{}", $text.green())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,yellow) => {
		if color_enabled() {
			format!("{}", $text.yellow())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,bold) => {
		if color_enabled() {
			format!("{}", $text.bold())
		} else {
			format!("{}", $text)
		}
	};
}

/// Exit status when a build finished but some pages failed.
const EXIT_PAGE_FAILURES: i32 = 1;
/// Exit status when the build could not run.
const EXIT_FATAL: i32 = 2;

fn main() {
	let args = PageBuilderCli::parse();

	// Respect NO_COLOR env var and --no-color flag.
	let use_color = !args.no_color && std::env::var_os("NO_COLOR").is_none();
	if !use_color {
		USE_COLOR.store(false, Ordering::Relaxed);
	}

	// Install miette's fancy handler for rich error diagnostics.
	miette::set_hook(Box::new(move |_| {
		Box::new(
			miette::MietteHandlerOpts::new()
				.color(use_color)
				.unicode(use_color)
				.build(),
		)
	}))
	.ok();

	init_tracing(args.verbose, use_color);

	let result = match &args.command {
		Some(Commands::Init) => run_init(&args),
		Some(Commands::Build { prune }) => run_build(&args, *prune),
		Some(Commands::Watch { addr, no_serve }) => run_watch(&args, addr, *no_serve),
		Some(Commands::List) => run_list(&args),
		None => {
			eprintln!("No subcommand specified. Run `pagebuilder --help` for usage.");
			process::exit(EXIT_FATAL);
		}
	};

	if let Err(e) = result {
		report_error(e);
		process::exit(EXIT_FATAL);
	}
}

fn init_tracing(verbose: bool, use_color: bool) {
	let default_level = if verbose { "debug" } else { "info" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(false)
		.with_ansi(use_color)
		.try_init()
		.ok();
}

/// Render through miette for rich diagnostics with help text and error codes.
fn report_error(error: AnyError) {
	match error.downcast::<PageBuilderError>() {
		Ok(error) => {
			let report: miette::Report = (*error).into();
			eprintln!("{report:?}");
		}
		Err(error) => {
			eprintln!("{} {error}", colored!("error:", red));
		}
	}
}

fn resolve_root(args: &PageBuilderCli) -> PathBuf {
	args.path
		.clone()
		.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn load_options(args: &PageBuilderCli) -> PageBuilderResult<BuildOptions> {
	let root = resolve_root(args);
	if let Some(path) = PageBuilderConfig::resolve_path(&root) {
		tracing::debug!(path = %path.display(), "using config file");
	}
	BuildOptions::load(&root)
}

fn run_init(args: &PageBuilderCli) -> AnyResult<()> {
	let root = resolve_root(args);
	let files = [
		("pagebuilder.toml", SAMPLE_CONFIG),
		("templates/base.html", SAMPLE_TEMPLATE),
		("pages/index.html", SAMPLE_PAGE),
		("assets/style.css", SAMPLE_STYLESHEET),
	];

	let mut created = 0;
	for (relative, content) in files {
		let path = root.join(relative);
		if path.exists() {
			println!("Already exists: {relative}");
			continue;
		}

		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)
				.map_err(|e| PageBuilderError::io(parent, "create directory", e))?;
		}
		std::fs::write(&path, content).map_err(|e| PageBuilderError::io(&path, "write", e))?;
		println!("Created {relative}");
		created += 1;
	}

	if created > 0 {
		println!();
		println!("Next steps:");
		println!("  1. Edit pages/index.html and templates/base.html");
		println!("  2. Run `pagebuilder watch` and open http://localhost:5000");
	}

	Ok(())
}

const SAMPLE_CONFIG: &str = "# pagebuilder configuration\n\n[paths]\npages = \"pages\"\ntemplates = \
                             \"templates\"\nassets = \"assets\"\ndist = \"dist\"\n\n[build]\n# \
                             Write about.html as about/index.html.\npretty_urls = false\n# Delete \
                             stale files from dist after a build.\nprune = false\n\n# Values \
                             available to every page, overridden by page and template \
                             metadata.\n[data]\nsite_name = \"My Site\"\n";

const SAMPLE_TEMPLATE: &str = "<!doctype html>\n<html>\n<head>\n<title>{{ title }} | {{ site_name \
                               }}</title>\n<link rel=\"stylesheet\" \
                               href=\"/style.css\">\n</head>\n<body>\n{{{ slot \
                               }}}\n</body>\n</html>\n";

const SAMPLE_PAGE: &str = "---\ntitle: Home\ntemplate: base\n---\n<h1>{{ title }}</h1>\n<p>Edit \
                           pages/index.html to get started.</p>\n";

const SAMPLE_STYLESHEET: &str = "body {\n  font-family: sans-serif;\n  margin: 2rem auto;\n  \
                                 max-width: 40rem;\n}\n";

fn run_build(args: &PageBuilderCli, prune: bool) -> AnyResult<()> {
	let root = resolve_root(args);
	let mut options = load_options(args)?;
	options.prune |= prune;

	let mut builder = Builder::new(options)?;
	let result = builder.build()?;
	let ok = result.is_ok();
	print_result(result, &root);

	if !ok {
		process::exit(EXIT_PAGE_FAILURES);
	}

	Ok(())
}

fn run_watch(args: &PageBuilderCli, addr: &str, no_serve: bool) -> AnyResult<()> {
	let root = resolve_root(args);
	let mut options = load_options(args)?;
	// Later rebuilds only touch affected pages, so the first build has to
	// write everything it can.
	options.on_page_error = OnPageError::Skip;
	let dist = options.dist_dir.clone();

	let mut builder = Builder::new(options)?;
	match builder.build() {
		Ok(result) => print_result(result, &root),
		// Keep watching so the error can be fixed in place.
		Err(error) => report_error(error.into()),
	}

	let callback_root = root.clone();
	let handle = pagebuilder_core::watch(builder, move |result| {
		match result {
			Ok(result) => print_result(result, &callback_root),
			Err(error) => report_error(error.into()),
		}
	})?;

	for watched in handle.roots() {
		tracing::debug!(root = %watched.display(), "watching");
	}
	println!("\nWatching for file changes... (press Ctrl+C to stop)");

	if no_serve {
		loop {
			std::thread::park();
		}
	}

	let server = DevServer::bind(addr, dist.clone())?;
	let shown = make_relative(&dist, &root);
	match server.local_addr() {
		Some(local) => println!("Serving {shown} at http://{local}"),
		None => println!("Serving {shown} at {addr}"),
	}
	server.run();
	drop(handle);

	Ok(())
}

fn run_list(args: &PageBuilderCli) -> AnyResult<()> {
	let root = resolve_root(args);
	let options = load_options(args)?;
	let mut builder = Builder::new(options)?;
	builder.load()?;

	let store = builder.store();
	let graph = builder.graph();

	println!("{}", colored!("Pages:", bold));
	let mut page_count = 0;
	for (path, loaded) in store.entries_of(SourceKind::Page) {
		page_count += 1;
		let rel = make_relative(path, &root);
		match loaded {
			Loaded::Parsed(page) => {
				let mut chain = vec![rel];
				for name in graph.chain_names(page) {
					if graph.contains(&name) {
						chain.push(name);
					} else {
						chain.push(colored!(format!("{name} (missing)"), red));
					}
				}
				println!("  {}", chain.join(" -> "));
			}
			Loaded::Failed { reason, .. } => {
				println!("  {rel} {}", colored!(format!("(invalid: {reason})"), red));
			}
		}
	}

	println!();
	println!("{}", colored!("Templates:", bold));
	for path in store.paths_of(SourceKind::Template) {
		let name = template_name(path);
		let rel = make_relative(path, &root);
		match graph.parent_of(&name) {
			Some(parent) => println!("  {name} {rel} -> {parent}"),
			None => println!("  {name} {rel}"),
		}
	}

	println!("\n{page_count} page(s), {} template(s)", graph.len());

	Ok(())
}

fn print_result(result: BuildResult, root: &Path) {
	for page in &result.succeeded {
		tracing::debug!(
			source = %make_relative(&page.source, root),
			destination = %make_relative(&page.destination, root),
			"rendered"
		);
	}
	for path in &result.pruned {
		println!("  {} {}", colored!("pruned", yellow), make_relative(path, root));
	}

	let summary = format!(
		"{} page(s) rendered, {} asset(s) copied",
		result.succeeded.len(),
		result.assets
	);

	if result.is_ok() {
		println!("{} {summary}", colored!("✓", green));
		return;
	}

	let failed = result.failed.len();
	for failure in result.failed {
		let origin = failure.error.path();
		if origin != failure.path.as_path() {
			eprintln!(
				"  {} {} (via {})",
				colored!("failed", red),
				make_relative(&failure.path, root),
				make_relative(origin, root)
			);
		}
		let report: miette::Report = failure.error.into();
		eprintln!("{report:?}");
	}

	if result.written {
		eprintln!("{} {summary}, {failed} failed", colored!("✗", red));
	} else {
		eprintln!(
			"{} {failed} page(s) failed; no output was written",
			colored!("✗", red)
		);
	}
}

/// Make a path relative to root for display purposes.
fn make_relative(path: &Path, root: &Path) -> String {
	path.strip_prefix(root)
		.unwrap_or(path)
		.display()
		.to_string()
}
