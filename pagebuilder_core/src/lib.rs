//! `pagebuilder_core` builds static HTML pages by wrapping each page in a
//! chain of named templates, then keeps the output up to date as sources
//! change.
//!
//! ## Processing Pipeline
//!
//! ```text
//! page / template file
//!   → frontmatter (splits the YAML metadata block from the body)
//!   → ContextStore (caches parsed files by path)
//!   → TemplateGraph (name index, cycle checks, page → root template chain)
//!   → merge (page-first, first writer wins, shared `[data]` last)
//!   → render_chain (one render per chain element, output fills the next `slot`)
//!   → Builder (parallel rendering, atomic writes, asset copies)
//! ```
//!
//! In watch mode, [`watch`] feeds filesystem events through a debounced
//! [`RebuildQueue`] into [`Builder::rebuild`], which re-renders only the
//! pages whose chain touches a changed file.
//!
//! ## Sources
//!
//! ```html
//! ---
//! title: Home
//! template: base
//! ---
//! <p>Welcome</p>
//! ```
//!
//! `template` names the parent template by file name (`templates/base.html`
//! is `base`). A template receives the previous element's output as `slot`:
//!
//! ```html
//! <title>{{ title }}</title>
//! <main>{{{ slot }}}</main>
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use pagebuilder_core::BuildOptions;
//! use pagebuilder_core::Builder;
//!
//! let options = BuildOptions::load(Path::new(".")).unwrap();
//! let mut builder = Builder::new(options).unwrap();
//! let result = builder.build().unwrap();
//!
//! for failure in &result.failed {
//!     eprintln!("{}", failure.error);
//! }
//! ```

pub use config::*;
pub use context::*;
pub use error::*;
pub use frontmatter::*;
pub use graph::*;
pub use incremental::*;
pub use mustache::*;
pub use pipeline::*;
pub use render::*;
pub use scan::*;
pub use source::*;
pub use watcher::*;

pub mod config;
mod context;
#[allow(unused_assignments)]
mod error;
mod frontmatter;
mod graph;
mod incremental;
mod mustache;
mod pipeline;
mod render;
mod scan;
mod source;
mod watcher;

#[cfg(test)]
mod __fixtures;
