use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use derive_more::Deref;
use derive_more::DerefMut;

use crate::ContextStore;
use crate::Loaded;
use crate::PageBuilderError;
use crate::PageBuilderResult;
use crate::SourceFile;
use crate::SourceKind;
use crate::template_name;

/// A page followed by its templates, innermost first. The last element is
/// the root template, or the page itself when it has no template.
#[derive(Debug, Clone, Deref, DerefMut)]
pub struct TemplateChain(Vec<Arc<SourceFile>>);

impl TemplateChain {
	pub fn page(&self) -> &Arc<SourceFile> {
		&self.0[0]
	}

	/// Template names in the chain, excluding the page.
	pub fn template_names(&self) -> Vec<String> {
		self.0.iter().skip(1).map(|file| file.name()).collect()
	}
}

/// Name index and parent adjacency for every template in a [`ContextStore`].
///
/// The graph holds names and paths only. Resolving a chain looks the parsed
/// files up in the store, so reloading a template body never requires
/// rebuilding the graph; adding, removing or retargeting a template does.
#[derive(Debug, Clone, Default)]
pub struct TemplateGraph {
	names: BTreeMap<String, PathBuf>,
	/// Parent name of each template. `None` for root templates and for
	/// templates that failed to parse.
	parents: BTreeMap<String, Option<String>>,
}

impl TemplateGraph {
	/// Index and validate every template in `store`.
	pub fn build(store: &ContextStore) -> PageBuilderResult<Self> {
		let graph = Self::index(store)?;
		graph.validate()?;
		Ok(graph)
	}

	/// Index templates by name. Fails when two files derive the same name.
	pub fn index(store: &ContextStore) -> PageBuilderResult<Self> {
		let mut claims: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
		let mut parents = BTreeMap::new();

		for (path, loaded) in store.entries_of(SourceKind::Template) {
			let name = template_name(path);
			claims.entry(name.clone()).or_default().push(path.clone());

			let parent = match loaded {
				Loaded::Parsed(file) => file.header.template.clone(),
				Loaded::Failed { .. } => None,
			};
			parents.insert(name, parent);
		}

		let mut names = BTreeMap::new();
		for (name, paths) in claims {
			if paths.len() > 1 {
				return Err(PageBuilderError::DuplicateTemplateName { name, paths });
			}

			if let Some(path) = paths.into_iter().next() {
				names.insert(name, path);
			}
		}

		Ok(Self { names, parents })
	}

	/// Reject cycles among templates. Unknown parent names are left for
	/// [`resolve_chain`](Self::resolve_chain) to report against the pages
	/// that reach them.
	pub fn validate(&self) -> PageBuilderResult<()> {
		let mut acyclic: BTreeSet<&str> = BTreeSet::new();

		for start in self.names.keys() {
			let mut trail: Vec<&str> = Vec::new();
			let mut current = Some(start.as_str());

			while let Some(name) = current {
				if acyclic.contains(name) || !self.names.contains_key(name) {
					break;
				}

				if let Some(position) = trail.iter().position(|seen| *seen == name) {
					let mut chain: Vec<PathBuf> = trail[position..]
						.iter()
						.filter_map(|seen| self.names.get(*seen).cloned())
						.collect();
					chain.extend(self.names.get(name).cloned());
					return Err(PageBuilderError::Cycle { chain });
				}

				trail.push(name);
				current = self.parent_of(name);
			}

			acyclic.extend(trail);
		}

		Ok(())
	}

	/// The file declaring template `name`.
	pub fn path_of(&self, name: &str) -> Option<&Path> {
		self.names.get(name).map(PathBuf::as_path)
	}

	pub fn parent_of(&self, name: &str) -> Option<&str> {
		self.parents.get(name).and_then(|parent| parent.as_deref())
	}

	pub fn contains(&self, name: &str) -> bool {
		self.names.contains_key(name)
	}

	pub fn len(&self) -> usize {
		self.names.len()
	}

	pub fn is_empty(&self) -> bool {
		self.names.is_empty()
	}

	/// Follow `template` keys from `page` up to a root template.
	pub fn resolve_chain(
		&self,
		store: &ContextStore,
		page: &Arc<SourceFile>,
	) -> PageBuilderResult<TemplateChain> {
		let mut chain = vec![Arc::clone(page)];
		let mut visited = vec![page.path.clone()];

		loop {
			let current = &chain[chain.len() - 1];
			let Some(name) = current.header.template.as_deref() else {
				break;
			};

			let unknown = || {
				PageBuilderError::UnknownTemplate {
					name: name.to_string(),
					path: current.path.clone(),
				}
			};
			let path = self.names.get(name).ok_or_else(unknown)?;

			if visited.contains(path) {
				visited.push(path.clone());
				return Err(PageBuilderError::Cycle { chain: visited });
			}

			let next = match store.get(path) {
				Some(Loaded::Parsed(file)) => Arc::clone(file),
				Some(failed @ Loaded::Failed { .. }) => {
					return Err(failed.error(path).unwrap_or_else(unknown));
				}
				None => return Err(unknown()),
			};

			visited.push(path.clone());
			chain.push(next);
		}

		Ok(TemplateChain(chain))
	}

	/// Template names reached from `page` by following `template` keys,
	/// innermost first. Stops at the first unknown name or repeat, so it also
	/// works for pages whose chain does not resolve.
	pub fn chain_names(&self, page: &SourceFile) -> Vec<String> {
		let mut names: Vec<String> = Vec::new();
		let mut current = page.header.template.as_deref();

		while let Some(name) = current {
			if names.iter().any(|seen| seen == name) {
				break;
			}

			names.push(name.to_string());
			if !self.names.contains_key(name) {
				break;
			}
			current = self.parent_of(name);
		}

		names
	}

	/// Every page whose chain contains at least one of `names`.
	pub fn reverse_dependencies(
		&self,
		store: &ContextStore,
		names: &BTreeSet<String>,
	) -> BTreeSet<PathBuf> {
		if names.is_empty() {
			return BTreeSet::new();
		}

		store
			.paths_of(SourceKind::Page)
			.filter(|path| {
				store.parsed(path).is_some_and(|page| {
					self.chain_names(page)
						.iter()
						.any(|name| names.contains(name))
				})
			})
			.cloned()
			.collect()
	}
}
