use derive_more::Deref;

use crate::Metadata;
use crate::SLOT_KEY;
use crate::TEMPLATE_KEY;
use crate::TemplateChain;

/// The flattened data every element of a chain renders against.
#[derive(Debug, Clone, Default, PartialEq, Deref)]
pub struct MergedContext(Metadata);

impl MergedContext {
	pub fn into_inner(self) -> Metadata {
		self.0
	}
}

impl From<Metadata> for MergedContext {
	fn from(data: Metadata) -> Self {
		Self(data)
	}
}

/// Merge the data of every chain element, page first. The first element to
/// define a key wins, and `shared` fills in whatever no element defines.
/// Reserved keys are never merged.
pub fn merge(chain: &TemplateChain, shared: &Metadata) -> MergedContext {
	let mut merged = Metadata::new();
	let layers = chain
		.iter()
		.map(|file| &file.data)
		.chain(std::iter::once(shared));

	for layer in layers {
		for (key, value) in layer {
			if is_reserved(key) {
				continue;
			}

			merged
				.entry(key.clone())
				.or_insert_with(|| value.clone());
		}
	}

	MergedContext(merged)
}

fn is_reserved(key: &str) -> bool {
	key == TEMPLATE_KEY || key == SLOT_KEY
}
