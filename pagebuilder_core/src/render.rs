use crate::MergedContext;
use crate::PageBuilderError;
use crate::PageBuilderResult;
use crate::SlotPolicy;
use crate::TemplateChain;

/// Data for a single render call.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
	pub data: &'a MergedContext,
	/// Output of the previous chain element. `None` while rendering the page
	/// itself.
	pub slot: Option<&'a str>,
}

/// Substitutes placeholders in a page or template body.
///
/// Implementations are shared between the threads that render pages in
/// parallel.
pub trait Render: Send + Sync {
	/// Render `source` against `context`. The slot, when present, must be
	/// inserted without escaping.
	fn render(&self, source: &str, context: &RenderContext<'_>) -> Result<String, String>;

	/// Whether `source` contains the slot placeholder.
	fn references_slot(&self, source: &str) -> bool;
}

/// Render every element of `chain`, innermost first, feeding each result into
/// the next element's slot.
///
/// Makes exactly one render call per element. A page without a template that
/// references the slot is rejected before any call when `slot_policy` is
/// [`SlotPolicy::Fail`].
pub fn render_chain(
	chain: &TemplateChain,
	context: &MergedContext,
	renderer: &dyn Render,
	slot_policy: SlotPolicy,
) -> PageBuilderResult<String> {
	let page = chain.page();

	if chain.len() == 1
		&& slot_policy == SlotPolicy::Fail
		&& renderer.references_slot(&page.body)
	{
		return Err(PageBuilderError::SlotWithoutTemplate {
			path: page.path.clone(),
		});
	}

	let mut output: Option<String> = None;
	for file in chain.iter() {
		let render_context = RenderContext {
			data: context,
			slot: output.as_deref(),
		};

		let rendered = renderer
			.render(&file.body, &render_context)
			.map_err(|message| {
				PageBuilderError::Render {
					path: file.path.clone(),
					message,
				}
			})?;

		tracing::trace!(path = %file.path.display(), "rendered chain element");
		output = Some(rendered);
	}

	Ok(output.unwrap_or_default())
}
