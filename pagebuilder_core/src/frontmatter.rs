use std::path::Path;

use crate::FrontmatterConfig;
use crate::Metadata;
use crate::PageBuilderError;
use crate::PageBuilderResult;

/// A file split into its metadata block and the body that follows it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
	pub metadata: Metadata,
	pub body: String,
}

/// Split `raw` into metadata and body.
///
/// A file that does not start with `delimiters.start` has no metadata and is
/// all body. The closing delimiter must start a line; it may omit its trailing
/// newline at the end of the file. The block is parsed as YAML. An empty block
/// or one holding a scalar yields empty metadata.
pub fn parse_frontmatter(
	raw: &str,
	delimiters: &FrontmatterConfig,
	path: &Path,
) -> PageBuilderResult<Frontmatter> {
	let content = normalize_line_endings(raw);
	let Some(rest) = content.strip_prefix(delimiters.start.as_str()) else {
		return Ok(Frontmatter {
			metadata: Metadata::new(),
			body: content,
		});
	};

	let Some((block, body)) = split_block(rest, &delimiters.end) else {
		return Err(PageBuilderError::Parse {
			path: path.to_path_buf(),
			reason: format!(
				"missing closing delimiter `{}`",
				delimiters.end.escape_debug()
			),
		});
	};

	Ok(Frontmatter {
		metadata: parse_metadata(block, path)?,
		body: body.to_string(),
	})
}

fn split_block<'a>(rest: &'a str, end: &str) -> Option<(&'a str, &'a str)> {
	if let Some(body) = rest.strip_prefix(end) {
		return Some(("", body));
	}

	if let Some(index) = rest.find(&format!("\n{end}")) {
		let block = &rest[..=index];
		let body = &rest[index + 1 + end.len()..];
		return Some((block, body));
	}

	// Closing delimiter on the last line without its newline.
	let bare_end = end.trim_end_matches('\n');
	if bare_end.is_empty() || bare_end.len() == end.len() {
		return None;
	}

	if rest == bare_end {
		return Some(("", ""));
	}

	rest.strip_suffix(bare_end)
		.filter(|block| block.ends_with('\n'))
		.map(|block| (block, ""))
}

fn parse_metadata(block: &str, path: &Path) -> PageBuilderResult<Metadata> {
	if block.trim().is_empty() {
		return Ok(Metadata::new());
	}

	let value: serde_json::Value =
		serde_yaml_ng::from_str(block).map_err(|e| {
			PageBuilderError::Parse {
				path: path.to_path_buf(),
				reason: e.to_string(),
			}
		})?;

	match value {
		serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
		serde_json::Value::Null => Ok(Metadata::new()),
		other => {
			tracing::debug!(
				path = %path.display(),
				value = %other,
				"metadata block is not a mapping; ignoring it"
			);
			Ok(Metadata::new())
		}
	}
}

/// Normalize CRLF line endings to LF.
pub fn normalize_line_endings(content: &str) -> String {
	if content.contains('\r') {
		content.replace("\r\n", "\n").replace('\r', "\n")
	} else {
		content.to_string()
	}
}
