//! Mustache templates rendered through `minijinja`.
//!
//! Supported tags:
//!
//! - `{{ key }}` substitutes `key`, HTML-escaped.
//! - `{{{ key }}}` and `{{& key }}` substitute `key` without escaping.
//! - `{{# key }}…{{/ key }}` renders its content once per item of a list,
//!   once with `key` pushed onto the lookup stack for any other truthy value,
//!   and not at all for a falsy one.
//! - `{{^ key }}…{{/ key }}` renders its content only when `key` is falsy or
//!   an empty list.
//! - `{{ . }}` is the innermost section value.
//! - `{{! comment }}` is dropped.
//!
//! Keys may use dotted access (`{{ site.name }}`, `{{ items.0 }}`). A key is
//! looked up in the innermost section first and then outward. Missing keys
//! render as an empty string. Section, inverted, closing and comment tags
//! that stand alone on a line remove that line. Partials and delimiter
//! changes are rejected.
//!
//! Tags are compiled into minijinja control flow. Keys and literal text are
//! passed in as data, never as template source, so any key is just a name
//! and text that looks like jinja syntax is copied unchanged.

use std::collections::BTreeMap;

use minijinja::AutoEscape;
use minijinja::Environment;
use minijinja::UndefinedBehavior;
use minijinja::Value;
use minijinja::context;
use minijinja::value::Rest;
use minijinja::value::ValueKind;

use crate::Render;
use crate::RenderContext;
use crate::SLOT_KEY;

/// The default [`Render`] implementation.
#[derive(Debug)]
pub struct MustacheRenderer {
	env: Environment<'static>,
}

impl Default for MustacheRenderer {
	fn default() -> Self {
		Self::new()
	}
}

impl MustacheRenderer {
	pub fn new() -> Self {
		let mut env = Environment::new();
		env.set_keep_trailing_newline(true);
		env.set_undefined_behavior(UndefinedBehavior::Chainable);
		env.set_auto_escape_callback(|_| AutoEscape::Html);
		env.add_function("lookup", lookup);
		env.add_function("section", section);
		Self { env }
	}
}

impl Render for MustacheRenderer {
	fn render(&self, source: &str, context: &RenderContext<'_>) -> Result<String, String> {
		let translation = translate(source, context.slot.is_some())?;

		let mut values: BTreeMap<String, Value> = context
			.data
			.iter()
			.map(|(key, value)| (key.clone(), Value::from_serialize(value)))
			.collect();
		if let Some(slot) = context.slot {
			values.insert(SLOT_KEY.to_string(), Value::from_safe_string(slot.to_string()));
		}

		self.env
			.render_str(
				&translation.template,
				context! {
					ctx => values,
					text => translation.texts,
					keys => translation.keys,
				},
			)
			.map_err(|e| e.to_string())
	}

	fn references_slot(&self, source: &str) -> bool {
		scan(source).into_iter().any(|segment| {
			match segment {
				Segment::Tag { kind, name, .. } => kind.substitutes() && name == SLOT_KEY,
				Segment::Text(_) => false,
			}
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
	Escaped,
	Raw,
	Comment,
	Section,
	Inverted,
	Close,
	Unsupported,
}

impl TagKind {
	fn substitutes(self) -> bool {
		matches!(self, Self::Escaped | Self::Raw | Self::Section | Self::Inverted)
	}

	/// Tags that print nothing and so may remove the line they stand on.
	fn is_standalone_kind(self) -> bool {
		matches!(
			self,
			Self::Comment | Self::Section | Self::Inverted | Self::Close
		)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
	Text(&'a str),
	Tag {
		kind: TagKind,
		/// Trimmed tag content without sigils.
		name: &'a str,
		/// The tag exactly as written.
		original: &'a str,
	},
}

/// Split `source` into text and mustache tags. An unterminated tag is kept as
/// text.
fn scan(source: &str) -> Vec<Segment<'_>> {
	let mut segments = Vec::new();
	let mut rest = source;

	while let Some(start) = rest.find("{{") {
		if start > 0 {
			segments.push(Segment::Text(&rest[..start]));
		}

		let tail = &rest[start..];
		let (open, close) = if tail.starts_with("{{{") {
			("{{{", "}}}")
		} else {
			("{{", "}}")
		};

		let Some(end) = tail[open.len()..].find(close) else {
			segments.push(Segment::Text(tail));
			return segments;
		};

		let inner_end = open.len() + end;
		let tag_end = inner_end + close.len();
		let inner = tail[open.len()..inner_end].trim();
		let (kind, name) = if open == "{{{" {
			(TagKind::Raw, inner)
		} else {
			classify_tag(inner)
		};

		segments.push(Segment::Tag {
			kind,
			name,
			original: &tail[..tag_end],
		});
		rest = &tail[tag_end..];
	}

	if !rest.is_empty() {
		segments.push(Segment::Text(rest));
	}

	segments
}

fn classify_tag(inner: &str) -> (TagKind, &str) {
	let mut chars = inner.chars();
	let kind = match chars.next() {
		Some('&') => TagKind::Raw,
		Some('!') => TagKind::Comment,
		Some('#') => TagKind::Section,
		Some('^') => TagKind::Inverted,
		Some('/') => TagKind::Close,
		Some('>' | '=' | '<' | '$') => TagKind::Unsupported,
		_ => return (TagKind::Escaped, inner),
	};
	(kind, chars.as_str().trim())
}

/// Drop the surrounding whitespace and line break of tags that are alone on
/// their line.
fn strip_standalone(mut segments: Vec<Segment<'_>>) -> Vec<Segment<'_>> {
	// Byte range kept of each text segment.
	let mut kept: Vec<(usize, usize)> = segments
		.iter()
		.map(|segment| {
			match segment {
				Segment::Text(text) => (0, text.len()),
				Segment::Tag { .. } => (0, 0),
			}
		})
		.collect();
	let last = segments.len().saturating_sub(1);

	for (index, segment) in segments.iter().enumerate() {
		let Segment::Tag { kind, .. } = segment else {
			continue;
		};
		if !kind.is_standalone_kind() {
			continue;
		}

		let before = if index == 0 {
			Some(None)
		} else if let Segment::Text(text) = segments[index - 1] {
			let line_start = text.rfind('\n').map_or(0, |at| at + 1);
			let starts_line = line_start > 0 || index - 1 == 0;
			(starts_line && text[line_start..].trim().is_empty()).then_some(Some(line_start))
		} else {
			None
		};

		let after = if index == last {
			Some(None)
		} else if let Segment::Text(text) = segments[index + 1] {
			let line_end = text.find('\n').map(|at| at + 1);
			let ends_line = line_end.is_some() || index + 1 == last;
			let end = line_end.unwrap_or(text.len());
			(ends_line && text[..end].trim().is_empty()).then_some(Some(end))
		} else {
			None
		};

		let (Some(before), Some(after)) = (before, after) else {
			continue;
		};
		if let Some(line_start) = before {
			let range = &mut kept[index - 1];
			range.1 = range.1.min(line_start);
		}
		if let Some(end) = after {
			let range = &mut kept[index + 1];
			range.0 = range.0.max(end);
		}
	}

	for (segment, (start, end)) in segments.iter_mut().zip(kept) {
		if let Segment::Text(text) = segment {
			*text = if start < end { &text[start..end] } else { "" };
		}
	}

	segments
}

#[derive(Debug, Default)]
struct Translation {
	template: String,
	texts: Vec<Value>,
	keys: Vec<Value>,
}

impl Translation {
	/// Literal text without a brace goes into the template directly, anything
	/// else is passed as a safe string.
	fn push_text(&mut self, text: &str) {
		if text.is_empty() {
			return;
		}

		if text.contains('{') {
			let index = self.texts.len();
			self.texts.push(Value::from_safe_string(text.to_string()));
			self.template.push_str(&format!("{{{{ text[{index}] }}}}"));
		} else {
			self.template.push_str(text);
		}
	}

	/// A `lookup(...)` call resolving `name` against the `depth` section
	/// values in scope, innermost first, and the root context last.
	fn lookup(&mut self, name: &str, depth: usize) -> String {
		let index = self.keys.len();
		self.keys.push(Value::from(name));

		let mut call = format!("lookup(keys[{index}]");
		for level in (1..=depth).rev() {
			call.push_str(&format!(", s{level}"));
		}
		call.push_str(", ctx)");
		call
	}
}

/// Compile mustache tags into minijinja syntax. When `slot_bound` is false
/// the slot tag is left in the output verbatim.
fn translate(source: &str, slot_bound: bool) -> Result<Translation, String> {
	let mut translation = Translation::default();
	let mut open: Vec<(&str, TagKind)> = Vec::new();
	let mut depth = 0;

	for segment in strip_standalone(scan(source)) {
		let (kind, name, original) = match segment {
			Segment::Text(text) => {
				translation.push_text(text);
				continue;
			}
			Segment::Tag { kind, name, original } => (kind, name, original),
		};

		match kind {
			TagKind::Comment => {}
			TagKind::Unsupported => return Err(format!("unsupported tag `{original}`")),
			_ if name.is_empty() => return Err(format!("unsupported tag `{original}`")),
			TagKind::Escaped | TagKind::Raw if name == SLOT_KEY && !slot_bound => {
				translation.push_text(original);
			}
			TagKind::Escaped => {
				let call = translation.lookup(name, depth);
				translation.template.push_str(&format!("{{{{ {call} }}}}"));
			}
			TagKind::Raw => {
				let call = translation.lookup(name, depth);
				translation.template.push_str(&format!(
					"{{% autoescape false %}}{{{{ {call} }}}}{{% endautoescape %}}"
				));
			}
			TagKind::Section => {
				let call = translation.lookup(name, depth);
				depth += 1;
				translation
					.template
					.push_str(&format!("{{% for s{depth} in section({call}) %}}"));
				open.push((name, kind));
			}
			TagKind::Inverted => {
				let call = translation.lookup(name, depth);
				translation
					.template
					.push_str(&format!("{{% if not section({call}) %}}"));
				open.push((name, kind));
			}
			TagKind::Close => {
				match open.pop() {
					Some((opened, TagKind::Section)) if opened == name => {
						depth -= 1;
						translation.template.push_str("{% endfor %}");
					}
					Some((opened, _)) if opened == name => {
						translation.template.push_str("{% endif %}");
					}
					Some((opened, _)) => {
						return Err(format!(
							"closing tag `{original}` does not match section `{opened}`"
						));
					}
					None => return Err(format!("closing tag `{original}` has no open section")),
				}
			}
		}
	}

	if let Some((name, _)) = open.last() {
		return Err(format!("section `{name}` is never closed"));
	}

	Ok(translation)
}

/// Resolve a possibly dotted `key` against `scopes`, innermost first. Only
/// the first part of the key searches outward.
fn lookup(key: &str, scopes: Rest<Value>) -> Value {
	if key == "." {
		return scopes.first().cloned().unwrap_or(Value::UNDEFINED);
	}

	let mut parts = key.split('.');
	let first = parts.next().unwrap_or_default();
	let Some(mut value) = scopes.iter().find_map(|scope| member(scope, first)) else {
		return Value::UNDEFINED;
	};

	for part in parts {
		match member(&value, part) {
			Some(next) => value = next,
			None => return Value::UNDEFINED,
		}
	}

	value
}

fn member(value: &Value, name: &str) -> Option<Value> {
	let found = match value.kind() {
		ValueKind::Map => value.get_attr(name).ok()?,
		ValueKind::Seq => value.get_item(&Value::from(name.parse::<usize>().ok()?)).ok()?,
		_ => return None,
	};
	(!found.is_undefined() && !found.is_none()).then_some(found)
}

/// The values a section iterates over: every item of a list, the value
/// itself when truthy, nothing otherwise.
fn section(value: Value) -> Value {
	if value.kind() == ValueKind::Seq {
		value
	} else if value.is_true() {
		Value::from(vec![value])
	} else {
		Value::from(Vec::<Value>::new())
	}
}
