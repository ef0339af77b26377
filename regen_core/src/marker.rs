use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::RegenError;
use crate::RegenResult;

/// Placeholder marking where a block name appears inside a marker pattern.
pub const NAME_PLACEHOLDER: &str = "@name";

/// Capturing group substituted for [`NAME_PLACEHOLDER`] when a pattern is
/// compiled.
const NAME_GROUP: &str = r"([0-9A-Za-z\-_:]+)";

/// A pair of textual marker templates delimiting a protected block.
///
/// ```toml
/// [[markers]]
/// begin = "# {{{ @name"
/// end = "# }}}"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerPattern {
	/// Opening marker. Must contain `@name`.
	pub begin: String,
	/// Closing marker. May contain `@name`, which then matches any block name.
	pub end: String,
}

impl MarkerPattern {
	pub fn new(begin: impl Into<String>, end: impl Into<String>) -> Self {
		Self {
			begin: begin.into(),
			end: end.into(),
		}
	}

	/// The two built-in pairs: line comments and block comments.
	pub fn builtin() -> Vec<Self> {
		vec![
			Self::new("// {{{ @name", "// }}}"),
			Self::new("/* {{{ @name", "   }}} */"),
		]
	}

	/// The opening marker line for a block called `name`.
	pub fn begin_line(&self, name: &str) -> String {
		self.begin.replacen(NAME_PLACEHOLDER, name, 1)
	}

	/// The closing marker line for a block called `name`.
	pub fn end_line(&self, name: &str) -> String {
		self.end.replacen(NAME_PLACEHOLDER, name, 1)
	}

	/// Returns an error when the begin pattern has no name placeholder or the
	/// end pattern is blank. A blank end would match every line.
	pub fn validate(&self) -> RegenResult<()> {
		if !self.begin.contains(NAME_PLACEHOLDER) {
			return Err(RegenError::InvalidMarkerPattern {
				begin: self.begin.clone(),
			});
		}

		if self.end.trim().is_empty() {
			return Err(RegenError::BlankEndMarker {
				begin: self.begin.clone(),
			});
		}

		Ok(())
	}
}

/// A [`MarkerPattern`] together with its line matchers.
#[derive(Debug, Clone)]
pub struct CompiledMarker {
	pattern: MarkerPattern,
	begin: Regex,
	end: Regex,
}

impl CompiledMarker {
	/// Validate and compile a marker pattern.
	pub fn compile(pattern: MarkerPattern) -> RegenResult<Self> {
		pattern.validate()?;
		let begin = line_matcher(&pattern.begin)?;
		let end = line_matcher(&pattern.end)?;

		Ok(Self {
			pattern,
			begin,
			end,
		})
	}

	pub fn pattern(&self) -> &MarkerPattern {
		&self.pattern
	}

	/// Returns the captured block name when `line` opens a block.
	pub fn match_begin<'a>(&self, line: &'a str) -> Option<&'a str> {
		self.begin
			.captures(line)
			.and_then(|captures| captures.get(1))
			.map(|name| name.as_str())
	}

	/// Returns true when `line` closes a block opened by this marker.
	pub fn is_end(&self, line: &str) -> bool {
		self.end.is_match(line)
	}
}

/// Build a matcher anchored at the start of a line (after optional
/// whitespace). Everything except the placeholder is matched literally and
/// trailing text after the marker is allowed.
fn line_matcher(template: &str) -> RegenResult<Regex> {
	let mut source = String::from(r"^\s*");
	match template.split_once(NAME_PLACEHOLDER) {
		Some((before, after)) => {
			source.push_str(&regex::escape(before));
			source.push_str(NAME_GROUP);
			source.push_str(&regex::escape(after));
		}
		None => source.push_str(&regex::escape(template)),
	}

	Regex::new(&source).map_err(|e| RegenError::InvalidMarkerRegex(e.to_string()))
}

/// An ordered set of compiled markers. Declaration order decides which
/// marker wins when several begin patterns match the same line.
#[derive(Debug, Clone)]
pub struct MarkerSet {
	markers: Vec<CompiledMarker>,
}

impl MarkerSet {
	/// Compile a set of patterns, failing on the first begin pattern without
	/// `@name`.
	pub fn new(patterns: impl IntoIterator<Item = MarkerPattern>) -> RegenResult<Self> {
		let markers = patterns
			.into_iter()
			.map(CompiledMarker::compile)
			.collect::<RegenResult<Vec<_>>>()?;

		Ok(Self { markers })
	}

	pub fn len(&self) -> usize {
		self.markers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.markers.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &CompiledMarker> {
		self.markers.iter()
	}

	/// The marker registered at `index`.
	pub fn get(&self, index: usize) -> RegenResult<&CompiledMarker> {
		self.markers
			.get(index)
			.ok_or(RegenError::MarkerIndexOutOfRange {
				index,
				len: self.markers.len(),
			})
	}

	/// The source patterns in declaration order.
	pub fn patterns(&self) -> Vec<MarkerPattern> {
		self.markers
			.iter()
			.map(|marker| marker.pattern.clone())
			.collect()
	}

	/// Test `line` against every begin matcher in declaration order and
	/// return the first match as `(marker_index, name)`.
	pub fn match_begin<'a>(&self, line: &'a str) -> Option<(usize, &'a str)> {
		self.markers
			.iter()
			.enumerate()
			.find_map(|(index, marker)| marker.match_begin(line).map(|name| (index, name)))
	}
}

impl Default for MarkerSet {
	fn default() -> Self {
		// Built-in patterns always contain the placeholder and escape cleanly.
		let markers = MarkerPattern::builtin()
			.into_iter()
			.filter_map(|pattern| CompiledMarker::compile(pattern).ok())
			.collect();

		Self { markers }
	}
}
