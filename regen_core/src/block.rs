use std::collections::HashMap;

use derive_more::Deref;
use derive_more::DerefMut;
use serde::Serialize;

use crate::MarkerSet;
use crate::RegenResult;

/// A named, marker-delimited region of previously generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
	pub name: String,
	/// The opening marker line as it appeared in the text, including any
	/// trailing content after the marker.
	pub begin_marker: String,
	/// The interior lines joined with `\n`.
	pub content: String,
	/// The closing marker line as it appeared in the text.
	pub end_marker: String,
	/// Index of the marker pair in the active [`MarkerSet`] that matched.
	pub marker_index: usize,
}

impl Block {
	/// Build a fresh block whose marker lines come from the pattern at
	/// `marker_index`.
	pub fn synthesize(
		markers: &MarkerSet,
		name: &str,
		content: impl Into<String>,
		marker_index: usize,
	) -> RegenResult<Self> {
		let pattern = markers.get(marker_index)?.pattern();

		Ok(Self {
			name: name.to_string(),
			begin_marker: pattern.begin_line(name),
			content: content.into(),
			end_marker: pattern.end_line(name),
			marker_index,
		})
	}

	/// The full block text: begin marker, content, end marker.
	pub fn wrapped(&self) -> String {
		format!("{}\n{}\n{}", self.begin_marker, self.content, self.end_marker)
	}
}

/// Blocks keyed by name.
#[derive(Debug, Clone, Default, Deref, DerefMut)]
pub struct BlockTable(HashMap<String, Block>);

impl BlockTable {
	/// Block names in sorted order.
	pub fn names(&self) -> Vec<&str> {
		let mut names: Vec<&str> = self.0.keys().map(String::as_str).collect();
		names.sort_unstable();
		names
	}
}

/// Scanner state for [`extract_blocks`]. Only one block is collected at a
/// time so nested markers are treated as content.
enum ScanState<'a> {
	Searching,
	InBlock {
		marker_index: usize,
		name: &'a str,
		begin_line: &'a str,
		lines: Vec<&'a str>,
	},
}

/// Scan `source` line by line and collect every closed block.
///
/// A block still open at the end of the input is dropped. When a name occurs
/// more than once the last occurrence wins.
pub fn extract_blocks(source: &str, markers: &MarkerSet) -> BlockTable {
	let mut table = BlockTable::default();
	let mut state = ScanState::Searching;

	for raw_line in source.split('\n') {
		let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

		state = match state {
			ScanState::Searching => {
				match markers.match_begin(line) {
					Some((marker_index, name)) => {
						ScanState::InBlock {
							marker_index,
							name,
							begin_line: line,
							lines: Vec::new(),
						}
					}
					None => ScanState::Searching,
				}
			}
			ScanState::InBlock {
				marker_index,
				name,
				begin_line,
				mut lines,
			} => {
				let closes = markers
					.get(marker_index)
					.is_ok_and(|marker| marker.is_end(line));

				if closes {
					let block = Block {
						name: name.to_string(),
						begin_marker: begin_line.to_string(),
						content: lines.join("\n"),
						end_marker: line.to_string(),
						marker_index,
					};

					if table.insert(name.to_string(), block).is_some() {
						tracing::warn!(
							block = name,
							"duplicate block name, keeping the last occurrence"
						);
					}

					ScanState::Searching
				} else {
					lines.push(line);
					ScanState::InBlock {
						marker_index,
						name,
						begin_line,
						lines,
					}
				}
			}
		};
	}

	if let ScanState::InBlock { name, .. } = state {
		tracing::warn!(block = name, "block is never closed and will not be preserved");
	}

	tracing::debug!(count = table.len(), "extracted blocks");
	table
}
