use std::ffi::OsString;
use std::path::Path;
use std::path::PathBuf;

use globset::GlobBuilder;
use globset::GlobMatcher;
use ignore::WalkBuilder;

use crate::DEFINITION_EXTENSION;
use crate::RegenError;
use crate::RegenResult;

/// Wildcard character in generic definition names. A doubled `@@` also
/// applies to subdirectories.
pub const WILDCARD: char = '@';

fn file_name(path: &Path) -> &str {
	path.file_name()
		.and_then(|name| name.to_str())
		.unwrap_or_default()
}

fn is_definition_name(name: &str) -> bool {
	Path::new(name)
		.extension()
		.is_some_and(|extension| extension == DEFINITION_EXTENSION)
}

/// Returns true when the definition's file name contains a wildcard.
pub fn is_generic(definition: &Path) -> bool {
	file_name(definition).contains(WILDCARD)
}

fn is_recursive(name: &str) -> bool {
	name.contains("@@")
}

fn is_ignored_directory_name(name: &str) -> bool {
	name == ".git" || name == "node_modules" || name == "target"
}

/// The output of a specific definition: its path without the final
/// extension.
pub fn default_output_for(definition: &Path) -> PathBuf {
	definition.with_extension("")
}

/// Compile the file-name matcher for a generic definition name. The text
/// before the first run of `@` is a required prefix and the text after it a
/// required suffix.
fn generic_matcher(definition_name: &str) -> RegenResult<GlobMatcher> {
	let stem = definition_name
		.strip_suffix(&format!(".{DEFINITION_EXTENSION}"))
		.unwrap_or(definition_name);
	let (prefix, rest) = stem.split_once(WILDCARD).unwrap_or((stem, ""));
	let rest = rest.trim_start_matches(WILDCARD);
	let suffix = rest.split(WILDCARD).next().unwrap_or_default();

	let pattern = format!("{}*{}", globset::escape(prefix), globset::escape(suffix));
	GlobBuilder::new(&pattern)
		.literal_separator(true)
		.build()
		.map(|glob| glob.compile_matcher())
		.map_err(|e| {
			RegenError::Discovery {
				path: definition_name.to_string(),
				reason: e.to_string(),
			}
		})
}

fn sorted_file_names(directory: &Path) -> RegenResult<Vec<String>> {
	let entries = match std::fs::read_dir(directory) {
		Ok(entries) => entries,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
		Err(e) => return Err(e.into()),
	};

	let mut names = Vec::new();
	for entry in entries {
		let entry = entry?;
		if entry.file_type()?.is_file() {
			if let Some(name) = entry.file_name().to_str() {
				names.push(name.to_string());
			}
		}
	}

	names.sort();
	Ok(names)
}

/// Find the definition that generates `file`.
///
/// `<file>.regen` wins. Otherwise the nearest generic definition matching the
/// file name is used, searching the file's directory and then, for `@@`
/// definitions only, each ancestor directory.
pub fn find_template_for(file: &Path) -> RegenResult<Option<PathBuf>> {
	let mut specific = OsString::from(file.as_os_str());
	specific.push(format!(".{DEFINITION_EXTENSION}"));
	let specific = PathBuf::from(specific);
	if specific.is_file() {
		return Ok(Some(specific));
	}

	let name = file_name(file);
	let directory = match file.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
		_ => PathBuf::from("."),
	};
	let mut directory = directory.canonicalize().unwrap_or(directory);
	let mut level = 0;

	loop {
		for candidate in sorted_file_names(&directory)? {
			if !is_definition_name(&candidate)
				|| !candidate.contains(WILDCARD)
				|| (level > 0 && !is_recursive(&candidate))
			{
				continue;
			}

			if generic_matcher(&candidate)?.is_match(name) {
				let definition = directory.join(candidate);
				tracing::debug!(definition = %definition.display(), level, "found generic definition");
				return Ok(Some(definition));
			}
		}

		let Some(parent) = directory.parent() else {
			return Ok(None);
		};
		directory = parent.to_path_buf();
		level += 1;
	}
}

/// List the files `definition` generates.
///
/// A specific definition has exactly one output. A generic one applies to
/// every matching file beside it, and with `@@` to matching files in all
/// subdirectories as well.
pub fn find_outputs_for(definition: &Path) -> RegenResult<Vec<PathBuf>> {
	let name = file_name(definition);
	if !name.contains(WILDCARD) {
		return Ok(vec![default_output_for(definition)]);
	}

	let matcher = generic_matcher(name)?;
	let directory = match definition.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent,
		_ => Path::new("."),
	};

	let mut walker = WalkBuilder::new(directory);
	walker
		.max_depth((!is_recursive(name)).then_some(1))
		.hidden(false)
		.require_git(false)
		.filter_entry(|entry| {
			entry.depth() == 0
				|| !entry.file_type().is_some_and(|kind| kind.is_dir())
				|| !entry
					.file_name()
					.to_str()
					.is_some_and(is_ignored_directory_name)
		})
		.sort_by_file_name(|a, b| a.cmp(b));

	let mut outputs = Vec::new();
	for entry in walker.build() {
		let entry = entry.map_err(|e| {
			RegenError::Discovery {
				path: directory.display().to_string(),
				reason: e.to_string(),
			}
		})?;

		if !entry.file_type().is_some_and(|kind| kind.is_file()) {
			continue;
		}

		let Some(candidate) = entry.file_name().to_str() else {
			continue;
		};

		if !is_definition_name(candidate) && matcher.is_match(candidate) {
			outputs.push(entry.into_path());
		}
	}

	tracing::debug!(definition = %definition.display(), count = outputs.len(), "found outputs");
	Ok(outputs)
}
