use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::MarkerPattern;
use crate::MarkerSet;
use crate::RegenError;
use crate::RegenResult;

/// Supported config file locations in discovery order (highest precedence
/// first).
pub const CONFIG_FILE_CANDIDATES: [&str; 3] = ["regen.toml", ".regen.toml", ".config/regen.toml"];

/// File extension of definition files.
pub const DEFINITION_EXTENSION: &str = "regen";

/// Configuration loaded from a `regen.toml` file.
///
/// ```toml
/// [[markers]]
/// begin = "# {{{ @name"
/// end = "# }}}"
///
/// [fetch]
/// headers = { "User-Agent" = "regen" }
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct RegenConfig {
	/// Marker pairs used by every generation context. When absent the
	/// built-in `// {{{ @name` and `/* {{{ @name` pairs are used.
	#[serde(default)]
	pub markers: Option<Vec<MarkerPattern>>,
	/// Settings applied to remote `!fetch` references.
	#[serde(default)]
	pub fetch: FetchConfig,
}

/// Settings for remote fetches.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FetchConfig {
	/// Headers sent with every request, merged under per-reference headers.
	#[serde(default)]
	pub headers: BTreeMap<String, String>,
}

impl RegenConfig {
	/// Resolve the config path from known discovery candidates.
	#[must_use]
	pub fn resolve_path(root: &Path) -> Option<PathBuf> {
		CONFIG_FILE_CANDIDATES
			.iter()
			.map(|candidate| root.join(candidate))
			.find(|path| path.is_file())
	}

	/// Load the config from the first discovered config file at `root`.
	/// Returns `None` if no config file exists.
	pub fn load(root: &Path) -> RegenResult<Option<RegenConfig>> {
		let Some(config_path) = Self::resolve_path(root) else {
			return Ok(None);
		};

		let content = std::fs::read_to_string(&config_path)?;
		let config = Self::parse(&content)?;
		tracing::debug!(path = %config_path.display(), "loaded config");

		Ok(Some(config))
	}

	/// Parse config text, validating marker patterns eagerly.
	pub fn parse(content: &str) -> RegenResult<RegenConfig> {
		let config: RegenConfig =
			toml::from_str(content).map_err(|e| RegenError::ConfigParse(e.to_string()))?;

		if let Some(markers) = &config.markers {
			if markers.is_empty() {
				return Err(RegenError::ConfigParse(
					"`markers` must list at least one marker pair".to_string(),
				));
			}

			for marker in markers {
				marker.validate()?;
			}
		}

		Ok(config)
	}

	/// The marker set every context starts with.
	pub fn marker_set(&self) -> RegenResult<MarkerSet> {
		match &self.markers {
			Some(patterns) => MarkerSet::new(patterns.iter().cloned()),
			None => Ok(MarkerSet::default()),
		}
	}
}
