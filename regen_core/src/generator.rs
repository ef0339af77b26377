use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use serde_yaml_ng::Value as YamlValue;

use crate::ContextOptions;
use crate::DataNode;
use crate::FileOperation;
use crate::GenerationContext;
use crate::GenerationRun;
use crate::HttpReferenceSource;
use crate::MarkerSet;
use crate::PendingWrite;
use crate::ReferenceSource;
use crate::RegenConfig;
use crate::RegenError;
use crate::RegenResult;
use crate::RenderOutcome;
use crate::default_output_for;
use crate::engine::render_with_context;
use crate::find_outputs_for;
use crate::is_generic;
use crate::parse_yaml_documents;
use crate::resolve;

/// Token that `ctx.outfile()` wraps around a path to start a new output
/// section.
pub const OUTPUT_SENTINEL: &str = "@@regen-outfile-5d9e07b4-8a3c-4f12-b6d1-c2e47f90a318@@";

/// Per-invocation overrides.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
	/// Use this data instead of resolving the data document.
	pub data: Option<Value>,
	/// Write to this path instead of the definition path minus its extension.
	pub output: Option<PathBuf>,
	/// Display name exposed as `ctx.name`.
	pub name: Option<String>,
}

/// What a generation invocation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateReport {
	pub definition: PathBuf,
	/// Number of template documents executed.
	pub passes: usize,
	/// Passes that called `ctx.cancel()`.
	pub canceled: usize,
	/// Passes that called `ctx.skip()`.
	pub skipped: usize,
	/// Every path that received output, in first-write order.
	pub outputs: Vec<PathBuf>,
	/// Paths whose content actually changed on commit.
	pub changed: Vec<PathBuf>,
}

/// Split rendered text into output sections.
///
/// Text without the sentinel goes to `default_output`. Otherwise the text
/// before the first sentinel is discarded and the remainder alternates
/// between a path and that path's content.
pub fn split_output(text: &str, default_output: &Path) -> Vec<PendingWrite> {
	let mut segments = text.split(OUTPUT_SENTINEL);
	let leading = segments.next().unwrap_or_default();
	let mut writes = Vec::new();

	while let Some(path) = segments.next() {
		writes.push(PendingWrite {
			path: PathBuf::from(path),
			content: segments.next().unwrap_or_default().to_string(),
		});
	}

	if writes.is_empty() {
		writes.push(PendingWrite {
			path: default_output.to_path_buf(),
			content: leading.to_string(),
		});
	}

	writes
}

/// Queue the output of a finished pass. A canceled pass also drops whatever
/// its nested renders queued after `checkpoint`.
pub(crate) fn settle(context: &GenerationContext, outcome: RenderOutcome, checkpoint: usize) {
	let run = context.run();

	match outcome {
		RenderOutcome::Rendered(text) => {
			for write in split_output(&text, &context.output()) {
				run.queue(write);
			}
		}
		RenderOutcome::Canceled => run.rollback(checkpoint),
		RenderOutcome::Skipped => {}
	}
}

/// Runs definition files: load, resolve, execute, split, commit.
#[derive(Clone)]
pub struct Generator {
	fileop: Arc<dyn FileOperation>,
	source: Arc<dyn ReferenceSource>,
	markers: MarkerSet,
}

impl std::fmt::Debug for Generator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Generator")
			.field("fileop", &self.fileop)
			.field("markers", &self.markers)
			.finish_non_exhaustive()
	}
}

impl Generator {
	pub fn new(fileop: Arc<dyn FileOperation>) -> Self {
		Self {
			fileop,
			source: Arc::new(HttpReferenceSource::new()),
			markers: MarkerSet::default(),
		}
	}

	/// A generator using the markers and fetch headers from `config`.
	pub fn from_config(fileop: Arc<dyn FileOperation>, config: &RegenConfig) -> RegenResult<Self> {
		let source = HttpReferenceSource::new().with_headers(config.fetch.headers.clone());

		Ok(Self::new(fileop)
			.with_markers(config.marker_set()?)
			.with_reference_source(Arc::new(source)))
	}

	#[must_use]
	pub fn with_markers(mut self, markers: MarkerSet) -> Self {
		self.markers = markers;
		self
	}

	#[must_use]
	pub fn with_reference_source(mut self, source: Arc<dyn ReferenceSource>) -> Self {
		self.source = source;
		self
	}

	pub fn fileop(&self) -> &Arc<dyn FileOperation> {
		&self.fileop
	}

	/// Generate every output of `definition` and commit the result.
	///
	/// Nothing is handed to the [`FileOperation`] until every template
	/// document has rendered without error.
	#[tracing::instrument(level = "debug", skip(self, options), fields(definition = %definition.display()))]
	pub async fn generate(
		&self,
		definition: &Path,
		options: GenerateOptions,
	) -> RegenResult<GenerateReport> {
		let path = definition.display().to_string();
		let text = self
			.fileop
			.read_file(definition)?
			.ok_or_else(|| RegenError::DefinitionNotFound { path: path.clone() })?;

		let mut documents = parse_yaml_documents(&text)?;
		if documents.len() < 2 {
			return Err(RegenError::InvalidDocumentCount {
				path,
				found: documents.len(),
			});
		}

		let templates = documents
			.split_off(1)
			.into_iter()
			.enumerate()
			.map(|(index, document)| {
				match document {
					YamlValue::String(template) => Ok(template),
					_ => {
						Err(RegenError::InvalidTemplateDocument {
							path: path.clone(),
							index: index + 2,
						})
					}
				}
			})
			.collect::<RegenResult<Vec<_>>>()?;

		let data_node = documents
			.pop()
			.map(DataNode::from_yaml)
			.transpose()?
			.unwrap_or(DataNode::Scalar(Value::Null));
		let base_dir = definition.parent().unwrap_or_else(|| Path::new(""));

		let data = match options.data {
			Some(data) => data,
			None => {
				tracing::debug!(deferred = data_node.has_deferred(), "resolving data");
				resolve(&data_node, base_dir, self.source.as_ref()).await?
			}
		};

		let output = options
			.output
			.unwrap_or_else(|| default_output_for(definition));
		let run = Arc::new(GenerationRun::new(self.fileop.clone(), self.markers.clone()));
		let mut report = GenerateReport {
			definition: definition.to_path_buf(),
			passes: templates.len(),
			..GenerateReport::default()
		};

		for template in &templates {
			let context = Arc::new(GenerationContext::new(
				run.clone(),
				ContextOptions {
					input: definition.to_path_buf(),
					output: output.clone(),
					cwd: None,
					name: options.name.clone(),
					data: data.clone(),
				},
			)?);

			let checkpoint = run.checkpoint();
			let outcome = render_with_context(template, &context)?;
			match &outcome {
				RenderOutcome::Canceled => report.canceled += 1,
				RenderOutcome::Skipped => report.skipped += 1,
				RenderOutcome::Rendered(_) => {}
			}
			settle(&context, outcome, checkpoint);
		}

		for write in run.take_pending() {
			self.fileop.write_file(&write.path, &write.content)?;
			if !report.outputs.contains(&write.path) {
				report.outputs.push(write.path);
			}
		}

		report.changed = self.fileop.commit()?;
		tracing::debug!(
			outputs = report.outputs.len(),
			changed = report.changed.len(),
			"generated"
		);

		Ok(report)
	}

	/// Generate every output `definition` applies to. A generic definition
	/// runs once per matching file on disk, each as its own invocation.
	pub async fn generate_all(&self, definition: &Path) -> RegenResult<Vec<GenerateReport>> {
		if !is_generic(definition) {
			return Ok(vec![self.generate(definition, GenerateOptions::default()).await?]);
		}

		let mut reports = Vec::new();
		for output in find_outputs_for(definition)? {
			let options = GenerateOptions {
				output: Some(output),
				..GenerateOptions::default()
			};
			reports.push(self.generate(definition, options).await?);
		}

		Ok(reports)
	}
}
