use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum RegenError {
	#[error(transparent)]
	#[diagnostic(code(regen::io_error))]
	Io(#[from] std::io::Error),

	#[error("definition file not found: `{path}`")]
	#[diagnostic(
		code(regen::definition_not_found),
		help("pass the path of an existing `*.regen` definition file")
	)]
	DefinitionNotFound { path: String },

	#[error("definition `{path}` has {found} document(s), expected at least 2")]
	#[diagnostic(
		code(regen::invalid_document_count),
		help(
			"a definition starts with a data document followed by one or more template \
			 documents, separated by `---`"
		)
	)]
	InvalidDocumentCount { path: String, found: usize },

	#[error("document {index} of `{path}` is not a template string")]
	#[diagnostic(
		code(regen::invalid_template_document),
		help("write template documents as YAML block scalars, e.g. `--- |`")
	)]
	InvalidTemplateDocument { path: String, index: usize },

	#[error("invalid data document: {0}")]
	#[diagnostic(code(regen::invalid_data_document))]
	InvalidDataDocument(String),

	#[error("begin marker `{begin}` must contain `@name`")]
	#[diagnostic(
		code(regen::invalid_marker_pattern),
		help("the block name is captured where `@name` appears, e.g. `// {{{{{{ @name`")
	)]
	InvalidMarkerPattern { begin: String },

	#[error("end marker paired with `{begin}` must not be blank")]
	#[diagnostic(
		code(regen::blank_end_marker),
		help("a blank end marker would close every block on its first line")
	)]
	BlankEndMarker { begin: String },

	#[error("marker index {index} is out of range ({len} marker pair(s) registered)")]
	#[diagnostic(code(regen::marker_index_out_of_range))]
	MarkerIndexOutOfRange { index: usize, len: usize },

	#[error("failed to compile marker pattern: {0}")]
	#[diagnostic(code(regen::invalid_marker_regex))]
	InvalidMarkerRegex(String),

	#[error("template file not found: `{path}`")]
	#[diagnostic(code(regen::template_not_found))]
	TemplateNotFound { path: String },

	#[error("failed to resolve `{locator}`: {reason}")]
	#[diagnostic(code(regen::resolution_failure))]
	Resolution { locator: String, reason: String },

	#[error("template rendering failed: {0}")]
	#[diagnostic(code(regen::template_render))]
	TemplateRender(String),

	#[error("nested render depth exceeded ({depth} levels)")]
	#[diagnostic(
		code(regen::render_depth_exceeded),
		help("check for templates that render themselves")
	)]
	RenderDepthExceeded { depth: usize },

	#[error("failed to process yaml: {0}")]
	#[diagnostic(code(regen::yaml))]
	Yaml(String),

	#[error("failed to parse config file: {0}")]
	#[diagnostic(
		code(regen::config_parse),
		help("check that regen.toml is valid TOML with [[markers]] and/or [fetch] sections")
	)]
	ConfigParse(String),

	#[error("template discovery failed for `{path}`: {reason}")]
	#[diagnostic(code(regen::discovery))]
	Discovery { path: String, reason: String },

	#[error("failed to write `{path}`: {reason}")]
	#[diagnostic(code(regen::commit))]
	Commit { path: String, reason: String },
}

pub type RegenResult<T> = Result<T, RegenError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
