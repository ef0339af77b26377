use std::collections::BTreeMap;
use std::path::Path;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::Value;
use serde_yaml_ng::Value as YamlValue;
use serde_yaml_ng::value::TaggedValue;

use crate::RegenError;
use crate::RegenResult;

/// How the text behind a deferred reference is turned into data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Materialization {
	/// Parsed as JSON.
	Json,
	/// Kept verbatim as a string.
	Text,
	/// Parsed as a single YAML document, which may hold further references.
	Yaml,
	/// Parsed as a YAML document stream into a sequence.
	#[serde(rename = "yamls", alias = "yaml-stream")]
	YamlStream,
}

impl Materialization {
	fn from_suffix(suffix: &str) -> Option<Self> {
		match suffix {
			"json" => Some(Self::Json),
			"text" => Some(Self::Text),
			"yaml" => Some(Self::Yaml),
			"yamls" => Some(Self::YamlStream),
			_ => None,
		}
	}

	/// Guess from a file extension. Unknown extensions are read as text.
	fn from_path(path: &str) -> Self {
		let extension = Path::new(path)
			.extension()
			.and_then(|e| e.to_str())
			.unwrap_or("")
			.to_ascii_lowercase();

		match extension.as_str() {
			"json" => Self::Json,
			"yaml" | "yml" => Self::Yaml,
			_ => Self::Text,
		}
	}
}

/// Where a deferred reference gets its text from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
	/// Remote fetch by URL.
	Fetch,
	/// Local file read, relative to the containing document.
	Read,
}

/// Request options for `!fetch` references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FetchOptions {
	#[serde(default)]
	pub method: Option<String>,
	#[serde(default)]
	pub headers: BTreeMap<String, String>,
	#[serde(default)]
	pub body: Option<String>,
}

/// A node standing for data that is fetched or read at resolution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredReference {
	pub kind: ReferenceKind,
	pub materialization: Materialization,
	/// URL for fetches, path for reads.
	pub locator: String,
	pub options: FetchOptions,
}

/// A loaded data document before resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum DataNode {
	Scalar(Value),
	Sequence(Vec<DataNode>),
	Mapping(Vec<(String, DataNode)>),
	Deferred(DeferredReference),
}

#[derive(Deserialize)]
struct FetchTag {
	url: String,
	#[serde(default)]
	options: FetchOptions,
	#[serde(default, rename = "type")]
	materialization: Option<Materialization>,
}

#[derive(Deserialize)]
struct ReadTag {
	path: String,
	#[serde(default, rename = "type")]
	materialization: Option<Materialization>,
}

impl DataNode {
	/// Convert a parsed YAML value, turning `!fetch*` and `!read*` tags into
	/// [`DataNode::Deferred`] nodes.
	pub fn from_yaml(value: YamlValue) -> RegenResult<Self> {
		let node = match value {
			YamlValue::Sequence(items) => {
				Self::Sequence(
					items
						.into_iter()
						.map(Self::from_yaml)
						.collect::<RegenResult<_>>()?,
				)
			}
			YamlValue::Mapping(mapping) => {
				let mut entries = Vec::with_capacity(mapping.len());
				for (key, value) in mapping {
					entries.push((mapping_key(&key)?, Self::from_yaml(value)?));
				}
				Self::Mapping(entries)
			}
			YamlValue::Tagged(tagged) => Self::Deferred(deferred_from_tag(*tagged)?),
			scalar => Self::Scalar(scalar_to_json(scalar)?),
		};

		Ok(node)
	}

	/// Returns true when the node or any descendant is deferred.
	pub fn has_deferred(&self) -> bool {
		match self {
			Self::Scalar(_) => false,
			Self::Sequence(items) => items.iter().any(Self::has_deferred),
			Self::Mapping(entries) => entries.iter().any(|(_, node)| node.has_deferred()),
			Self::Deferred(_) => true,
		}
	}
}

fn invalid(message: impl Into<String>) -> RegenError {
	RegenError::InvalidDataDocument(message.into())
}

fn mapping_key(key: &YamlValue) -> RegenResult<String> {
	match key {
		YamlValue::String(s) => Ok(s.clone()),
		YamlValue::Number(n) => Ok(n.to_string()),
		YamlValue::Bool(b) => Ok(b.to_string()),
		YamlValue::Null => Ok("null".to_string()),
		other => Err(invalid(format!("unsupported mapping key `{other:?}`"))),
	}
}

fn scalar_to_json(value: YamlValue) -> RegenResult<Value> {
	match value {
		YamlValue::Null => Ok(Value::Null),
		YamlValue::Bool(b) => Ok(Value::Bool(b)),
		YamlValue::String(s) => Ok(Value::String(s)),
		YamlValue::Number(n) => {
			if let Some(i) = n.as_i64() {
				Ok(Value::from(i))
			} else if let Some(u) = n.as_u64() {
				Ok(Value::from(u))
			} else {
				let float = n.as_f64().unwrap_or(f64::NAN);
				serde_json::Number::from_f64(float)
					.map(Value::Number)
					.ok_or_else(|| invalid(format!("unrepresentable number `{n}`")))
			}
		}
		other => Err(invalid(format!("unexpected value `{other:?}`"))),
	}
}

fn deferred_from_tag(tagged: TaggedValue) -> RegenResult<DeferredReference> {
	let tag = tagged.tag.to_string();
	let tag = tag.trim_start_matches('!');

	match tag {
		"fetch" => {
			let payload: FetchTag = serde_yaml_ng::from_value(tagged.value)
				.map_err(|e| invalid(format!("`!fetch` expects {{url, options, type}}: {e}")))?;
			Ok(DeferredReference {
				kind: ReferenceKind::Fetch,
				materialization: payload.materialization.unwrap_or(Materialization::Json),
				locator: payload.url,
				options: payload.options,
			})
		}
		"read" => {
			let payload: ReadTag = serde_yaml_ng::from_value(tagged.value)
				.map_err(|e| invalid(format!("`!read` expects {{path, type}}: {e}")))?;
			Ok(DeferredReference {
				kind: ReferenceKind::Read,
				materialization: payload
					.materialization
					.unwrap_or_else(|| Materialization::from_path(&payload.path)),
				locator: payload.path,
				options: FetchOptions::default(),
			})
		}
		other => {
			let (kind, suffix) = if let Some(suffix) = other.strip_prefix("fetch") {
				(ReferenceKind::Fetch, suffix)
			} else if let Some(suffix) = other.strip_prefix("read") {
				(ReferenceKind::Read, suffix)
			} else {
				return Err(invalid(format!("unknown tag `!{other}`")));
			};

			let materialization = Materialization::from_suffix(suffix)
				.ok_or_else(|| invalid(format!("unknown tag `!{other}`")))?;
			let YamlValue::String(locator) = tagged.value else {
				return Err(invalid(format!("`!{other}` expects a string")));
			};

			Ok(DeferredReference {
				kind,
				materialization,
				locator,
				options: FetchOptions::default(),
			})
		}
	}
}

/// Parse every document in a YAML stream.
pub fn parse_yaml_documents(text: &str) -> RegenResult<Vec<YamlValue>> {
	serde_yaml_ng::Deserializer::from_str(text)
		.map(|document| YamlValue::deserialize(document).map_err(|e| RegenError::Yaml(e.to_string())))
		.collect()
}

/// Load a single YAML document as a data tree.
pub fn load_yaml(text: &str) -> RegenResult<DataNode> {
	let value: YamlValue =
		serde_yaml_ng::from_str(text).map_err(|e| RegenError::Yaml(e.to_string()))?;
	DataNode::from_yaml(value)
}

/// Load every document of a YAML stream as data trees.
pub fn load_yaml_stream(text: &str) -> RegenResult<Vec<DataNode>> {
	parse_yaml_documents(text)?
		.into_iter()
		.map(DataNode::from_yaml)
		.collect()
}

/// Parse a single YAML document into plain data. Blank input is null.
pub fn from_yaml(text: &str) -> RegenResult<Value> {
	if text.trim().is_empty() {
		return Ok(Value::Null);
	}

	serde_yaml_ng::from_str(text).map_err(|e| RegenError::Yaml(e.to_string()))
}

/// Serialize plain data as a YAML document.
pub fn to_yaml(value: &Value) -> RegenResult<String> {
	serde_yaml_ng::to_string(value).map_err(|e| RegenError::Yaml(e.to_string()))
}

/// Parse every document of a YAML stream into plain data.
pub fn from_yamls(text: &str) -> RegenResult<Vec<Value>> {
	serde_yaml_ng::Deserializer::from_str(text)
		.map(|document| Value::deserialize(document).map_err(|e| RegenError::Yaml(e.to_string())))
		.collect()
}

/// Serialize values as a YAML stream, each document introduced by `---`.
pub fn to_yamls(values: &[Value]) -> RegenResult<String> {
	let mut stream = String::new();
	for value in values {
		stream.push_str("---\n");
		stream.push_str(&to_yaml(value)?);
	}
	Ok(stream)
}

/// The effects behind deferred references.
pub trait ReferenceSource: Send + Sync {
	/// Fetch the body of `url`.
	fn fetch<'a>(
		&'a self,
		url: &'a str,
		options: &'a FetchOptions,
	) -> BoxFuture<'a, RegenResult<String>>;

	/// Read a local file.
	fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, RegenResult<String>>;
}

/// Fetches over HTTP with `reqwest` and reads with `tokio::fs`.
#[derive(Debug, Clone, Default)]
pub struct HttpReferenceSource {
	client: reqwest::Client,
	headers: BTreeMap<String, String>,
}

impl HttpReferenceSource {
	pub fn new() -> Self {
		Self::default()
	}

	/// Send `headers` with every fetch. Headers given on a reference win.
	#[must_use]
	pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
		self.headers = headers;
		self
	}
}

fn resolution_error(locator: &str, reason: impl ToString) -> RegenError {
	RegenError::Resolution {
		locator: locator.to_string(),
		reason: reason.to_string(),
	}
}

impl ReferenceSource for HttpReferenceSource {
	fn fetch<'a>(
		&'a self,
		url: &'a str,
		options: &'a FetchOptions,
	) -> BoxFuture<'a, RegenResult<String>> {
		async move {
			let method = match &options.method {
				Some(method) => {
					reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
						.map_err(|e| resolution_error(url, e))?
				}
				None => reqwest::Method::GET,
			};

			let mut headers = self.headers.clone();
			headers.extend(options.headers.clone());

			let mut request = self.client.request(method, url);
			for (name, value) in &headers {
				request = request.header(name.as_str(), value.as_str());
			}
			if let Some(body) = &options.body {
				request = request.body(body.clone());
			}

			let response = request
				.send()
				.await
				.and_then(reqwest::Response::error_for_status)
				.map_err(|e| resolution_error(url, e))?;

			response.text().await.map_err(|e| resolution_error(url, e))
		}
		.boxed()
	}

	fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, RegenResult<String>> {
		async move {
			tokio::fs::read_to_string(path)
				.await
				.map_err(|e| resolution_error(&path.display().to_string(), e))
		}
		.boxed()
	}
}

/// Resolve every deferred reference in `node`, preserving its shape.
///
/// Siblings of a sequence or mapping resolve concurrently. The first failure
/// aborts the whole resolution.
pub fn resolve<'a>(
	node: &'a DataNode,
	base_dir: &'a Path,
	source: &'a dyn ReferenceSource,
) -> BoxFuture<'a, RegenResult<Value>> {
	async move {
		match node {
			DataNode::Scalar(value) => Ok(value.clone()),
			DataNode::Sequence(items) => {
				let values =
					try_join_all(items.iter().map(|item| resolve(item, base_dir, source))).await?;
				Ok(Value::Array(values))
			}
			DataNode::Mapping(entries) => {
				let values = try_join_all(
					entries
						.iter()
						.map(|(_, value)| resolve(value, base_dir, source)),
				)
				.await?;
				let map = entries
					.iter()
					.map(|(key, _)| key.clone())
					.zip(values)
					.collect::<serde_json::Map<_, _>>();
				Ok(Value::Object(map))
			}
			DataNode::Deferred(reference) => resolve_reference(reference, base_dir, source).await,
		}
	}
	.boxed()
}

#[tracing::instrument(level = "debug", skip_all, fields(locator = %reference.locator))]
async fn resolve_reference(
	reference: &DeferredReference,
	base_dir: &Path,
	source: &dyn ReferenceSource,
) -> RegenResult<Value> {
	let (text, nested_base) = match reference.kind {
		ReferenceKind::Fetch => {
			let text = source.fetch(&reference.locator, &reference.options).await?;
			(text, base_dir.to_path_buf())
		}
		ReferenceKind::Read => {
			let path = base_dir.join(&reference.locator);
			let text = source.read(&path).await?;
			let dir = path
				.parent()
				.map_or_else(|| base_dir.to_path_buf(), Path::to_path_buf);
			(text, dir)
		}
	};

	tracing::debug!(bytes = text.len(), "resolved reference");

	let decode_error = |e: RegenError| resolution_error(&reference.locator, e);

	match reference.materialization {
		Materialization::Json => {
			serde_json::from_str(&text).map_err(|e| resolution_error(&reference.locator, e))
		}
		Materialization::Text => Ok(Value::String(text)),
		Materialization::Yaml => {
			let node = load_yaml(&text).map_err(decode_error)?;
			resolve(&node, &nested_base, source).await
		}
		Materialization::YamlStream => {
			let nodes = load_yaml_stream(&text).map_err(decode_error)?;
			let values =
				try_join_all(nodes.iter().map(|node| resolve(node, &nested_base, source))).await?;
			Ok(Value::Array(values))
		}
	}
}
