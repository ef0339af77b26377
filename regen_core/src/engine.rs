use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use minijinja::AutoEscape;
use minijinja::Environment;
use minijinja::Error;
use minijinja::ErrorKind;
use minijinja::State;
use minijinja::UndefinedBehavior;
use minijinja::Value;
use minijinja::value::Enumerator;
use minijinja::value::Object;
use minijinja::value::from_args;

use crate::ContextStatus;
use crate::GenerationContext;
use crate::MarkerPattern;
use crate::RegenError;
use crate::RegenResult;
use crate::data;
use crate::fileop::lock;
use crate::generator::settle;

/// Result of executing a template against a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
	Rendered(String),
	/// The template called `ctx.cancel()`.
	Canceled,
	/// The template called `ctx.skip()`.
	Skipped,
}

const ATTRIBUTES: &[&str] = &["name", "input", "output", "cwd"];

/// The `ctx` value exposed to templates.
#[derive(Debug)]
pub struct TemplateContext {
	context: Arc<GenerationContext>,
	/// First domain error raised by a method, reported in place of the
	/// engine's wrapped error.
	failure: Mutex<Option<RegenError>>,
}

impl TemplateContext {
	pub fn new(context: Arc<GenerationContext>) -> Self {
		Self {
			context,
			failure: Mutex::new(None),
		}
	}

	fn take_failure(&self) -> Option<RegenError> {
		lock(&self.failure).take()
	}

	fn fail(&self, error: RegenError) -> Error {
		let message = error.to_string();
		let mut failure = lock(&self.failure);
		if failure.is_none() {
			*failure = Some(error);
		}
		Error::new(ErrorKind::InvalidOperation, message)
	}

	fn check<T>(&self, result: RegenResult<T>) -> Result<T, Error> {
		result.map_err(|e| self.fail(e))
	}

	fn to_json(&self, value: &Value) -> Result<serde_json::Value, Error> {
		self.check(
			serde_json::to_value(value).map_err(|e| RegenError::TemplateRender(e.to_string())),
		)
	}

	fn marker_patterns(&self, args: &[Value]) -> Result<Vec<MarkerPattern>, Error> {
		if let [begin, end] = args {
			if let (Some(begin), Some(end)) = (begin.as_str(), end.as_str()) {
				return Ok(vec![MarkerPattern::new(begin, end)]);
			}
		}

		let (patterns,): (Value,) = from_args(args)?;
		let patterns = match self.to_json(&patterns)? {
			single @ serde_json::Value::Object(_) => serde_json::Value::Array(vec![single]),
			list => list,
		};
		self.check(serde_json::from_value(patterns).map_err(|e| {
			RegenError::TemplateRender(format!(
				"`marker` expects a list of {{begin, end}} pairs: {e}"
			))
		}))
	}
}

fn display(path: &Path) -> String {
	path.display().to_string()
}

impl Object for TemplateContext {
	fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
		let value = match key.as_str()? {
			"name" => Value::from(self.context.name()),
			"input" => Value::from(display(self.context.input())),
			"output" => Value::from(display(&self.context.output())),
			"cwd" => Value::from(display(self.context.cwd())),
			_ => return None,
		};

		Some(value)
	}

	fn enumerate(self: &Arc<Self>) -> Enumerator {
		Enumerator::Str(ATTRIBUTES)
	}

	fn call_method(
		self: &Arc<Self>,
		state: &State<'_, '_>,
		method: &str,
		args: &[Value],
	) -> Result<Value, Error> {
		let context = &self.context;

		match method {
			"raw_block" => {
				let (name,): (&str,) = from_args(args)?;
				Ok(Value::from(context.raw_block(name)))
			}
			"block" => {
				let (name, default_content, marker_index): (&str, Option<&str>, Option<usize>) =
					from_args(args)?;
				let block =
					self.check(context.block(name, default_content, marker_index.unwrap_or(0)))?;
				Ok(Value::from(block))
			}
			"set_block" => {
				let (name, content, marker_index): (&str, &str, Option<usize>) = from_args(args)?;
				self.check(context.set_block(name, content, marker_index.unwrap_or(0)))?;
				Ok(Value::UNDEFINED)
			}
			"data_block" => {
				let (name, defaults, marker_index): (&str, Option<Value>, Option<usize>) =
					from_args(args)?;
				let defaults = match defaults {
					Some(defaults) => self.to_json(&defaults)?,
					None => serde_json::Value::Null,
				};
				let data =
					self.check(context.data_block(name, defaults, marker_index.unwrap_or(0)))?;
				Ok(Value::from_serialize(&data))
			}
			"modify_block" => {
				let (name, transform, marker_index): (&str, Value, Option<usize>) =
					from_args(args)?;
				let modified = self.check(context.modify_block(
					name,
					|content| {
						transform
							.call(state, &[Value::from(content)])
							.map(|value| value.to_string())
							.map_err(|e| RegenError::TemplateRender(e.to_string()))
					},
					marker_index.unwrap_or(0),
				))?;
				Ok(Value::from(modified))
			}
			"marker" => {
				let patterns = self.marker_patterns(args)?;
				self.check(context.marker(patterns))?;
				Ok(Value::UNDEFINED)
			}
			"outfile" => {
				let (path,): (&str,) = from_args(args)?;
				Ok(Value::from(self.check(context.outfile(path))?))
			}
			"render" => {
				let (template, output, data): (&str, &str, Option<Value>) = from_args(args)?;
				let data = data.map(|data| self.to_json(&data)).transpose()?;
				self.check(render_nested(context, template, output, data))?;
				Ok(Value::UNDEFINED)
			}
			"cancel" => {
				context.cancel();
				Err(Error::new(ErrorKind::InvalidOperation, "generation canceled"))
			}
			"skip" => {
				context.skip();
				Ok(Value::UNDEFINED)
			}
			"read" => {
				let (path,): (&str,) = from_args(args)?;
				Ok(Value::from(self.check(context.read(path))?))
			}
			"capitalize" => {
				let (text,): (&str,) = from_args(args)?;
				Ok(Value::from(capitalize(text)))
			}
			"uncapitalize" => {
				let (text,): (&str,) = from_args(args)?;
				Ok(Value::from(uncapitalize(text)))
			}
			"dirname" => {
				let (path,): (&str,) = from_args(args)?;
				Ok(Value::from(dirname(path)))
			}
			"basename" => {
				let (path, extension): (&str, Option<&str>) = from_args(args)?;
				Ok(Value::from(basename(path, extension)))
			}
			"extname" => {
				let (path,): (&str,) = from_args(args)?;
				Ok(Value::from(extname(path)))
			}
			"from_yaml" => {
				let (text,): (&str,) = from_args(args)?;
				let value = self.check(data::from_yaml(text))?;
				Ok(Value::from_serialize(&value))
			}
			"to_yaml" => {
				let (value,): (Value,) = from_args(args)?;
				let value = self.to_json(&value)?;
				Ok(Value::from(self.check(data::to_yaml(&value))?))
			}
			"from_yamls" => {
				let (text,): (&str,) = from_args(args)?;
				let values = self.check(data::from_yamls(text))?;
				Ok(Value::from_serialize(&values))
			}
			"to_yamls" => {
				let (values,): (Value,) = from_args(args)?;
				let values = match self.to_json(&values)? {
					serde_json::Value::Array(values) => values,
					value => vec![value],
				};
				Ok(Value::from(self.check(data::to_yamls(&values))?))
			}
			_ => Err(Error::from(ErrorKind::UnknownMethod)),
		}
	}
}

fn environment() -> Environment<'static> {
	let mut env = Environment::new();
	env.set_keep_trailing_newline(true);
	env.set_undefined_behavior(UndefinedBehavior::Chainable);
	env.set_auto_escape_callback(|_| AutoEscape::None);
	env
}

/// Top-level template variables: the keys of a mapping data root, or the
/// root itself as `data`, plus `ctx`.
fn template_variables(data: &serde_json::Value, ctx: Value) -> BTreeMap<String, Value> {
	let mut variables = BTreeMap::new();

	match data {
		serde_json::Value::Object(map) => {
			for (key, value) in map {
				variables.insert(key.clone(), Value::from_serialize(value));
			}
		}
		other => {
			variables.insert("data".to_string(), Value::from_serialize(other));
		}
	}

	variables.insert("ctx".to_string(), ctx);
	variables
}

/// Execute `source` with `context` bound as `ctx`.
pub fn render_with_context(
	source: &str,
	context: &Arc<GenerationContext>,
) -> RegenResult<RenderOutcome> {
	let env = environment();
	let ctx = Value::from_object(TemplateContext::new(context.clone()));
	let variables = template_variables(context.data(), ctx.clone());
	let name = display(context.input());

	let result = env.render_named_str(&name, source, variables);
	let failure = ctx
		.downcast_object_ref::<TemplateContext>()
		.and_then(TemplateContext::take_failure);

	match (result, context.status()) {
		(_, ContextStatus::Canceled) => {
			tracing::debug!(template = %name, "canceled");
			Ok(RenderOutcome::Canceled)
		}
		(Err(e), _) => Err(failure.unwrap_or_else(|| RegenError::TemplateRender(e.to_string()))),
		(Ok(_), ContextStatus::Skipped) => {
			tracing::debug!(template = %name, "skipped");
			Ok(RenderOutcome::Skipped)
		}
		(Ok(text), ContextStatus::Active) => Ok(RenderOutcome::Rendered(text)),
	}
}

/// Render the template at `template` into `output`, both relative to the
/// parent's working directory.
fn render_nested(
	parent: &GenerationContext,
	template: &str,
	output: &str,
	data: Option<serde_json::Value>,
) -> RegenResult<()> {
	let input = parent.resolve_path(template);
	let output = parent.resolve_path(output);
	let source = parent.run().fileop().read_file(&input)?.ok_or_else(|| {
		RegenError::TemplateNotFound {
			path: display(&input),
		}
	})?;

	let data = data.unwrap_or_else(|| parent.data().clone());
	let child = Arc::new(parent.child(input, output, data)?);
	let child_output = child.output();
	tracing::debug!(
		template = %child.input().display(),
		output = %child_output.display(),
		depth = child.depth(),
		"nested render"
	);

	let checkpoint = child.run().checkpoint();
	let outcome = render_with_context(&source, &child)?;
	settle(&child, outcome, checkpoint);

	Ok(())
}

/// Uppercase the first character.
pub fn capitalize(text: &str) -> String {
	let mut chars = text.chars();
	match chars.next() {
		Some(first) => first.to_uppercase().chain(chars).collect(),
		None => String::new(),
	}
}

/// Lowercase the first character.
pub fn uncapitalize(text: &str) -> String {
	let mut chars = text.chars();
	match chars.next() {
		Some(first) => first.to_lowercase().chain(chars).collect(),
		None => String::new(),
	}
}

/// The directory part of `path`, `.` when there is none.
pub fn dirname(path: &str) -> String {
	match Path::new(path).parent() {
		Some(parent) if parent.as_os_str().is_empty() => ".".to_string(),
		Some(parent) => display(parent),
		None if path.starts_with('/') => "/".to_string(),
		None => ".".to_string(),
	}
}

/// The last component of `path`, without `extension` when it ends with it.
pub fn basename(path: &str, extension: Option<&str>) -> String {
	let name = Path::new(path)
		.file_name()
		.and_then(|name| name.to_str())
		.unwrap_or_default();

	match extension {
		Some(extension) if name != extension => {
			name.strip_suffix(extension).unwrap_or(name).to_string()
		}
		_ => name.to_string(),
	}
}

/// The extension of the last component of `path` including the leading dot,
/// or an empty string.
pub fn extname(path: &str) -> String {
	let name = Path::new(path)
		.file_name()
		.and_then(|name| name.to_str())
		.unwrap_or_default();

	match name.rfind('.') {
		Some(index) if index > 0 => name[index..].to_string(),
		_ => String::new(),
	}
}
