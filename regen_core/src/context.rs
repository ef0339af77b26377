use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;

use crate::Block;
use crate::BlockTable;
use crate::FileOperation;
use crate::MarkerPattern;
use crate::MarkerSet;
use crate::RegenError;
use crate::RegenResult;
use crate::data::from_yaml;
use crate::data::to_yaml;
use crate::extract_blocks;
use crate::fileop::lock;
use crate::generator::OUTPUT_SENTINEL;

/// Maximum nesting of `render` calls inside one invocation.
pub const MAX_RENDER_DEPTH: usize = 32;

/// Output queued by a generation pass, not yet handed to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
	pub path: PathBuf,
	pub content: String,
}

/// State shared by every context of one top-level invocation: the storage
/// collaborator, the default markers, and the accumulated output.
#[derive(Debug)]
pub struct GenerationRun {
	fileop: Arc<dyn FileOperation>,
	markers: MarkerSet,
	queue: Mutex<Vec<PendingWrite>>,
}

impl GenerationRun {
	pub fn new(fileop: Arc<dyn FileOperation>, markers: MarkerSet) -> Self {
		Self {
			fileop,
			markers,
			queue: Mutex::new(Vec::new()),
		}
	}

	pub fn fileop(&self) -> &dyn FileOperation {
		self.fileop.as_ref()
	}

	/// Markers each new context starts with.
	pub fn markers(&self) -> &MarkerSet {
		&self.markers
	}

	/// The latest content for `path`: queued output from this invocation
	/// first, then storage.
	pub fn previous_output(&self, path: &Path) -> RegenResult<Option<String>> {
		let queued = lock(&self.queue)
			.iter()
			.rev()
			.find(|write| write.path == path)
			.map(|write| write.content.clone());

		match queued {
			Some(content) => Ok(Some(content)),
			None => self.fileop.read_file(path),
		}
	}

	pub fn queue(&self, write: PendingWrite) {
		tracing::debug!(path = %write.path.display(), bytes = write.content.len(), "queued output");
		lock(&self.queue).push(write);
	}

	/// Position in the queue that [`GenerationRun::rollback`] can return to.
	pub fn checkpoint(&self) -> usize {
		lock(&self.queue).len()
	}

	/// Drop everything queued after `checkpoint`.
	pub fn rollback(&self, checkpoint: usize) {
		let mut queue = lock(&self.queue);
		if queue.len() > checkpoint {
			tracing::debug!(dropped = queue.len() - checkpoint, "discarded queued output");
			queue.truncate(checkpoint);
		}
	}

	/// Queued writes in order.
	pub fn pending(&self) -> Vec<PendingWrite> {
		lock(&self.queue).clone()
	}

	/// Remove and return every queued write.
	pub fn take_pending(&self) -> Vec<PendingWrite> {
		std::mem::take(&mut *lock(&self.queue))
	}
}

/// Whether a pass still produces output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStatus {
	Active,
	/// `cancel()` was called. No output is produced for this pass or the
	/// passes it spawned.
	Canceled,
	/// `skip()` was called. This pass emits nothing.
	Skipped,
}

/// Construction options for a root [`GenerationContext`].
#[derive(Debug, Clone)]
pub struct ContextOptions {
	/// The template or definition path.
	pub input: PathBuf,
	/// Initial output path.
	pub output: PathBuf,
	/// Base for relative paths. Defaults to the input's directory.
	pub cwd: Option<PathBuf>,
	/// Display name. Defaults to the output's base name up to its first `.`.
	pub name: Option<String>,
	/// Resolved data root.
	pub data: Value,
}

#[derive(Debug)]
struct ContextState {
	output: PathBuf,
	previous: Option<String>,
	markers: MarkerSet,
	blocks: BlockTable,
	status: ContextStatus,
}

/// Rendering state for one template execution against one output.
#[derive(Debug)]
pub struct GenerationContext {
	run: Arc<GenerationRun>,
	input: PathBuf,
	cwd: PathBuf,
	name: String,
	data: Value,
	depth: usize,
	state: Mutex<ContextState>,
}

impl GenerationContext {
	pub fn new(run: Arc<GenerationRun>, options: ContextOptions) -> RegenResult<Self> {
		let cwd = options
			.cwd
			.unwrap_or_else(|| parent_dir(&options.input));
		Self::build(run, options.input, options.output, cwd, options.name, options.data, 0)
	}

	fn build(
		run: Arc<GenerationRun>,
		input: PathBuf,
		output: PathBuf,
		cwd: PathBuf,
		name: Option<String>,
		data: Value,
		depth: usize,
	) -> RegenResult<Self> {
		let markers = run.markers().clone();
		let previous = run.previous_output(&output)?;
		let blocks = extract_blocks(previous.as_deref().unwrap_or(""), &markers);
		let name = name.unwrap_or_else(|| display_name(&output));

		Ok(Self {
			run,
			input,
			cwd,
			name,
			data,
			depth,
			state: Mutex::new(ContextState {
				output,
				previous,
				markers,
				blocks,
				status: ContextStatus::Active,
			}),
		})
	}

	/// A context for a nested render of `input` into `output`. The child has
	/// its own blocks and status and shares the invocation's output queue.
	pub fn child(&self, input: PathBuf, output: PathBuf, data: Value) -> RegenResult<Self> {
		let depth = self.depth + 1;
		if depth > MAX_RENDER_DEPTH {
			return Err(RegenError::RenderDepthExceeded { depth });
		}

		let cwd = parent_dir(&output);
		Self::build(self.run.clone(), input, output, cwd, None, data, depth)
	}

	pub fn run(&self) -> &Arc<GenerationRun> {
		&self.run
	}

	pub fn input(&self) -> &Path {
		&self.input
	}

	pub fn cwd(&self) -> &Path {
		&self.cwd
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn data(&self) -> &Value {
		&self.data
	}

	pub fn depth(&self) -> usize {
		self.depth
	}

	/// The current output path.
	pub fn output(&self) -> PathBuf {
		lock(&self.state).output.clone()
	}

	pub fn status(&self) -> ContextStatus {
		lock(&self.state).status
	}

	pub fn is_canceled(&self) -> bool {
		self.status() == ContextStatus::Canceled
	}

	/// Names of the blocks currently known, sorted.
	pub fn block_names(&self) -> Vec<String> {
		lock(&self.state)
			.blocks
			.names()
			.into_iter()
			.map(str::to_string)
			.collect()
	}

	/// Stored content of `name`, or an empty string.
	pub fn raw_block(&self, name: &str) -> String {
		lock(&self.state)
			.blocks
			.get(name)
			.map(|block| block.content.clone())
			.unwrap_or_default()
	}

	/// The wrapped block for `name`. An existing block is echoed unchanged;
	/// otherwise a new one is built around `default_content`.
	pub fn block(
		&self,
		name: &str,
		default_content: Option<&str>,
		marker_index: usize,
	) -> RegenResult<String> {
		let state = lock(&self.state);
		if let Some(block) = state.blocks.get(name) {
			return Ok(block.wrapped());
		}

		let block = Block::synthesize(
			&state.markers,
			name,
			default_content.unwrap_or_default(),
			marker_index,
		)?;
		Ok(block.wrapped())
	}

	/// Replace the content of `name`, creating the block when missing.
	pub fn set_block(
		&self,
		name: &str,
		content: impl Into<String>,
		marker_index: usize,
	) -> RegenResult<()> {
		let mut state = lock(&self.state);
		let content = content.into();

		if let Some(block) = state.blocks.get_mut(name) {
			block.content = content;
			return Ok(());
		}

		let block = Block::synthesize(&state.markers, name, content, marker_index)?;
		state.blocks.insert(name.to_string(), block);
		Ok(())
	}

	/// Read `name` as YAML, falling back to `defaults` when it holds nothing,
	/// and write the value back in canonical form.
	pub fn data_block(&self, name: &str, defaults: Value, marker_index: usize) -> RegenResult<Value> {
		let raw = self.raw_block(name);
		let data = match from_yaml(&raw)? {
			Value::Null => defaults,
			value => value,
		};

		let serialized = to_yaml(&data)?;
		self.set_block(name, serialized.trim_end_matches('\n'), marker_index)?;
		Ok(data)
	}

	/// Apply `transform` to the content of `name` and store the result.
	pub fn modify_block(
		&self,
		name: &str,
		transform: impl FnOnce(&str) -> RegenResult<String>,
		marker_index: usize,
	) -> RegenResult<String> {
		// The transform may call back into this context, so no lock is held.
		let content = self.raw_block(name);
		let modified = transform(&content)?;
		self.set_block(name, modified.clone(), marker_index)?;
		Ok(modified)
	}

	/// Replace the active markers and re-extract blocks from the previous
	/// output.
	pub fn marker(&self, patterns: Vec<MarkerPattern>) -> RegenResult<()> {
		let markers = MarkerSet::new(patterns)?;
		let mut state = lock(&self.state);
		state.blocks = extract_blocks(state.previous.as_deref().unwrap_or(""), &markers);
		state.markers = markers;
		Ok(())
	}

	/// Retarget output to `path` and return the token that starts a new
	/// output section.
	pub fn outfile(&self, path: &str) -> RegenResult<String> {
		let output = self.resolve_path(path);
		let previous = self.run.previous_output(&output)?;

		let mut state = lock(&self.state);
		state.blocks = extract_blocks(previous.as_deref().unwrap_or(""), &state.markers);
		state.previous = previous;
		state.output = output.clone();
		tracing::debug!(output = %output.display(), "retargeted output");

		Ok(format!(
			"{OUTPUT_SENTINEL}{}{OUTPUT_SENTINEL}",
			output.display()
		))
	}

	pub fn cancel(&self) {
		lock(&self.state).status = ContextStatus::Canceled;
	}

	pub fn skip(&self) {
		let mut state = lock(&self.state);
		if state.status == ContextStatus::Active {
			state.status = ContextStatus::Skipped;
		}
	}

	/// Read a file relative to the template's directory.
	pub fn read(&self, path: &str) -> RegenResult<Option<String>> {
		let path = normalize_path(&parent_dir(&self.input).join(path));
		self.run.fileop().read_file(&path)
	}

	/// Resolve `path` against the working directory.
	pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
		normalize_path(&self.cwd.join(path))
	}
}

fn parent_dir(path: &Path) -> PathBuf {
	path.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// The base name of `path` up to its first `.`.
fn display_name(path: &Path) -> String {
	path.file_name()
		.and_then(|name| name.to_str())
		.and_then(|name| name.split('.').next())
		.unwrap_or_default()
		.to_string()
}

/// Lexically remove `.` and `..` components.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
	let mut normalized = PathBuf::new();

	for component in path.components() {
		match component {
			Component::CurDir => {}
			Component::ParentDir => {
				if !normalized.pop() {
					normalized.push("..");
				}
			}
			other => normalized.push(other.as_os_str()),
		}
	}

	normalized
}
