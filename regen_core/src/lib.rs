//! `regen_core` is the core library for [regen](https://github.com/ifiokjr/regen), a template-driven file generator with idempotent regeneration. Generated files may contain protected blocks. Whatever a person writes inside a protected block survives every later regeneration while the text around it is refreshed.
//!
//! ## Generation Pipeline
//!
//! ```text
//! Definition file (`*.regen`, a YAML document stream)
//!   → Load (document 1 is data, documents 2..N are templates)
//!   → Resolve (`!fetch` / `!read` references, siblings concurrently)
//!   → Execute (one minijinja pass per template, `ctx` bound to a GenerationContext)
//!   → Split (sections started by `ctx.outfile(path)`)
//!   → Commit (queued writes handed to a FileOperation)
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from `regen.toml`: default marker pairs and fetch headers.
//! - [`discovery`]: Locating the definition for an output file and the outputs of a definition, including `@` wildcard definitions.
//!
//! ## Key Types
//!
//! - [`MarkerSet`]: Compiled begin/end marker pairs that delimit protected blocks.
//! - [`Block`] / [`BlockTable`]: Protected regions extracted from previous output by [`extract_blocks`].
//! - [`GenerationContext`]: The per-pass state templates reach through `ctx`.
//! - [`DataNode`]: A loaded data document whose deferred references [`resolve`] replaces with data.
//! - [`Generator`]: Runs definition files end to end.
//! - [`FileOperation`]: The storage collaborator. [`FsFileOperation`], [`MemoryFileOperation`] and [`DryRunFileOperation`] are provided.
//!
//! ## Protected Blocks
//!
//! ```text
//! // {{{ imports
//! use crate::hand_written;
//! // }}}
//! ```
//!
//! A template emits the block with `{{ ctx.block("imports", "// add imports here") }}`. The default content is only used until the block exists.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use regen_core::FsFileOperation;
//! use regen_core::Generator;
//!
//! # async fn run() -> regen_core::RegenResult<()> {
//! let generator = Generator::new(Arc::new(FsFileOperation::new()));
//! let report = generator
//! 	.generate(Path::new("src/api.ts.regen"), Default::default())
//! 	.await?;
//!
//! for path in &report.changed {
//! 	println!("wrote {}", path.display());
//! }
//! # Ok(())
//! # }
//! ```

pub use block::*;
pub use config::*;
pub use context::*;
pub use data::*;
pub use discovery::*;
pub use engine::*;
pub use error::*;
pub use fileop::*;
pub use generator::*;
pub use marker::*;

mod block;
pub mod config;
mod context;
mod data;
pub mod discovery;
mod engine;
#[allow(unused_assignments)]
mod error;
mod fileop;
mod generator;
mod marker;
