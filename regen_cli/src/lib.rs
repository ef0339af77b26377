use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;

#[derive(Parser)]
#[command(
	author,
	version,
	about = "Generate files from templates and regenerate them without losing hand-written blocks.",
	long_about = "regen runs definition files: YAML document streams whose first document is \
	              data and whose remaining documents are templates.\n\nGenerated files may \
	              contain protected blocks delimited by marker comments. Text written inside a \
	              protected block survives every later regeneration.\n\nQuick start:\n  regen \
	              generate src/api.ts.regen  Generate src/api.ts\n  regen file src/api.ts        \
	              Regenerate a file from its definition\n  regen blocks src/api.ts      List the \
	              protected blocks in a file"
)]
pub struct RegenCli {
	#[command(subcommand)]
	pub command: Option<Commands>,

	/// Path to the project root directory. Relative paths and the config
	/// file are resolved against it.
	#[arg(long, short, global = true)]
	pub path: Option<PathBuf>,

	/// Enable verbose output.
	#[arg(long, short, global = true, default_value_t = false)]
	pub verbose: bool,

	/// Disable colored output.
	#[arg(long, global = true, default_value_t = false)]
	pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Run one or more definition files.
	///
	/// Each definition is a `*.regen` file. Its output defaults to the
	/// definition path without the `.regen` extension. Definitions with `@`
	/// in their name are generic and run once for every matching file beside
	/// them.
	///
	/// Use `--dry-run` to see which files would change without writing them
	/// and `--diff` to print the changes.
	Generate {
		/// Definition files to run.
		#[arg(required = true)]
		definitions: Vec<PathBuf>,

		/// Preview changes without writing files.
		#[arg(long, default_value_t = false)]
		dry_run: bool,

		/// Print a unified diff for every file that changes.
		#[arg(long, default_value_t = false)]
		diff: bool,
	},
	/// Regenerate a single output file from its definition.
	///
	/// Looks for `<PATH>.regen` first and then for the nearest generic
	/// definition whose name matches the file.
	File {
		/// The generated file.
		#[arg(value_name = "PATH")]
		file: PathBuf,

		/// Preview changes without writing files.
		#[arg(long, default_value_t = false)]
		dry_run: bool,
	},
	/// List the protected blocks in a file.
	///
	/// Uses the marker pairs from `regen.toml`, or the built-in `// {{{ @name`
	/// and `/* {{{ @name` pairs when no config is present.
	Blocks {
		/// The file to inspect.
		#[arg(value_name = "PATH")]
		file: PathBuf,

		/// Output format. Use `text` for human-readable output or `json`
		/// for programmatic consumption.
		#[arg(long, value_enum, default_value_t = OutputFormat::Text)]
		format: OutputFormat,
	},
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
	/// Human-readable text output with colors and formatting.
	Text,
	/// JSON output for programmatic consumption.
	Json,
}
