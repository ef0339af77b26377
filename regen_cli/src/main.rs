use std::path::Path;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use owo_colors::OwoColorize;
use regen_cli::Commands;
use regen_cli::OutputFormat;
use regen_cli::RegenCli;
use regen_core::DryRunFileOperation;
use regen_core::FileChange;
use regen_core::FileOperation;
use regen_core::FsFileOperation;
use regen_core::GenerateOptions;
use regen_core::GenerateReport;
use regen_core::Generator;
use regen_core::MarkerSet;
use regen_core::RegenConfig;
use regen_core::RegenError;
use regen_core::extract_blocks;
use regen_core::find_template_for;
use regen_core::is_generic;
use similar::ChangeTag;
use similar::TextDiff;
use tracing_subscriber::EnvFilter;

static USE_COLOR: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

fn color_enabled() -> bool {
	USE_COLOR.load(std::sync::atomic::Ordering::Relaxed)
}

/// Apply ANSI color codes only when color is enabled.
macro_rules! colored {
	($text:expr,red) => {
		if color_enabled() {
			format!("{}", $text.red())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,green) => {
		if color_enabled() {
			format!("{}", $text.green())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,yellow) => {
		if color_enabled() {
			format!("{}", $text.yellow())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,bold) => {
		if color_enabled() {
			format!("{}", $text.bold())
		} else {
			format!("{}", $text)
		}
	};
}

fn main() {
	let args = RegenCli::parse();

	// Respect NO_COLOR, --no-color and terminals without color support.
	let use_color = !args.no_color
		&& std::env::var_os("NO_COLOR").is_none()
		&& supports_color::on(supports_color::Stream::Stderr).is_some();
	if !use_color {
		USE_COLOR.store(false, std::sync::atomic::Ordering::Relaxed);
	}

	init_tracing(args.verbose, use_color);

	miette::set_hook(Box::new(move |_| {
		Box::new(
			miette::MietteHandlerOpts::new()
				.color(use_color)
				.unicode(use_color)
				.build(),
		)
	}))
	.ok();

	let result = match &args.command {
		Some(Commands::Generate {
			definitions,
			dry_run,
			diff,
		}) => run_generate(&args, definitions, *dry_run, *diff),
		Some(Commands::File { file, dry_run }) => run_file(&args, file, *dry_run),
		Some(Commands::Blocks { file, format }) => run_blocks(&args, file, *format),
		None => {
			eprintln!("No subcommand specified. Run `regen --help` for usage.");
			process::exit(1);
		}
	};

	if let Err(e) = result {
		match e.downcast::<RegenError>() {
			Ok(regen_err) => {
				let report: miette::Report = (*regen_err).into();
				eprintln!("{report:?}");
			}
			Err(e) => {
				eprintln!("{} {e}", colored!("error:", red));
			}
		}
		process::exit(2);
	}
}

/// Log to stderr. `REGEN_LOG` takes precedence over `--verbose`.
fn init_tracing(verbose: bool, use_color: bool) {
	let default_level = if verbose { "debug" } else { "warn" };
	let filter =
		EnvFilter::try_from_env("REGEN_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(use_color)
		.with_target(false)
		.try_init()
		.ok();
}

fn resolve_root(args: &RegenCli) -> PathBuf {
	args.path
		.clone()
		.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn load_config(root: &Path) -> Result<RegenConfig, RegenError> {
	Ok(RegenConfig::load(root)?.unwrap_or_default())
}

fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
}

/// Everything one command changed, or would change.
#[derive(Debug, Default)]
struct Summary {
	changes: Vec<FileChange>,
	canceled: usize,
	skipped: usize,
}

impl Summary {
	fn record(&mut self, reports: &[GenerateReport]) {
		for report in reports {
			self.canceled += report.canceled;
			self.skipped += report.skipped;
		}
	}
}

/// Persist previewed changes. Only called once every definition of the
/// command has generated without error.
fn apply(changes: &[FileChange]) -> Result<(), RegenError> {
	let fileop = FsFileOperation::new();
	for change in changes {
		fileop.write_file(&change.path, &change.after)?;
	}
	fileop.commit()?;

	Ok(())
}

fn run_generate(
	args: &RegenCli,
	definitions: &[PathBuf],
	dry_run: bool,
	show_diff: bool,
) -> Result<(), Box<dyn std::error::Error>> {
	let root = resolve_root(args);
	let config = load_config(&root)?;
	// Later definitions read what earlier ones would have written.
	let preview = Arc::new(DryRunFileOperation::new());
	let generator = Generator::from_config(preview.clone(), &config)?;
	let runtime = build_runtime()?;
	let mut summary = Summary::default();

	for definition in definitions {
		let definition = root.join(definition);
		let reports = runtime.block_on(generator.generate_all(&definition))?;

		if args.verbose {
			for report in &reports {
				for output in &report.outputs {
					println!(
						"  {} -> {}",
						make_relative(&report.definition, &root),
						make_relative(output, &root)
					);
				}
			}
		}

		summary.record(&reports);
	}

	summary.changes = preview.changes();
	if !dry_run {
		apply(&summary.changes)?;
	}

	print_summary(&summary, &root, dry_run, show_diff);
	Ok(())
}

fn run_file(
	args: &RegenCli,
	path: &Path,
	dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
	let root = resolve_root(args);
	let file = root.join(path);
	let Some(definition) = find_template_for(&file)? else {
		return Err(RegenError::Discovery {
			path: make_relative(&file, &root),
			reason: "no definition generates this file".to_string(),
		}
		.into());
	};

	if args.verbose {
		println!("Using definition {}", make_relative(&definition, &root));
	}

	let config = load_config(&root)?;
	let preview = Arc::new(DryRunFileOperation::new());
	let generator = Generator::from_config(preview.clone(), &config)?;
	let runtime = build_runtime()?;
	let options = GenerateOptions {
		output: is_generic(&definition).then(|| file.clone()),
		..GenerateOptions::default()
	};

	let report = runtime.block_on(generator.generate(&definition, options))?;
	let mut summary = Summary::default();
	summary.record(&[report]);
	summary.changes = preview.changes();

	if !dry_run {
		apply(&summary.changes)?;
	}

	print_summary(&summary, &root, dry_run, false);
	Ok(())
}

fn print_summary(summary: &Summary, root: &Path, dry_run: bool, show_diff: bool) {
	if summary.canceled > 0 {
		eprintln!(
			"{} {} template pass(es) canceled",
			colored!("note:", yellow),
			summary.canceled
		);
	}

	if summary.skipped > 0 {
		eprintln!(
			"{} {} template pass(es) skipped",
			colored!("note:", yellow),
			summary.skipped
		);
	}

	if summary.changes.is_empty() {
		println!("All generated files are already up to date.");
		return;
	}

	if dry_run {
		println!("Dry run: would write {} file(s):", summary.changes.len());
	} else {
		println!("Generated {} file(s):", summary.changes.len());
	}

	for change in &summary.changes {
		let rel = make_relative(&change.path, root);
		let status = if change.before.is_none() {
			colored!("created", green)
		} else {
			colored!("updated", yellow)
		};
		println!("  {status} {rel}");

		if show_diff {
			print_diff(change.before.as_deref().unwrap_or_default(), &change.after);
		}
	}
}

fn run_blocks(
	args: &RegenCli,
	path: &Path,
	format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
	let root = resolve_root(args);
	let file = root.join(path);
	let content = std::fs::read_to_string(&file)?;
	let markers: MarkerSet = load_config(&root)?.marker_set()?;
	let blocks = extract_blocks(&content, &markers);
	let rel = make_relative(&file, &root);

	match format {
		OutputFormat::Json => {
			let entries: Vec<serde_json::Value> = blocks
				.names()
				.into_iter()
				.filter_map(|name| blocks.get(name))
				.map(|block| {
					serde_json::json!({
						"name": block.name,
						"marker": block.marker_index,
						"content": block.content,
					})
				})
				.collect();
			let output = serde_json::json!({
				"file": rel,
				"blocks": entries,
			});
			println!("{output}");
		}
		OutputFormat::Text => {
			if blocks.is_empty() {
				println!("No protected blocks found in {rel}.");
				return Ok(());
			}

			println!("{}", colored!(format!("Blocks in {rel}:"), bold));
			for name in blocks.names() {
				let Some(block) = blocks.get(name) else {
					continue;
				};
				let lines = if block.content.is_empty() {
					0
				} else {
					block.content.lines().count()
				};
				println!("  {name} ({lines} line(s), marker {})", block.marker_index);
			}
		}
	}

	Ok(())
}

/// Print a unified diff between two strings, colorized.
fn print_diff(current: &str, expected: &str) {
	let diff = TextDiff::from_lines(current, expected);
	for change in diff.iter_all_changes() {
		match change.tag() {
			ChangeTag::Delete => {
				eprint!("  {}", colored!(format!("-{change}"), red));
			}
			ChangeTag::Insert => {
				eprint!("  {}", colored!(format!("+{change}"), green));
			}
			ChangeTag::Equal => {
				eprint!("   {change}");
			}
		}
	}
}

/// Make a path relative to root for display purposes.
fn make_relative(path: &Path, root: &Path) -> String {
	path.strip_prefix(root)
		.unwrap_or(path)
		.display()
		.to_string()
}
