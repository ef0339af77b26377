use assert_cmd::Command;
use regen_core::AnyEmptyResult;
use rstest::rstest;

const SOURCE: &str = "header\n// {{{ imports\nuse std::fs;\nuse std::io;\n// }}}\n/* {{{ body\nfn main() {}\n   }}} */\n";

fn regen() -> Result<Command, Box<dyn std::error::Error>> {
	let mut cmd = Command::cargo_bin("regen")?;
	cmd.env("NO_COLOR", "1").env_remove("REGEN_LOG");
	Ok(cmd)
}

#[test]
fn blocks_lists_names_in_text() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(tmp.path().join("main.rs"), SOURCE)?;

	regen()?
		.arg("blocks")
		.arg("main.rs")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout(predicates::str::contains("Blocks in main.rs:"))
		.stdout(predicates::str::contains("body (1 line(s), marker 1)"))
		.stdout(predicates::str::contains("imports (2 line(s), marker 0)"));

	Ok(())
}

#[test]
fn blocks_outputs_json() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(tmp.path().join("main.rs"), SOURCE)?;

	let output = regen()?
		.arg("blocks")
		.arg("main.rs")
		.arg("--format")
		.arg("json")
		.arg("--path")
		.arg(tmp.path())
		.output()?;

	assert!(output.status.success());
	let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
	assert_eq!(value["file"], "main.rs");
	assert_eq!(value["blocks"][0]["name"], "body");
	assert_eq!(value["blocks"][1]["name"], "imports");
	assert_eq!(value["blocks"][1]["content"], "use std::fs;\nuse std::io;");

	Ok(())
}

#[rstest]
#[case::empty("")]
#[case::unclosed("// {{{ dangling\nnever closed\n")]
fn blocks_reports_when_none_found(#[case] source: &str) -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(tmp.path().join("main.rs"), source)?;

	regen()?
		.arg("blocks")
		.arg("main.rs")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout(predicates::str::contains("No protected blocks found in main.rs."));

	Ok(())
}

#[test]
fn blocks_missing_file_fails() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;

	regen()?
		.arg("blocks")
		.arg("missing.rs")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.code(2);

	Ok(())
}

#[test]
fn blocks_runs_from_the_working_directory() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(tmp.path().join("main.rs"), SOURCE)?;

	regen()?
		.current_dir(tmp.path())
		.arg("blocks")
		.arg("main.rs")
		.assert()
		.success()
		.stdout(predicates::str::contains("imports (2 line(s), marker 0)"));

	Ok(())
}
