use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn steel_consult() -> Command {
    let mut cmd = Command::cargo_bin("steel-consult").unwrap();
    cmd.env_remove("STEEL_CONSULT_PROMPT_TEMPLATE")
        .env_remove("RUST_LOG");
    cmd
}

fn scenario_args(cmd: &mut Command) -> &mut Command {
    cmd.arg("prompt")
        .args(["--plot-size", "1500"])
        .args(["--construction-type", "Steel Frame"])
        .args(["--stories", "2"])
        .args(["--house-type", "Residential"])
        .args(["--foundation-type", "Slab-on-Grade"])
        .args(["--roof-type", "Gable"])
}

#[test]
fn test_cli_help() {
    steel_consult()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: steel-consult"))
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("prompt"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn test_cli_start_help() {
    steel_consult()
        .arg("start")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: steel-consult start"))
        .stdout(predicate::str::contains("--port <PORT>"))
        .stdout(predicate::str::contains("--model <MODEL>"));
}

#[test]
fn test_cli_prompt_renders_parameters_and_question() {
    scenario_args(&mut steel_consult())
        .arg("How much steel do I need?")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"plotSize\": 1500"))
        .stdout(predicate::str::contains("\"foundationType\": \"Slab-on-Grade\""))
        .stdout(predicate::str::contains("\"specialRequirements\": \"None\""))
        .stdout(predicate::str::contains("How much steel do I need?"))
        .stdout(predicate::str::contains("Infinite Traders Pvt Ltd"));
}

#[test]
fn test_cli_prompt_rejects_incomplete_form() {
    steel_consult()
        .arg("prompt")
        .args(["--plot-size", "1500"])
        .arg("How much steel?")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid project parameters"));
}

#[test]
fn test_cli_prompt_rejects_unknown_option() {
    steel_consult()
        .arg("prompt")
        .args(["--plot-size", "1500"])
        .args(["--construction-type", "Bamboo"])
        .args(["--stories", "2"])
        .args(["--house-type", "Residential"])
        .args(["--foundation-type", "Slab-on-Grade"])
        .args(["--roof-type", "Gable"])
        .arg("Question")
        .assert()
        .failure();
}

#[test]
fn test_cli_prompt_template_override() {
    let mut template = tempfile::NamedTempFile::new().unwrap();
    write!(template, "Q: {{{{ message }}}} / {{{{ supplier }}}}").unwrap();

    scenario_args(&mut steel_consult())
        .arg("--prompt-template")
        .arg(template.path())
        .arg("Which beams?")
        .assert()
        .success()
        .stdout(predicate::str::contains("Q: Which beams? / Infinite Traders Pvt Ltd"));
}
