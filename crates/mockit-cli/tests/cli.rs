//! Black-box coverage of the `mockit` binary's command-line surface:
//! help/version output and the `validate` subcommand against real JsonMC
//! fixtures, run the same way a CI pipeline would invoke it.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn mockit() -> Command {
    Command::cargo_bin("mockit").unwrap()
}

#[test]
fn help_lists_both_subcommands() {
    mockit()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn version_matches_crate_version() {
    mockit()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn validate_accepts_a_well_formed_jsonmc_document() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            // a minimal, valid configuration document
            "servers": [
                {{ "server": {{ "serverId": "cli-fixture", "port": 19500 }}, "expectations": [] }}
            ]
        }}"#
    )
    .unwrap();

    mockit()
        .arg("validate")
        .arg("--config")
        .arg(file.path())
        .assert()
        .success();
}

#[test]
fn validate_rejects_a_document_with_a_blank_server_id() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "servers": [
                {{ "server": {{ "serverId": "", "port": 19501 }}, "expectations": [] }}
            ]
        }}"#
    )
    .unwrap();

    mockit()
        .arg("validate")
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn validate_rejects_a_missing_config_file() {
    mockit()
        .arg("validate")
        .arg("--config")
        .arg("/nonexistent/path/to/config.jsonmc")
        .assert()
        .failure();
}
