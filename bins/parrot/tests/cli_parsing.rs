//! CLI argument parsing tests for ysf-parrot.

use assert_cmd::Command;
use predicates::prelude::*;

fn parrot_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_ysf-parrot"))
}

#[test]
fn test_version_flag() {
    parrot_cmd()
        .arg("-v")
        .assert()
        .success()
        .stdout(predicate::str::contains("ysf-parrot"));
}

#[test]
fn test_port_is_required() {
    parrot_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_invalid_port_fails() {
    parrot_cmd()
        .arg("notaport")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}
