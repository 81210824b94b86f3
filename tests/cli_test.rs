//! CLI smoke tests for the demo binary
//!
//! Validates that `--help` describes both transport subcommands and
//! that a bad configuration argument fails fast rather than hanging.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_describes_both_transport_subcommands() {
    let mut cmd = Command::cargo_bin("mcprt").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("Model Context Protocol"));
}

#[test]
fn serve_help_lists_http_and_ws_transports() {
    let mut cmd = Command::cargo_bin("mcprt").unwrap();
    cmd.arg("serve").arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("http"))
        .stdout(predicate::str::contains("ws"));
}

#[test]
fn missing_subcommand_fails_with_usage() {
    let mut cmd = Command::cargo_bin("mcprt").unwrap();
    cmd.assert().failure();
}
