//! Command line validation tests for the two executables. Anything invalid
//! must be rejected before a socket is opened or a connection attempted.

use assert_cmd::prelude::*;
use predicates::str::contains;
use std::process::Command;

#[test]
fn server_rejects_a_garbage_port() {
    Command::cargo_bin("aviary-server")
        .unwrap()
        .args(&["--port", "notaport"])
        .assert()
        .failure()
        .stderr(contains("invalid port"));
}

#[test]
fn server_rejects_port_zero() {
    Command::cargo_bin("aviary-server")
        .unwrap()
        .args(&["--port", "0"])
        .assert()
        .failure()
        .stderr(contains("port must be between"));
}

#[test]
fn server_rejects_zero_workers() {
    Command::cargo_bin("aviary-server")
        .unwrap()
        .args(&["--workers", "0"])
        .assert()
        .failure()
        .stderr(contains("worker count"));
}

#[test]
fn client_rejects_a_missing_subcommand() {
    Command::cargo_bin("aviary-client")
        .unwrap()
        .assert()
        .failure()
        .stderr(contains("unknown command"));
}

#[test]
fn client_rejects_a_garbage_date() {
    Command::cargo_bin("aviary-client")
        .unwrap()
        .args(&["add-sighting", "robin", "park", "yesterday"])
        .assert()
        .failure()
        .stderr(contains("could not parse yesterday as a date"));
}

#[test]
fn client_rejects_a_garbage_address() {
    Command::cargo_bin("aviary-client")
        .unwrap()
        .args(&["list", "--addr", "not-an-address"])
        .assert()
        .failure()
        .stderr(contains("could not parse not-an-address"));
}

#[test]
fn client_rejects_a_garbage_weight() {
    Command::cargo_bin("aviary-client")
        .unwrap()
        .args(&["add", "robin", "red", "heavy", "2.0"])
        .assert()
        .failure()
        .stderr(contains("could not parse heavy as a number"));
}
