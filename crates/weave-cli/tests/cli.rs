// SPDX-License-Identifier: Apache-2.0
//! End-to-end checks for the `weave` binary: loading snapshot files,
//! running them to idle, and reading values back out.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

fn weave() -> Command {
    let mut cmd = Command::cargo_bin("weave").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn fixture(dir: &tempfile::TempDir, name: &str, json: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, json).unwrap();
    path
}

const ADDER: &str = r##"{"title":"demo","sum":{"#type":"add","0":2,"1":3}}"##;

#[test]
fn run_prints_the_persisted_state() {
    let dir = tempfile::tempdir().unwrap();
    let file = fixture(&dir, "adder.json", ADDER);
    weave()
        .arg("run")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""title": "demo""#))
        .stdout(predicate::str::contains(r##""#type": "add""##));
}

#[test]
fn get_reads_a_settled_value() {
    let dir = tempfile::tempdir().unwrap();
    let file = fixture(&dir, "adder.json", ADDER);
    weave()
        .arg("run")
        .arg(&file)
        .args(["--get", "sum.#output"])
        .assert()
        .success()
        .stdout("sum.#output = 5\n");
}

#[test]
fn set_overrides_an_input_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let file = fixture(&dir, "adder.json", ADDER);
    weave()
        .arg("run")
        .arg(&file)
        .args(["--set", "sum.0=40", "--get", "sum.#output"])
        .assert()
        .success()
        .stdout("sum.#output = 43\n");
}

#[test]
fn call_drives_a_counter_through_one_pass() {
    let dir = tempfile::tempdir().unwrap();
    let file = fixture(&dir, "counter.json", r##"{"c":{"#type":"counter"}}"##);
    weave()
        .arg("run")
        .arg(&file)
        .args(["--call", "c", "--passes", "1", "--get", "c.count"])
        .assert()
        .success()
        .stdout("c.count = 1\n");
}

#[test]
fn show_digest_prints_one_hex_line() {
    let dir = tempfile::tempdir().unwrap();
    let file = fixture(&dir, "adder.json", ADDER);
    weave()
        .arg("show")
        .arg(&file)
        .arg("--digest")
        .assert()
        .success()
        .stdout(predicate::str::is_match("^[0-9a-f]{64}\n$").unwrap());
}

#[test]
fn a_malformed_set_spec_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let file = fixture(&dir, "adder.json", ADDER);
    weave()
        .arg("run")
        .arg(&file)
        .args(["--set", "sum.0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("PATH=JSON"));
}

#[test]
fn defs_lists_an_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    weave()
        .arg("defs")
        .arg(dir.path())
        .assert()
        .success()
        .stdout("");
}
