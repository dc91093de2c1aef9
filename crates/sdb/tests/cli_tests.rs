// SDB - CLR Snapshot Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! CLI smoke tests for the sdb binary.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help() {
    Command::cargo_bin("sdb")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Snapshot debugger agent"));
}

#[test]
fn test_version() {
    Command::cargo_bin("sdb").unwrap().arg("--version").assert().success();
}

#[test]
fn test_missing_pipe_name_fails() {
    Command::cargo_bin("sdb")
        .unwrap()
        .env_remove("SDB_PIPE_NAME")
        .args(["attach", "--pid", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--pipe-name"));
}

#[test]
fn test_attach_without_bindings_is_fatal() {
    Command::cargo_bin("sdb")
        .unwrap()
        .args(["--pipe-name", "/tmp/sdb-test.sock", "attach", "--pid", "12345"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("runtime bindings"));
}

#[test]
fn test_pipe_name_from_environment() {
    // The pipe name resolves from the environment; the command still fails
    // at attach, not at argument parsing.
    Command::cargo_bin("sdb")
        .unwrap()
        .env("SDB_PIPE_NAME", "/tmp/sdb-test.sock")
        .args(["attach", "--pid", "12345"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("runtime bindings").and(
            predicate::str::contains("--pipe-name").not(),
        ))
        ;
}
