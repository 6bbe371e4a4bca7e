// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use assert_cmd::Command;
use predicates::str::contains;

fn toponet(db: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("toponet").unwrap();
    cmd.arg("--database").arg(db).env("RUST_LOG", "off");
    cmd
}

#[test]
fn network_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("net.sqlite");

    toponet(&db)
        .args(["network", "create", "roads", "--srid", "32632"])
        .assert()
        .success()
        .stdout(contains("\"srid\": 32632"));
    toponet(&db)
        .args(["network", "validate", "roads"])
        .assert()
        .failure();
    toponet(&db)
        .args(["network", "clone", "roads", "streets"])
        .assert()
        .success();
    toponet(&db)
        .args(["network", "info", "streets"])
        .assert()
        .success()
        .stdout(contains("\"name\": \"streets\""));
    toponet(&db).args(["network", "drop", "roads"]).assert().success();
    toponet(&db)
        .args(["network", "info", "roads"])
        .assert()
        .failure()
        .stderr(contains("invalid network name"));
}

#[test]
fn routing_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("graph.sqlite");
    seed_edges(&db);

    toponet(&db)
        .args([
            "routing", "build", "--data-table", "g_data", "--virtual-table", "g", "--input", "edges",
            "--from", "a", "--to", "b", "--cost", "cost",
        ])
        .assert()
        .success()
        .stdout(contains("\"nodes\": 3"));
    toponet(&db)
        .args(["routing", "path", "g", "1", "3"])
        .assert()
        .success()
        .stdout(contains("\"cost\": 8.0"));
}

fn seed_edges(db: &std::path::Path) {
    let session = toponet_core::Session::open(db).unwrap();
    session
        .conn()
        .execute_batch(
            "CREATE TABLE edges (a INTEGER, b INTEGER, cost DOUBLE);
             INSERT INTO edges VALUES (1, 2, 5.0);
             INSERT INTO edges VALUES (2, 3, 3.0);",
        )
        .unwrap();
}
