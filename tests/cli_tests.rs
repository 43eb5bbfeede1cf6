//! Binary smoke tests for the folio CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("folio")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("performance"))
        .stdout(predicate::str::contains("summary"));
}

#[test]
fn test_import_dry_run_previews_without_writing() {
    let dir = TempDir::new().unwrap();
    let statement = write_file(
        dir.path(),
        "ally.csv",
        "Date,Activity,Qty,Sym,Description,Amount\n\
         01/10/2024,Bought,10,XYZ,XYZ CORP,-1000.00\n\
         02/05/2024,Dividend,0,XYZ,XYZ CORP DIV,20.00\n",
    );
    let store = dir.path().join("trades.csv");

    Command::cargo_bin("folio")
        .unwrap()
        .args([
            "--no-color",
            "import",
            statement.to_str().unwrap(),
            "--broker",
            "ally",
            "--output",
            store.to_str().unwrap(),
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 2 transactions"))
        .stdout(predicate::str::contains("Dry run"));

    assert!(!store.exists());
}

#[test]
fn test_import_writes_store() {
    let dir = TempDir::new().unwrap();
    let statement = write_file(
        dir.path(),
        "ally.csv",
        "Date,Activity,Qty,Sym,Description,Amount\n\
         01/10/2024,Bought,10,XYZ,XYZ CORP,-1000.00\n",
    );
    let store = dir.path().join("trades.csv");

    Command::cargo_bin("folio")
        .unwrap()
        .args([
            "--no-color",
            "import",
            statement.to_str().unwrap(),
            "--broker",
            "ally",
            "--output",
            store.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Store updated"));

    let content = std::fs::read_to_string(&store).unwrap();
    assert!(content.starts_with("date,ticker,type,units,cost,broker"));
    assert!(content.contains("2024-01-10,XYZ,BUY,10,-1000.00,ally"));
}

#[test]
fn test_import_unknown_broker_fails() {
    let dir = TempDir::new().unwrap();
    let statement = write_file(dir.path(), "x.csv", "Date,Activity,Qty,Sym,Amount\n");

    Command::cargo_bin("folio")
        .unwrap()
        .args([
            "--no-color",
            "import",
            statement.to_str().unwrap(),
            "--broker",
            "etrade",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown broker"));
}

#[test]
fn test_missing_config_reports_could_not_load() {
    Command::cargo_bin("folio")
        .unwrap()
        .args([
            "--no-color",
            "performance",
            "--config",
            "/nonexistent/config.toml",
            "--portfolio",
            "main",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not load"));
}
