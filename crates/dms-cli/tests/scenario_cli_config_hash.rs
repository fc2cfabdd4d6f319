use std::io::Write;

use predicates::prelude::*;

fn yaml_file(body: &str) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut f = tempfile::NamedTempFile::new()?;
    f.write_all(body.as_bytes())?;
    Ok(f)
}

/// Later layers win, and the printed hash is stable across runs.
#[test]
fn config_hash_merges_layers_and_is_stable() -> anyhow::Result<()> {
    let base = yaml_file("progression:\n  tick_ms: 5000\nstore:\n  backend: postgres\n")?;
    let local = yaml_file("store:\n  backend: memory\n")?;
    let paths = [
        base.path().to_string_lossy().to_string(),
        local.path().to_string_lossy().to_string(),
    ];

    let first = assert_cmd::Command::cargo_bin("dms")?
        .arg("config-hash")
        .args(&paths)
        .assert()
        .success()
        .stdout(predicate::str::contains("config_hash="))
        .stdout(predicate::str::contains(r#""backend":"memory""#))
        .get_output()
        .stdout
        .clone();

    let second = assert_cmd::Command::cargo_bin("dms")?
        .arg("config-hash")
        .args(&paths)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert_eq!(first, second);
    Ok(())
}

#[test]
fn config_hash_refuses_secret_literals() -> anyhow::Result<()> {
    let leaky = yaml_file("database:\n  url_env: postgres://app:hunter2@db:5432/dms\n")?;

    assert_cmd::Command::cargo_bin("dms")?
        .arg("config-hash")
        .arg(leaky.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"));
    Ok(())
}

#[test]
fn cancel_requires_numeric_id() -> anyhow::Result<()> {
    assert_cmd::Command::cargo_bin("dms")?
        .args(["orders", "cancel", "not-a-number"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
    Ok(())
}
