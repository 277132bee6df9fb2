//! CLI contract tests.

use assert_cmd::Command;

fn quietkey() -> Command {
    match Command::cargo_bin("quietkey") {
        Ok(cmd) => cmd,
        Err(err) => panic!("binary should build: {err}"),
    }
}

fn output_of(cmd: &mut Command) -> String {
    let out = cmd.output().expect("run");
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

#[test]
fn init_writes_a_config_that_check_accepts() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("conf").join("config.toml");

    let stdout = output_of(quietkey().arg("--config").arg(&path).arg("init"));
    assert!(stdout.contains("wrote"));
    assert!(path.exists());

    let stdout = output_of(quietkey().arg("--config").arg(&path).arg("check"));
    assert!(stdout.contains("config ok"));
    assert!(stdout.contains("seal after 3 failures for 300s"));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "").expect("write");

    quietkey()
        .arg("--config")
        .arg(&path)
        .arg("init")
        .assert()
        .failure();
    quietkey()
        .arg("--config")
        .arg(&path)
        .args(["init", "--force"])
        .assert()
        .success();
}

#[test]
fn check_rejects_an_invalid_config() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[lockdown]\nfailure_threshold = 0\n").expect("write");
    quietkey()
        .arg("--config")
        .arg(&path)
        .arg("check")
        .assert()
        .failure();
}

#[test]
fn issue_prints_an_alias_and_shards() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.toml");
    let stdout = output_of(
        quietkey()
            .arg("--config")
            .arg(&path)
            .args(["issue", "--identity", "alice"]),
    );
    assert!(stdout.contains("identity:   alice"));
    assert!(stdout.contains("alias:      qk-"));
    assert!(stdout.contains("shard"));
    assert!(!stdout.contains("key:"));
}

#[test]
fn demo_walks_expiry_and_seal() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.toml");
    let stdout = output_of(quietkey().arg("--config").arg(&path).arg("demo"));
    assert!(stdout.contains("t+30s: Allow"));
    assert!(stdout.contains("t+61s: Deny(Expired)"));
    assert!(stdout.contains("sealed: Deny(Sealed)"));
    assert!(stdout.contains("after seal window: Allow"));
}

#[test]
fn unknown_subcommand_fails() {
    quietkey().arg("explode").assert().failure();
}
