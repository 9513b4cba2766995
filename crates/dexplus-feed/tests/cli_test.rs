/*
[INPUT]:  Built dexplus-feed binary and bundled configuration
[OUTPUT]: CLI dry-run verification
[POS]:    Integration test layer - binary entry point
[UPDATE]: When changing CLI flags or config loading
*/

use std::process::Command;

fn feed_binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_dexplus-feed"))
}

#[test]
fn cli_dry_run_validates_bundled_config() {
    let config_path = format!("{}/config/feed.yaml", env!("CARGO_MANIFEST_DIR"));

    let output = feed_binary()
        .arg("--config")
        .arg(config_path)
        .arg("--dry-run")
        .arg("--log-level")
        .arg("error")
        .output()
        .expect("Failed to start dexplus-feed binary");

    assert!(
        output.status.success(),
        "Process exited with non-zero status: {}\nStdout: {}\nStderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn cli_rejects_missing_config() {
    let output = feed_binary()
        .arg("--config")
        .arg("/nonexistent/feed.yaml")
        .arg("--dry-run")
        .output()
        .expect("Failed to start dexplus-feed binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("load config"), "stderr: {stderr}");
}
