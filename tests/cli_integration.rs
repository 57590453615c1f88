//! Integration tests for CLI commands.
//!
//! These tests run the binary against a throwaway config and runtime
//! directory, without a daemon unless a test starts one.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use std::process::{Child, Command as StdCommand, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

/// Get a Command for the hwconfd binary, isolated in `home`
fn hwconfd(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("hwconfd").unwrap();
    cmd.env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_RUNTIME_DIR", home.join("run"))
        .env_remove("RUST_LOG")
        .args(["--socket", home.join("hwconfd.sock").to_str().unwrap()]);
    cmd
}

#[test]
fn test_help_command() {
    let home = tempdir().unwrap();
    hwconfd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Hardware configuration daemon"))
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("call"))
        .stdout(predicate::str::contains("introspect"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_command() {
    let home = tempdir().unwrap();
    hwconfd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hwconfd"));
}

#[test]
fn test_config_show() {
    let home = tempdir().unwrap();
    // Should work even without an existing config (uses defaults)
    hwconfd(home.path())
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[ipc]"))
        .stdout(predicate::str::contains("socket_path"))
        .stdout(predicate::str::contains("[logging]"));
    assert!(home.path().join("config/hwconfd/config.toml").exists());
}

#[test]
fn test_invalid_config_rejected() {
    let home = tempdir().unwrap();
    let path = home.path().join("bad.toml");
    std::fs::write(&path, "[ipc]\npoll_interval_ms = 0\n").unwrap();
    hwconfd(home.path())
        .args(["--config-file", path.to_str().unwrap(), "config", "--show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("poll_interval_ms"));
}

#[test]
fn test_call_no_daemon() {
    let home = tempdir().unwrap();
    hwconfd(home.path())
        .args(["call", "/io/hwconfd", "io.hwconfd.Configuration", "reload"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not running"));
}

#[test]
fn test_call_bad_literal() {
    let home = tempdir().unwrap();
    hwconfd(home.path())
        .args([
            "call",
            "/io/hwconfd/device/1/dpi",
            "io.hwconfd.DPI",
            "setDPI",
            "y:0",
            "q:not-a-number",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid q literal"));
}

#[test]
fn test_start_help() {
    let home = tempdir().unwrap();
    hwconfd(home.path())
        .args(["start", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--simulate"));
}

struct RunningDaemon {
    child: Child,
    _home: TempDir,
}

impl Drop for RunningDaemon {
    fn drop(&mut self) {
        self.child.kill().ok();
        self.child.wait().ok();
    }
}

fn start_simulated(home: TempDir) -> RunningDaemon {
    let socket = home.path().join("hwconfd.sock");
    let child = StdCommand::new(assert_cmd::cargo::cargo_bin("hwconfd"))
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_RUNTIME_DIR", home.path().join("run"))
        .args(["--socket", socket.to_str().unwrap(), "start", "--simulate"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while !socket.exists() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    // Registration happens right after the bind.
    thread::sleep(Duration::from_millis(200));
    RunningDaemon { child, _home: home }
}

#[test]
fn test_simulated_daemon_round_trip() {
    let home = tempdir().unwrap();
    let path = home.path().to_path_buf();
    let _daemon = start_simulated(home);

    hwconfd(&path)
        .args(["introspect"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/io/hwconfd/device/1/dpi"))
        .stdout(predicate::str::contains("io.hwconfd.SmartShift"));

    hwconfd(&path)
        .args([
            "call",
            "/io/hwconfd/device/1/dpi",
            "io.hwconfd.DPI",
            "setDPI",
            "y:0",
            "q:1234",
        ])
        .assert()
        .success();

    hwconfd(&path)
        .args([
            "call",
            "/io/hwconfd/device/1/dpi",
            "io.hwconfd.DPI",
            "getDPI",
            "y:0",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("q: 1250"));

    hwconfd(&path)
        .args(["get", "/io/hwconfd/device/1", "io.hwconfd.Device", "name"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Simulated Wireless Mouse"));

    hwconfd(&path)
        .args([
            "set",
            "/io/hwconfd/device/1",
            "io.hwconfd.Device",
            "name",
            "s:renamed",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("AccessDenied"));

    hwconfd(&path)
        .args(["config", "--reload"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration reloaded"));
}
