use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn diskforge() -> Command {
    Command::cargo_bin("diskforge").expect("binary should be built")
}

#[test]
fn test_help_lists_subcommands() {
    diskforge()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("teardown"))
        .stdout(predicate::str::contains("partuuid"));
}

#[test]
fn test_build_rejects_unsupported_filesystem_before_creating_image() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("disk.raw");

    diskforge()
        .args(["build", "--filesystem", "xfs", "--image"])
        .arg(&image)
        .arg("--rootfs-dir")
        .arg(dir.path().join("rootfs"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported filesystem: xfs"));

    assert!(!image.exists());
}

#[test]
fn test_build_requires_image_without_config() {
    diskforge()
        .args(["build", "--rootfs-dir", "/tmp/unused-root"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--image is required"));
}

#[test]
fn test_build_reports_invalid_config() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("build.json");
    std::fs::write(&config, "{ not json").unwrap();

    diskforge()
        .arg("build")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid config"));
}

#[test]
fn test_teardown_of_unmounted_root_is_noop() {
    let dir = TempDir::new().unwrap();

    diskforge()
        .arg("teardown")
        .arg("--rootfs-dir")
        .arg(dir.path())
        .assert()
        .success();
}
