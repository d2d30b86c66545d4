use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn nola(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_nola"))
        .args(args)
        .current_dir(cwd)
        .env("RUST_LOG", "off")
        .env("AWS_EC2_METADATA_DISABLED", "true")
        .output()
        .expect("failed to run nola")
}

#[test]
fn build_without_role_exits_before_any_network_call() {
    let project = tempfile::tempdir().expect("tempdir");
    fs::write(project.path().join(".nola"), r#"{"region": "eu-west-1"}"#).expect("write config");
    fs::write(
        project.path().join("package.json"),
        r#"{"name": "x", "version": "1.0.0", "dependencies": {}}"#,
    )
    .expect("write manifest");

    let output = nola(&["build"], project.path());

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("AWS 'role' not set in .nola config file"),
        "stderr was: {stderr}"
    );
    assert!(!project.path().join(".nola-temp").exists());
    assert!(!project.path().join("node_modules").exists());
}

#[test]
fn build_with_explicit_dir_reads_config_there() {
    let cwd = tempfile::tempdir().expect("tempdir");
    fs::create_dir(cwd.path().join("app")).expect("mkdir");

    let output = nola(&["build", "app"], cwd.path());

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read config file"), "stderr was: {stderr}");
    assert!(stderr.contains("app"), "stderr was: {stderr}");
}

#[test]
fn deploy_with_malformed_config_exits_with_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join(".nola"), "role = nope").expect("write config");

    let output = nola(&["deploy"], dir.path());

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("config file is not valid JSON"), "stderr was: {stderr}");
    assert!(!dir.path().join(".nola-deploy").exists());
}

#[test]
fn unknown_subcommand_is_a_usage_error() {
    let dir = tempfile::tempdir().expect("tempdir");

    let output = nola(&["publish"], dir.path());

    assert!(!output.status.success());
}
