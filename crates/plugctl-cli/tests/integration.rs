#![allow(deprecated)]
use assert_cmd::Command;
use flate2::write::GzEncoder;
use flate2::Compression;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn plugctl(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("plugctl").unwrap();
    cmd.current_dir(dir.path())
        .env("PLUGCTL_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn init_project(dir: &TempDir) {
    plugctl(dir).arg("init").assert().success();
}

fn hello_json(name: &str) -> String {
    format!(
        r#"{{
            "componentName": "{name}",
            "componentVersion": "1.0",
            "middlewareVersion": "1.0",
            "sourceLanguage": "c++",
            "batchLibrary": "${{PLUGIN_HOME}}/plugins/{name}/lib/lib{name}.so",
            "environmentVariables": [],
            "algorithm": {{
                "name": "{name}Algo",
                "description": "detects things",
                "actionType": "DETECTION",
                "requiresCollection": {{ "states": [] }},
                "providesCollection": {{ "states": ["DETECTION"], "properties": [] }}
            }}
        }}"#
    )
}

/// An extras descriptor whose action runs `algorithm`.
fn extras_json(name: &str, algorithm: &str) -> String {
    format!(
        r#"{{
            "componentName": "{name}",
            "actions": [
                {{ "name": "{name} ACTION", "description": "custom", "algorithm": "{algorithm}", "properties": [] }}
            ],
            "tasks": [
                {{ "name": "{name} TASK", "description": "custom", "actions": ["{name} ACTION"] }}
            ],
            "pipelines": [
                {{ "name": "{name} PIPELINE", "description": "custom", "tasks": ["{name} TASK"] }}
            ]
        }}"#
    )
}

fn write_file(dir: &TempDir, rel: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, contents).unwrap();
    path
}

fn write_package(path: &Path, tld: &str, descriptor: &str) {
    let file = std::fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(descriptor.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(
            &mut header,
            format!("{tld}/descriptor/descriptor.json"),
            descriptor.as_bytes(),
        )
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap();
}

fn list_json(dir: &TempDir) -> serde_json::Value {
    let out = plugctl(dir).args(["list", "--json"]).output().unwrap();
    assert!(out.status.success());
    serde_json::from_slice(&out.stdout).unwrap()
}

// ---------------------------------------------------------------------------
// plugctl init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_and_directories() {
    let dir = TempDir::new().unwrap();
    plugctl(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: plugctl.yaml"));

    assert!(dir.path().join("plugctl.yaml").is_file());
    assert!(dir.path().join("uploads").is_dir());
    assert!(dir.path().join("plugins").is_dir());
    assert!(dir.path().join(".plugctl").is_dir());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    std::fs::write(dir.path().join("plugctl.yaml"), "profile: container\n").unwrap();

    plugctl(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  plugctl.yaml"));
    let config = std::fs::read_to_string(dir.path().join("plugctl.yaml")).unwrap();
    assert_eq!(config, "profile: container\n");
}

// ---------------------------------------------------------------------------
// plugctl list
// ---------------------------------------------------------------------------

#[test]
fn commands_require_init() {
    let dir = TempDir::new().unwrap();
    plugctl(&dir)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("plugctl init"));
}

#[test]
fn list_empty_project() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    plugctl(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No components."));
    assert_eq!(list_json(&dir), serde_json::json!([]));
}

// ---------------------------------------------------------------------------
// plugctl validate
// ---------------------------------------------------------------------------

#[test]
fn validate_accepts_good_descriptor() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let path = write_file(&dir, "hello.json", &hello_json("Hello"));

    plugctl(&dir)
        .arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello: ok"));
}

#[test]
fn validate_reports_every_violation() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let json = hello_json("Hello")
        .replace(r#""sourceLanguage": "c++","#, r#""sourceLanguage": "cobol","#)
        .replace(r#""batchLibrary": "#, r#""unusedLibrary": "#);
    let path = write_file(&dir, "bad.json", &json);

    plugctl(&dir)
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("sourceLanguage must be java, c++, or python"))
        .stdout(predicate::str::contains(
            "must contain batchLibrary, streamLibrary, or both",
        ))
        .stderr(predicate::str::contains("is not valid"));
}

#[test]
fn validate_rejects_unknown_algorithm_reference() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let path = write_file(&dir, "extras.json", &extras_json("EXTRA", "NOSUCHALGO"));

    plugctl(&dir).arg("validate").arg(&path).assert().failure();
    assert_eq!(list_json(&dir), serde_json::json!([]));
}

// ---------------------------------------------------------------------------
// plugctl register-unmanaged / remove
// ---------------------------------------------------------------------------

#[test]
fn unmanaged_register_list_and_remove() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let path = write_file(&dir, "hello.json", &hello_json("Hello"));

    plugctl(&dir)
        .arg("register-unmanaged")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("registered: Hello (REGISTERED)"));
    assert!(dir.path().join("plugins/Hello/descriptor/descriptor.json").is_file());

    plugctl(&dir)
        .arg("register-unmanaged")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("unchanged: Hello"));

    plugctl(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello"))
        .stdout(predicate::str::contains("unmanaged"));

    plugctl(&dir)
        .args(["remove", "Hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed: Hello"));
    assert!(!dir.path().join("plugins/Hello").exists());
    assert_eq!(list_json(&dir), serde_json::json!([]));
}

#[test]
fn extras_register_after_their_provider() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let hello = write_file(&dir, "hello.json", &hello_json("Hello"));
    let extras = write_file(&dir, "extras.json", &extras_json("EXTRA", "HELLOALGO"));

    plugctl(&dir).arg("register-unmanaged").arg(&extras).assert().failure();
    plugctl(&dir).arg("register-unmanaged").arg(&hello).assert().success();
    plugctl(&dir).arg("register-unmanaged").arg(&extras).assert().success();

    let records = list_json(&dir);
    let names: Vec<&str> = records
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["component_name"].as_str())
        .collect();
    assert!(names.contains(&"Hello"));
    assert!(names.contains(&"EXTRA"));
}

#[test]
fn remove_unknown_component_fails() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    plugctl(&dir)
        .args(["remove", "Ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Ghost"));
}

// ---------------------------------------------------------------------------
// plugctl upload / remove-package
// ---------------------------------------------------------------------------

#[test]
fn upload_then_remove_package() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let staging = dir.path().join("staging");
    std::fs::create_dir_all(&staging).unwrap();
    let archive = staging.join("Hello.tar.gz");
    write_package(&archive, "Hello", &hello_json("Hello"));

    plugctl(&dir)
        .arg("upload")
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("uploaded: Hello.tar.gz (UPLOADED)"));
    assert!(dir.path().join("uploads/Hello.tar.gz").is_file());

    plugctl(&dir).arg("upload").arg(&archive).assert().failure();

    plugctl(&dir)
        .args(["remove-package", "Hello.tar.gz"])
        .assert()
        .success();
    assert!(!dir.path().join("uploads/Hello.tar.gz").exists());
    assert_eq!(list_json(&dir), serde_json::json!([]));
}

#[test]
fn upload_rejects_corrupt_archive() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let archive = write_file(&dir, "staging/Broken.tar.gz", "not a gzip stream");

    plugctl(&dir).arg("upload").arg(&archive).assert().failure();
    assert!(!dir.path().join("uploads/Broken.tar.gz").exists());

    let records = list_json(&dir);
    assert_eq!(records[0]["state"], "UPLOAD_ERROR");
}

// ---------------------------------------------------------------------------
// plugctl order
// ---------------------------------------------------------------------------

#[test]
fn order_puts_providers_first() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let hello = write_file(&dir, "hello.json", &hello_json("Hello"));
    let extras = write_file(&dir, "extras.json", &extras_json("EXTRA", "HELLOALGO"));

    let out = plugctl(&dir)
        .arg("order")
        .arg(&extras)
        .arg(&hello)
        .output()
        .unwrap();
    assert!(out.status.success());
    let lines: Vec<String> = String::from_utf8(out.stdout)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(
        lines,
        vec![hello.display().to_string(), extras.display().to_string()]
    );
}

#[test]
fn order_for_single_component() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let hello = write_file(&dir, "hello.json", &hello_json("Hello"));
    let other = write_file(&dir, "other.json", &hello_json("Other"));
    let extras = write_file(&dir, "extras.json", &extras_json("EXTRA", "HELLOALGO"));

    let out = plugctl(&dir)
        .args(["order", "--json", "--for"])
        .arg(&hello)
        .arg(&other)
        .arg(&extras)
        .output()
        .unwrap();
    assert!(out.status.success());
    let ordered: Vec<PathBuf> = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(ordered, vec![hello, extras]);
}

// ---------------------------------------------------------------------------
// plugctl startup
// ---------------------------------------------------------------------------

#[test]
fn startup_registers_extracted_descriptors() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    write_file(
        &dir,
        "plugins/Hello/descriptor/descriptor.json",
        &hello_json("Hello"),
    );

    let out = plugctl(&dir).args(["startup", "--json"]).output().unwrap();
    assert!(out.status.success());
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["registered"], serde_json::json!(["Hello"]));
    assert_eq!(report["failed"], serde_json::json!([]));

    let records = list_json(&dir);
    assert_eq!(records[0]["component_name"], "Hello");
    assert_eq!(records[0]["managed"], false);
}

#[test]
fn startup_respects_skip_flag() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    std::fs::write(
        dir.path().join("plugctl.yaml"),
        "startup:\n  skip_auto_registration: true\n",
    )
    .unwrap();
    write_file(
        &dir,
        "plugins/Hello/descriptor/descriptor.json",
        &hello_json("Hello"),
    );

    plugctl(&dir)
        .arg("startup")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 registered"));
    assert_eq!(list_json(&dir), serde_json::json!([]));
}
