use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn cctx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("cctx");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let materials = root.join("materials");
    fs::create_dir_all(materials.join("cs101")).unwrap();
    fs::create_dir_all(materials.join("math201")).unwrap();

    fs::write(
        materials.join("catalog.json"),
        r#"{
  "courses": [
    {"id": "cs101", "code": "CS101", "name": "Intro to Programming"},
    {"id": "math201", "code": "MATH201", "name": "Linear Algebra"}
  ],
  "enrollments": {"alice": ["cs101", "math201"]}
}"#,
    )
    .unwrap();
    fs::write(
        materials.join("cs101/lectures.json"),
        r#"[
  {"id": "loops", "courseId": "cs101", "type": "lecture", "title": "Loops", "week": 2,
   "content": "A while loop repeats its body until the condition becomes false. Forgetting to update the loop variable makes the loop run forever.",
   "keywords": ["loops", "iteration"]},
  {"id": "recursion", "courseId": "cs101", "type": "lecture", "title": "Recursion", "week": 5,
   "content": "A recursive function calls itself on a smaller input. Every recursive function needs a base case that stops the recursion."}
]"#,
    )
    .unwrap();
    fs::write(
        materials.join("cs101/hw3.json"),
        r#"{"id": "hw3", "courseId": "cs101", "type": "homework", "title": "Homework 3", "week": 5,
  "content": "Write a recursive function that sums a list. Identify the base case first."}"#,
    )
    .unwrap();
    fs::write(
        materials.join("math201/eigen.json"),
        r#"{"id": "eigen", "courseId": "math201", "type": "lecture", "title": "Eigenvalues", "week": 7,
  "content": "An eigenvalue scales its eigenvector under a linear map. A rotation matrix in the plane has complex eigenvalues.",
  "keywords": ["matrix", "eigenvalues"]}"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[materials]
root = "{}/materials"

[context]
max_materials = 3
min_relevance = 20.0
max_tokens = 600

[cache]
backend = "lru"
max_entries = 64
ttl_secs = 60

[server]
bind = "127.0.0.1:7341"
"#,
        root.display()
    );

    let config_path = config_dir.join("cctx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cctx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cctx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cctx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_courses_lists_material_counts() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cctx(&config_path, &["courses"]);
    assert!(success, "courses failed: stdout={}, stderr={}", stdout, stderr);

    let cs101 = stdout.lines().find(|l| l.starts_with("cs101")).unwrap();
    assert!(cs101.contains("CS101"));
    assert!(cs101.contains(" 3 "), "expected 3 materials: {}", cs101);
    let math = stdout.lines().find(|l| l.starts_with("math201")).unwrap();
    assert!(math.contains(" 1 "), "expected 1 material: {}", math);
}

#[test]
fn test_context_ranks_matching_material_first() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cctx(
        &config_path,
        &["context", "cs101", "why does my while loop run forever"],
    );
    assert!(success, "context failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Course: CS101 (Intro to Programming)"));
    assert!(stdout.contains("1. [100%] lecture / Loops"));
    assert!(stdout.contains("### [1] Loops (lecture, week 2)"));
}

#[test]
fn test_context_json() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cctx(
        &config_path,
        &["context", "cs101", "recursive function base case", "--json"],
    );
    assert!(success, "context --json failed: stdout={}, stderr={}", stdout, stderr);

    let ctx: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(ctx["courseId"], "cs101");
    let materials = ctx["materials"].as_array().unwrap();
    assert!(!materials.is_empty());
    assert!(materials.len() <= 3);
    assert!(materials.iter().all(|m| m["id"] != "loops"));
    assert!(ctx["estimatedTokens"].as_u64().unwrap() <= 600);
    assert!(ctx["routing"]["action"].is_string());
}

#[test]
fn test_context_priority_types_first() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cctx(
        &config_path,
        &[
            "context",
            "cs101",
            "recursive function base case",
            "--priority",
            "homework",
            "--min-relevance",
            "0",
            "--json",
        ],
    );
    assert!(success, "context failed: stdout={}, stderr={}", stdout, stderr);

    let ctx: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(ctx["materials"][0]["id"], "hw3");
}

#[test]
fn test_context_unknown_course() {
    let (_tmp, config_path) = setup_test_env();

    let (_stdout, stderr, success) = run_cctx(&config_path, &["context", "bio999", "cells"]);
    assert!(!success);
    assert!(stderr.contains("Unknown course: bio999"));
}

#[test]
fn test_context_invalid_options() {
    let (_tmp, config_path) = setup_test_env();

    let (_stdout, stderr, success) = run_cctx(
        &config_path,
        &["context", "cs101", "loops", "--max-tokens", "0"],
    );
    assert!(!success);
    assert!(stderr.contains("invalid context options"));
}

#[test]
fn test_detect_course_from_code() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cctx(
        &config_path,
        &["detect", "In CS101, how do I write a recursive function?"],
    );
    assert!(success, "detect failed: stdout={}, stderr={}", stdout, stderr);

    let first = stdout.lines().nth(1).unwrap();
    assert!(first.starts_with("cs101"), "unexpected first row: {}", first);
}

#[test]
fn test_multi_detects_courses() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cctx(
        &config_path,
        &["multi", "alice", "eigenvalues of a rotation matrix", "--json"],
    );
    assert!(success, "multi failed: stdout={}, stderr={}", stdout, stderr);

    let multi: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(multi["courseIds"][0], "math201");
    assert!(multi["combinedText"]
        .as_str()
        .unwrap()
        .starts_with("## MATH201: Linear Algebra"));
    assert!(multi["totalTokens"].as_u64().unwrap() <= 600);
}

#[test]
fn test_multi_explicit_courses() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cctx(
        &config_path,
        &[
            "multi", "alice", "loops", "--course", "cs101", "--course", "nope", "--course", "math201",
        ],
    );
    assert!(success, "multi failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("## CS101: Intro to Programming"));
    assert!(stdout.contains("## MATH201: Linear Algebra"));
    assert!(!stdout.contains("nope"));
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("absent.toml");

    let (_stdout, stderr, success) = run_cctx(&missing, &["courses"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_config_errors() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, format!("{}\n[embedding]\nprovider = \"magic\"\n", content)).unwrap();

    let (_stdout, stderr, success) = run_cctx(&config_path, &["courses"]);
    assert!(!success);
    assert!(stderr.contains("Unknown embedding provider"));
}
