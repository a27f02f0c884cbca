use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn argo_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("argo");
    path
}

const RAW_PROFILE: &str = "\
PLATFORM_NUMBER,CYCLE_NUMBER,DIRECTION,JULD,LATITUDE,LONGITUDE,DATA_MODE,PRES,PRES_QC,TEMP,TEMP_QC,PSAL,PSAL_QC
b'2902746',12,A,2019-05-14 06:30:00,10.5,70.25,R,3.0,1,28.0,1,35.0,1
b'2902746',12,A,2019-05-14 06:30:00,10.5,70.25,R,7.0,1,27.0,1,35.2,1
b'2902746',12,A,2019-05-14 06:30:00,10.5,70.25,R,15.0,1,25.0,1,35.4,1
b'2902746',12,A,2019-05-14 06:30:00,10.5,70.25,R,25.0,4,99.0,4,99.0,4
";

const LEAN_PROFILE: &str = "\
platform_number,cycle_number,juld,latitude,longitude,pres,temp,psal,profile_id
2902746,12,2019-05-14 06:30:00,10.5,70.25,5.0,27.5,35.1,Binned
2902746,12,2019-05-14 06:30:00,10.5,70.25,15.0,25.0,35.4,Binned
2902746,12,not-a-date,10.5,70.25,25.0,20.0,35.5,Binned
2902746,12,2019-05-14 06:30:00,10.5,70.25,8.33,26.67,35.2,Mean
";

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let raw_dir = root.join("raw");
    fs::create_dir_all(&raw_dir).unwrap();
    fs::write(raw_dir.join("R2902746_012.csv"), RAW_PROFILE).unwrap();

    let lean_dir = root.join("lean");
    fs::create_dir_all(&lean_dir).unwrap();
    fs::write(lean_dir.join("R2902746_012.csv"), LEAN_PROFILE).unwrap();
    fs::write(lean_dir.join("notes.txt"), "not a profile").unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/argo.sqlite"

[cleaning]
bin_size = 10.0

[ingest]
batch_size = 2

[retrieval]
n_results = 5

[server]
bind = "127.0.0.1:7332"
"#,
        root.display()
    );

    let config_path = config_dir.join("argo.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_argo(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = argo_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run argo binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn root_of(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().to_path_buf()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_argo(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(root_of(&config_path).join("data/argo.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_argo(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_argo(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_clean_writes_lean_csv() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);
    let input = root.join("raw/R2902746_012.csv");
    let output = root.join("processed/R2902746_012.csv");

    let (stdout, stderr, success) = run_argo(
        &config_path,
        &["clean", input.to_str().unwrap(), "--output", output.to_str().unwrap()],
    );
    assert!(success, "clean failed: stdout={}, stderr={}", stdout, stderr);
    // the flag-4 level is dropped by QC
    assert!(stdout.contains("rows before binning: 3"), "stdout={}", stdout);
    assert!(stdout.contains("pressure bins: 2"));

    let written = fs::read_to_string(&output).unwrap();
    let header = written.lines().next().unwrap();
    assert!(header.starts_with("platform_number,cycle_number,direction,juld"));
    assert!(header.ends_with("pres,temp,psal,profile_id"));
    assert!(!header.contains("_qc"));
    assert_eq!(written.lines().count(), 4); // header + 2 bins + mean
    assert!(written.lines().last().unwrap().ends_with("Mean"));
    assert!(!written.contains("b'"));
}

#[test]
fn test_clean_default_output_and_bin_size() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);
    let input = root.join("raw/R2902746_012.csv");

    let (stdout, stderr, success) =
        run_argo(&config_path, &["clean", input.to_str().unwrap(), "--bin-size", "100"]);
    assert!(success, "clean failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("pressure bins: 1"));
    assert!(root.join("raw/R2902746_012_clean.csv").exists());
}

#[test]
fn test_clean_rejects_unknown_extension() {
    let (_tmp, config_path) = setup_test_env();
    let input = root_of(&config_path).join("lean/notes.txt");

    let (_, stderr, success) = run_argo(&config_path, &["clean", input.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Unsupported input"), "stderr={}", stderr);
}

#[test]
fn test_import_folder() {
    let (_tmp, config_path) = setup_test_env();
    let lean = root_of(&config_path).join("lean");

    run_argo(&config_path, &["init"]);
    let (stdout, stderr, success) = run_argo(&config_path, &["import", lean.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files found: 1"), "stdout={}", stdout);
    assert!(stdout.contains("rows read: 4"));
    assert!(stdout.contains("rows upserted: 2"));
    assert!(stdout.contains("rows skipped (bad juld): 1"));
    assert!(stdout.contains("rows skipped (mean rows): 1"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_import_skips_unchanged_files() {
    let (_tmp, config_path) = setup_test_env();
    let lean = root_of(&config_path).join("lean");

    run_argo(&config_path, &["init"]);
    let (stdout1, _, _) = run_argo(&config_path, &["import", lean.to_str().unwrap()]);
    assert!(stdout1.contains("files imported: 1"));

    let (stdout2, _, _) = run_argo(&config_path, &["import", lean.to_str().unwrap()]);
    assert!(stdout2.contains("files unchanged: 1"), "stdout={}", stdout2);
    assert!(stdout2.contains("files imported: 0"));

    // --full re-imports without creating duplicates
    let (stdout3, _, _) = run_argo(&config_path, &["import", lean.to_str().unwrap(), "--full"]);
    assert!(stdout3.contains("files imported: 1"));

    let (stats, _, success) = run_argo(&config_path, &["stats"]);
    assert!(success);
    assert!(stats.contains("Rows:        2"), "stats={}", stats);
}

#[test]
fn test_import_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();
    let lean = root_of(&config_path).join("lean");

    run_argo(&config_path, &["init"]);
    let (stdout, _, success) =
        run_argo(&config_path, &["import", lean.to_str().unwrap(), "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("(dry-run)"));

    let (stats, _, _) = run_argo(&config_path, &["stats"]);
    assert!(stats.contains("Rows:        0"), "stats={}", stats);
}

#[test]
fn test_clean_then_import_then_profile() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);
    let input = root.join("raw/R2902746_012.csv");
    let processed = root.join("processed");

    run_argo(&config_path, &["init"]);
    let (_, stderr, success) = run_argo(
        &config_path,
        &[
            "clean",
            input.to_str().unwrap(),
            "--output",
            processed.join("R2902746_012.csv").to_str().unwrap(),
        ],
    );
    assert!(success, "clean failed: {}", stderr);

    let (stdout, _, success) = run_argo(&config_path, &["import", processed.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("rows upserted: 2"), "stdout={}", stdout);

    let (stdout, stderr, success) =
        run_argo(&config_path, &["profile", "2902746", "2019-05-14T06:30:00"]);
    assert!(success, "profile failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("2 levels"), "stdout={}", stdout);
    // bin 0 holds pres 3 and 7
    assert!(stdout.contains("5.00"));
    assert!(stdout.contains("27.500"));

    let (stats, _, _) = run_argo(&config_path, &["stats"]);
    assert!(stats.contains("Platforms:   1"));
    assert!(stats.contains("Profiles:    1"));
    assert!(stats.contains("Embedded:    0 / 1"));
}

#[test]
fn test_profile_not_found() {
    let (_tmp, config_path) = setup_test_env();

    run_argo(&config_path, &["init"]);
    let (_, stderr, success) = run_argo(&config_path, &["profile", "0000000", "2019-05-14 06:30:00"]);
    assert!(!success);
    assert!(stderr.contains("profile not found"), "stderr={}", stderr);
}

#[test]
fn test_search_requires_embeddings() {
    let (_tmp, config_path) = setup_test_env();

    run_argo(&config_path, &["init"]);
    let (_, stderr, success) = run_argo(&config_path, &["search", "warm water May 2019"]);
    assert!(!success);
    assert!(stderr.contains("requires embeddings"), "stderr={}", stderr);

    let (_, stderr, success) = run_argo(&config_path, &["embed", "pending"]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr={}", stderr);
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let mut content = fs::read_to_string(&config_path).unwrap();
    content = content.replace("bin_size = 10.0", "bin_size = -1.0");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_argo(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("bin_size"), "stderr={}", stderr);
}
