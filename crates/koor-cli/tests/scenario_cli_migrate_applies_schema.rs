//! Drives the `koor` binary end-to-end via `assert_cmd`, against a
//! throwaway sqlite file so it never touches a developer's real data dir.

use assert_cmd::Command;

#[test]
fn migrate_reports_success_and_creates_db_file() {
    let dir = std::env::temp_dir().join(format!("koor-cli-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let db_path = dir.join("koor.db");
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

    let mut cmd = Command::cargo_bin("koor").unwrap();
    cmd.env("KOOR_DATABASE_URL", &db_url)
        .arg("migrate")
        .assert()
        .success()
        .stdout(predicates::str::contains("migrations_applied=true"));

    assert!(db_path.exists());
    let _ = std::fs::remove_dir_all(&dir);
}
