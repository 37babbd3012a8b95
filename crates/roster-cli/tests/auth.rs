//! Integration tests for `login`, `logout` and `status`.


use assert_cmd::cargo::cargo_bin_cmd;
use fixtures::{USERNAME, seed_token_cache};
use predicates::prelude::*;
use tempfile::TempDir;

/// Creates a temp ROSTER_HOME directory for test isolation.
fn temp_roster_home() -> TempDir {
    TempDir::new().expect("create temp roster home")
}

#[test]
fn test_status_when_not_signed_in() {
    let home = temp_roster_home();

    cargo_bin_cmd!("roster")
        .env("ROSTER_HOME", home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not signed in."));
}

#[test]
fn test_status_shows_cached_account_with_masked_token() {
    let home = temp_roster_home();
    seed_token_cache(home.path());

    cargo_bin_cmd!("roster")
        .env("ROSTER_HOME", home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Signed in as {USERNAME}")))
        .stdout(predicate::str::contains("eyJ0eXAiOiJK..."))
        .stdout(predicate::str::contains("(valid)"))
        .stdout(predicate::str::contains("test-access").not());
}

#[test]
fn test_logout_when_not_signed_in() {
    let home = temp_roster_home();

    cargo_bin_cmd!("roster")
        .env("ROSTER_HOME", home.path())
        .env("ROSTER_CLIENT_ID", "client-1")
        .env("ROSTER_TENANT_ID", "tenant-1")
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not signed in"));
}

#[test]
fn test_logout_removes_cached_account() {
    let home = temp_roster_home();
    seed_token_cache(home.path());

    cargo_bin_cmd!("roster")
        .env("ROSTER_HOME", home.path())
        .env("ROSTER_CLIENT_ID", "client-1")
        .env("ROSTER_TENANT_ID", "tenant-1")
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ Signed out"));

    cargo_bin_cmd!("roster")
        .env("ROSTER_HOME", home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not signed in."));
}

#[test]
fn test_login_requires_client_id() {
    let home = temp_roster_home();

    cargo_bin_cmd!("roster")
        .env("ROSTER_HOME", home.path())
        .env_remove("ROSTER_CLIENT_ID")
        .env("ROSTER_TENANT_ID", "tenant-1")
        .arg("login")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ROSTER_CLIENT_ID"));
}

#[test]
fn test_no_browser_env_accepts_any_value() {
    let home = temp_roster_home();

    for value in ["1", "yes", "0", ""] {
        cargo_bin_cmd!("roster")
            .env("ROSTER_HOME", home.path())
            .env("ROSTER_NO_BROWSER", value)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Not signed in."));
    }
}
