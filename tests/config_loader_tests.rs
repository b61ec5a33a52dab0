use project_sync::config::ConfigLoader;
use project_sync::models::sync_job::JobKind;
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    let keys: Vec<String> = env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("PROJECT_SYNC_"))
        .collect();
    unsafe {
        for key in keys {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    let cfg = loader(&temp_dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.worker.max_run_seconds, 600);
    assert_eq!(cfg.reconciler.running_timeout_seconds, 1800);
    assert_eq!(cfg.reconciler.queued_timeout_seconds, 900);
    assert!(!cfg.integration_configured(JobKind::IssueTracker));
    assert!(!cfg.integration_configured(JobKind::Resourcing));
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "PROJECT_SYNC_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "PROJECT_SYNC_API_BIND_ADDR=192.168.0.10:5000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "PROJECT_SYNC_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "PROJECT_SYNC_PROFILE=test\nPROJECT_SYNC_API_BIND_ADDR=127.0.0.1:4000\n",
    );

    let cfg = loader(&temp_dir)
        .load()
        .expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "PROJECT_SYNC_API_BIND_ADDR=127.0.0.1:3000\nPROJECT_SYNC_WORKER_CONCURRENCY=2\n",
    );

    unsafe {
        env::set_var("PROJECT_SYNC_API_BIND_ADDR", "0.0.0.0:9090");
    }

    let cfg = loader(&temp_dir).load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(cfg.worker.concurrency, 2);

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("PROJECT_SYNC_API_BIND_ADDR", "not-an-addr");
    }
    let err = loader(&temp_dir)
        .load()
        .expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}

#[test]
fn complete_integration_settings_enable_the_kind() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "PROJECT_SYNC_ISSUE_TRACKER_BASE_URL=https://acme.atlassian.net\n\
         PROJECT_SYNC_ISSUE_TRACKER_EMAIL=ops@acme.test\n\
         PROJECT_SYNC_ISSUE_TRACKER_API_TOKEN=secret-token\n",
    );

    let cfg = loader(&temp_dir).load().expect("issue tracker settings load");

    assert!(cfg.integration_configured(JobKind::IssueTracker));
    assert!(!cfg.integration_configured(JobKind::Resourcing));
    let redacted = cfg.redacted_json().unwrap();
    assert!(!redacted.contains("secret-token"));
    assert!(redacted.contains("[REDACTED]"));

    clear_env();
}

#[test]
fn partial_integration_settings_are_rejected() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("PROJECT_SYNC_RESOURCING_INSTANCE_URL", "https://acme.my.salesforce.com");
    }
    let err = loader(&temp_dir)
        .load()
        .expect_err("missing access token should fail");
    assert!(err.to_string().contains("PROJECT_SYNC_RESOURCING_ACCESS_TOKEN"));

    clear_env();
}

#[test]
fn blank_values_count_as_unset() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("PROJECT_SYNC_ISSUE_TRACKER_BASE_URL", "  ");
        env::set_var("PROJECT_SYNC_ISSUE_TRACKER_EMAIL", "");
    }
    let cfg = loader(&temp_dir).load().expect("blank settings are ignored");
    assert!(!cfg.integration_configured(JobKind::IssueTracker));

    clear_env();
}

#[test]
fn running_timeout_shorter_than_max_run_is_rejected() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("PROJECT_SYNC_WORKER_MAX_RUN_SECONDS", "900");
        env::set_var("PROJECT_SYNC_RECONCILER_RUNNING_TIMEOUT_SECONDS", "600");
    }
    let err = loader(&temp_dir)
        .load()
        .expect_err("running timeout below max run should fail");
    assert!(err.to_string().contains("running timeout"));

    clear_env();
}

#[test]
fn unparseable_numbers_fall_back_to_defaults() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("PROJECT_SYNC_WORKER_CONCURRENCY", "many");
    }
    let cfg = loader(&temp_dir).load().expect("falls back to default");
    assert_eq!(cfg.worker.concurrency, 4);

    clear_env();
}
