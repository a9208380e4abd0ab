use std::fs;

use club_push::config::Config;
use club_push::logging::setup_logging;

const LINES: usize = 2000;

#[test]
fn test_dropping_guard_flushes_log_file() {
    let logs_path = std::env::temp_dir().join(format!("club-push-logs-{}", uuid::Uuid::new_v4()));
    let mut config = Config::new();
    config.logs_path = logs_path.clone();

    // SAFETY: the only test in this binary; nothing else reads the environment.
    unsafe { std::env::set_var("RUST_LOG", "club_push=info") };
    let guard = setup_logging(&config).expect("Failed to set up logging");

    for i in 0..LINES {
        log::info!(target: "club_push", "line {i}");
    }
    drop(guard);

    let written: usize = fs::read_dir(&logs_path)
        .unwrap()
        .map(|entry| fs::read_to_string(entry.unwrap().path()).unwrap())
        .map(|content| content.lines().filter(|l| l.contains("line ")).count())
        .sum();
    fs::remove_dir_all(&logs_path).ok();

    assert_eq!(written, LINES);
}
