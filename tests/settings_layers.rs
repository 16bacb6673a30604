use std::io::Write;
use std::path::PathBuf;

use obsmith::error::ObsmithError;
use obsmith::settings::Settings;

#[test]
fn defaults_are_valid() {
    let settings = Settings::default();
    settings.validate().expect("defaults validate");
    assert_eq!(settings.generation.retry_limit, 100);
    assert_eq!(settings.generation.depth_ceiling, 20);
    assert_eq!(settings.generation.weights.as_array(), [88, 4, 4, 4]);
    assert_eq!(settings.driver.report_path, PathBuf::from("bug_log.txt"));
    assert!(settings.driver.connection_loss_is_bug);
}

#[test]
fn file_then_environment_override_defaults() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("tempfile");
    writeln!(
        file,
        "[generation]\nretry_limit = 7\n\n[generation.weights]\nselect = 1\ninsert = 0\nupdate = 0\ndelete = 0\n\n[driver]\nreport_path = \"found.tsv\"\nreconnect_backoff_ms = 10"
    )
    .expect("write");

    let settings = Settings::load(Some(file.path())).expect("load");
    assert_eq!(settings.generation.retry_limit, 7);
    assert_eq!(settings.generation.depth_ceiling, 20, "untouched keys keep defaults");
    assert_eq!(settings.generation.weights.as_array(), [1, 0, 0, 0]);
    assert_eq!(settings.driver.report_path, PathBuf::from("found.tsv"));
    assert_eq!(settings.driver.reconnect_backoff_ms, 10);

    // SAFETY: no other test in this binary depends on this variable
    unsafe {
        std::env::set_var("OBSMITH_GENERATION__DEPTH_CEILING", "12");
    }
    let settings = Settings::load(Some(file.path())).expect("load with environment");
    unsafe {
        std::env::remove_var("OBSMITH_GENERATION__DEPTH_CEILING");
    }
    assert_eq!(settings.generation.depth_ceiling, 12);
    assert_eq!(settings.generation.retry_limit, 7);
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.toml");
    assert!(matches!(
        Settings::load(Some(&path)),
        Err(ObsmithError::Config(_))
    ));
}

#[test]
fn nonsense_values_are_rejected() {
    let mut settings = Settings::default();
    settings.generation.retry_limit = 0;
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.generation.weights.select = 0;
    settings.generation.weights.insert = 0;
    settings.generation.weights.update = 0;
    settings.generation.weights.delete = 0;
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.impedance.max_error_rate = 1.5;
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.driver.progress_columns = 0;
    assert!(settings.validate().is_err());
}
