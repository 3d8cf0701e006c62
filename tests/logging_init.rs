use taskcraft_session::{init_logging, ErrorKind, SessionSettings};

#[test]
fn init_logging_installs_once_and_writes_the_log_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = SessionSettings {
        log_dir: Some(dir.path().join("logs")),
        ..SessionSettings::default()
    };

    let guard = init_logging(&settings).expect("first init succeeds");
    tracing::info!("hello from the logging test");
    drop(guard);

    let written = std::fs::read_dir(dir.path().join("logs"))
        .expect("log dir created")
        .filter_map(Result::ok)
        .any(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("taskcraft-session.log")
        });
    assert!(written, "daily log file was not created");

    let err = init_logging(&SessionSettings::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}
