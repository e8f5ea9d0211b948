use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use edge_watch::config::EdgeWatchConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "EDGE_WATCH_CONFIG",
        "EDGE_WATCH_ENDPOINT",
        "EDGE_WATCH_API_TOKEN",
        "EDGE_WATCH_SAVE_PATH",
        "EDGE_WATCH_SOURCE_URL",
        "EDGE_WATCH_MAX_RETRIES",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = EdgeWatchConfig::load().expect("load defaults");

    assert_eq!(cfg.preview.source_url, "stub://oak");
    assert_eq!((cfg.preview.width, cfg.preview.height), (320, 320));
    assert_eq!(cfg.preview.fps, 40);
    assert_eq!(cfg.preview.queue_capacity, 4);
    assert_eq!(cfg.preview.quit_key, 'q');
    assert_eq!(cfg.upload.endpoint, "https://fastapi-krabbel.fly.dev/classify");
    assert_eq!(cfg.upload.api_token, None);
    assert_eq!(cfg.upload.credential_header, "Authorization");
    assert_eq!(cfg.upload.max_retries, 5);
    assert_eq!(cfg.session.crop_subdir, PathBuf::from("crop/insect"));

    let upload = cfg.upload_config().expect("upload config");
    assert_eq!(upload.retry.backoff_factor, Duration::from_millis(100));
    assert_eq!(upload.retry.statuses, vec![429, 500, 502, 503, 504]);
    assert_eq!(upload.timeout, Duration::from_secs(30));

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "preview": {
                "source_url": "stub://bench",
                "width": 416,
                "height": 416,
                "fps": 20,
                "queue_capacity": 2,
                "quit_key": "x",
                "model_config": "models/json/custom.json"
            },
            "upload": {
                "endpoint": "https://classify.example.org/classify",
                "api_token": "from-file",
                "credential_header": "X-Api-Key",
                "max_retries": 3,
                "backoff_factor_s": 0.25,
                "timeout_s": 10
            },
            "session": {
                "save_path": "/media/usb/2024-06-01",
                "crop_subdir": "crop/all"
            }
        }"#,
    );

    std::env::set_var("EDGE_WATCH_CONFIG", file.path());
    std::env::set_var("EDGE_WATCH_API_TOKEN", "from-env");
    std::env::set_var("EDGE_WATCH_MAX_RETRIES", "7");
    std::env::set_var("EDGE_WATCH_SOURCE_URL", "stub://override");

    let cfg = EdgeWatchConfig::load().expect("load config");

    assert_eq!(cfg.preview.source_url, "stub://override");
    assert_eq!((cfg.preview.width, cfg.preview.height), (416, 416));
    assert_eq!(cfg.preview.fps, 20);
    assert_eq!(cfg.preview.queue_capacity, 2);
    assert_eq!(cfg.preview.quit_key, 'x');
    assert_eq!(cfg.preview.model_config, PathBuf::from("models/json/custom.json"));
    assert_eq!(cfg.upload.endpoint, "https://classify.example.org/classify");
    assert_eq!(cfg.upload.api_token.as_deref(), Some("from-env"));
    assert_eq!(cfg.upload.credential_header, "X-Api-Key");
    assert_eq!(cfg.upload.max_retries, 7);

    let upload = cfg.upload_config().expect("upload config");
    assert_eq!(upload.retry.max_retries, 7);
    assert_eq!(upload.retry.backoff_factor, Duration::from_millis(250));
    assert_eq!(upload.timeout, Duration::from_secs(10));

    let device = cfg.device_settings();
    assert_eq!(device.source_url, "stub://override");
    assert_eq!(device.queue_capacity, 2);

    let session = cfg.session_paths("2024-06-01_08-00-00");
    assert_eq!(
        session.metadata_path(),
        PathBuf::from("/media/usb/2024-06-01/2024-06-01_08-00-00_metadata.csv")
    );
    assert_eq!(session.crop_dir(), PathBuf::from("/media/usb/2024-06-01/crop/all"));

    clear_env();
}

#[test]
fn env_save_path_and_endpoint_override_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("EDGE_WATCH_ENDPOINT", "http://127.0.0.1:8000/classify");
    std::env::set_var("EDGE_WATCH_SAVE_PATH", "/tmp/session");

    let cfg = EdgeWatchConfig::load().expect("load config");
    assert_eq!(cfg.upload.endpoint, "http://127.0.0.1:8000/classify");
    assert_eq!(cfg.session.save_path, PathBuf::from("/tmp/session"));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for json in [
        r#"{ "upload": { "endpoint": "not a url" } }"#,
        r#"{ "upload": { "endpoint": "ftp://example.org/classify" } }"#,
        r#"{ "upload": { "backoff_factor_s": -1.0 } }"#,
        r#"{ "upload": { "backoff_factor_s": 1e30 } }"#,
        r#"{ "upload": { "timeout_s": 1e30 } }"#,
        r#"{ "upload": { "timeout_s": 0 } }"#,
        r#"{ "preview": { "queue_capacity": 0 } }"#,
        r#"{ "preview": { "width": 0 } }"#,
        r#"{ "preview": "#,
    ] {
        let file = write_config(json);
        std::env::set_var("EDGE_WATCH_CONFIG", file.path());
        assert!(EdgeWatchConfig::load().is_err(), "accepted {}", json);
    }

    clear_env();
    std::env::set_var("EDGE_WATCH_MAX_RETRIES", "many");
    assert!(EdgeWatchConfig::load().is_err());

    clear_env();
    let mut cfg = EdgeWatchConfig::load().expect("load defaults");
    cfg.upload.backoff_factor_s = 1e30;
    assert!(cfg.upload_config().is_err());

    clear_env();
}
