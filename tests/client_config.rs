use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use o3d_client::config::ClientConfig;
use o3d_client::{ModulationFrequency, SamplingMode};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "O3D_CONFIG",
        "O3D_DEVICE_ADDR",
        "O3D_RPC_PORT",
        "O3D_CLIENT_ADDR",
        "O3D_CONNECT_TIMEOUT_MS",
        "O3D_FRAME_TIMEOUT_MS",
        "O3D_SYNCHRONIZED",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "device_addr": "192.168.1.26",
        "rpc_port": 8081,
        "client_addr": "192.168.1.10",
        "timeouts": {
            "connect_ms": 1500,
            "frame_ms": 750
        },
        "synchronized": true,
        "imager": {
            "modulation_frequency": "single_second",
            "sampling_mode": "high_dynamic",
            "integration_time_short": 150,
            "integration_time_long": 1200,
            "delay_time": 100
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("O3D_CONFIG", file.path());
    std::env::set_var("O3D_CLIENT_ADDR", "192.168.1.11");
    std::env::set_var("O3D_FRAME_TIMEOUT_MS", "2000");
    std::env::set_var("O3D_SYNCHRONIZED", "false");

    let cfg = ClientConfig::load().expect("load config");

    assert_eq!(cfg.device_addr, "192.168.1.26");
    assert_eq!(cfg.rpc_port, 8081);
    assert_eq!(cfg.rpc_url(), "http://192.168.1.26:8081");
    assert_eq!(cfg.client_addr, "192.168.1.11");
    assert_eq!(cfg.connect_timeout, Duration::from_millis(1500));
    assert_eq!(cfg.frame_timeout, Duration::from_secs(2));
    assert!(!cfg.synchronized);

    let imager = cfg.imager.clone().expect("imager block");
    assert_eq!(imager.modulation_frequency, ModulationFrequency::SingleSecond);
    assert_eq!(imager.sampling_mode, SamplingMode::HighDynamic);
    assert_eq!(imager.integration_time_short, 150);
    assert_eq!(imager.integration_time_long, 1200);
    assert_eq!(imager.delay_time, 100);

    let options = cfg.session_options().expect("session options");
    assert_eq!(options.device_addr.to_string(), "192.168.1.26");
    assert_eq!(options.frame_timeout, Duration::from_secs(2));

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ClientConfig::load().expect("load defaults");
    assert_eq!(cfg.device_addr, "192.168.0.69");
    assert_eq!(cfg.rpc_port, 8080);
    assert_eq!(cfg.connect_timeout, Duration::from_secs(5));
    assert!(cfg.imager.is_none());
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("O3D_FRAME_TIMEOUT_MS", "soon");
    assert!(ClientConfig::load().is_err());
    clear_env();

    std::env::set_var("O3D_CONNECT_TIMEOUT_MS", "0");
    assert!(ClientConfig::load().is_err());
    clear_env();

    std::env::set_var("O3D_DEVICE_ADDR", "not-an-ip");
    assert!(ClientConfig::load().is_err());
    clear_env();
}
