use clinic_comms::config::CommsConfig;
use clinic_comms::registry::ServiceRegistry;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
service:
  name: appointment_service
retry:
  max_retries: 1
dependencies:
  insurance_service:
    env_var: INSURANCE_SERVICE_URL_CONFIG_TEST
    default_url: "http://localhost:3200"
    internal_prefix: /api/internal
"#
    )
    .unwrap();

    let config = CommsConfig::from_file(file.path()).unwrap();
    config.validate().unwrap();
    assert_eq!(config.retry.max_retries, 1);

    let services = ServiceRegistry::from_config(&config.dependencies).unwrap();
    let insurance = services.get("insurance_service").unwrap();
    assert_eq!(insurance.base_url, "http://localhost:3200");
    assert_eq!(
        insurance.url_for(&insurance.internal_path("/claims")),
        "http://localhost:3200/api/internal/claims"
    );
    assert!(services.contains("payment_gateway"));
}

#[test]
fn test_invalid_yaml_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "service: [unclosed").unwrap();
    assert!(CommsConfig::from_file(file.path()).is_err());
}

#[test]
fn test_shipped_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/comms.yaml");
    let config = CommsConfig::from_file(path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.service.name, "payment_service");
    assert_eq!(config.dependencies["notification_service"].health_path, "/up");
}
