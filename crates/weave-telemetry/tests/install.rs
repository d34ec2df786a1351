use weave_core::{CoreError, ErrorCategory};
use weave_telemetry::{TelemetryConfig, TelemetryError, install};

#[test]
fn install_succeeds_once_then_refuses() {
    let config = TelemetryConfig {
        directive: "weave=debug,info".to_owned(),
        ..TelemetryConfig::default()
    };
    install(&config).expect("首次安装成功");
    tracing::info!(target: "weave", "telemetry installed");

    let again = install(&config).expect_err("重复安装应失败");
    assert!(matches!(again, TelemetryError::AlreadyInstalled));

    let core: CoreError = again.into();
    assert_eq!(core.category(), ErrorCategory::Configuration);
}
