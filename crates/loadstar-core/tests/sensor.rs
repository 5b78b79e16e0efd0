mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use common::{fast_config, lines, Reply, StubDevice};
use loadstar_core::protocol::{FirmwareProfile, ProtocolError, ResponseTerminator};
use loadstar_core::sensor::{DeviceInfo, LoadstarSensor};
use loadstar_core::units::Unit;
use loadstar_core::values::{Sample, ScaleFactor};
use pretty_assertions::assert_eq;
use tokio::io::DuplexStream;

fn di1000u(request: &str) -> Reply {
    match request {
        "" => lines(&["A"]),
        "w" => lines(&["12.5"]),
        "r" => lines(&["83886"]),
        "model" => lines(&["DI-1000U"]),
        "id" => lines(&["S1234"]),
        "unit" => lines(&["LB"]),
        "lc" => lines(&["1000.0"]),
        "css" => lines(&["16"]),
        "cla" => lines(&["00000\t( 2.1999995e-03)"]),
        "tare" => lines(&["A"]),
        "settings" => lines(&["css 16", "cla 0.0022", "A"]),
        "wc" => Reply::Stream((1..=5).map(|i| format!("{i}.0")).collect()),
        _ => Reply::Silent,
    }
}

async fn connect() -> (LoadstarSensor<DuplexStream>, StubDevice) {
    let (stream, stub) = StubDevice::spawn(&[], di1000u);
    let sensor = LoadstarSensor::connect(stream, fast_config()).await.unwrap();
    (sensor, stub)
}

#[tokio::test]
async fn test_connect_fails_without_device() {
    let (stream, _stub) = StubDevice::spawn(&[], |_| Reply::Silent);
    let result = LoadstarSensor::connect(stream, fast_config()).await;
    assert!(matches!(result, Err(ProtocolError::DeviceNotFound { .. })));
}

#[tokio::test]
async fn test_single_shot_reads() {
    let (sensor, _stub) = connect().await;

    assert_eq!(
        sensor.sensor_value().await.unwrap(),
        Some(Sample::raw(12.5, None))
    );
    assert_eq!(sensor.adc_value().await.unwrap(), Some(83886.0));
    assert_eq!(sensor.model().await.unwrap().as_deref(), Some("DI-1000U"));
    assert_eq!(sensor.id().await.unwrap().as_deref(), Some("S1234"));
    assert_eq!(sensor.native_units().await.unwrap().as_deref(), Some("LB"));
    assert_eq!(sensor.native_unit().await.unwrap(), Some(Unit::Pound));
}

#[tokio::test]
async fn test_read_retries_past_garbage() {
    let calls = AtomicU32::new(0);
    let (stream, stub) = StubDevice::spawn(&[], move |request| match request {
        "" => lines(&["A"]),
        "w" if calls.fetch_add(1, Ordering::SeqCst) < 2 => lines(&["Tared"]),
        "w" => lines(&["7.25"]),
        _ => Reply::Silent,
    });
    let sensor = LoadstarSensor::connect(stream, fast_config()).await.unwrap();

    let sample = sensor.sensor_value().await.unwrap().unwrap();
    assert_eq!(sample.value, 7.25);
    assert_eq!(stub.count("w"), 3);
}

#[tokio::test]
async fn test_read_gives_up_after_attempts() {
    let (stream, stub) = StubDevice::spawn(&[], |request| match request {
        "" => lines(&["A"]),
        _ => Reply::Silent,
    });
    let sensor = LoadstarSensor::connect(stream, fast_config()).await.unwrap();

    assert_eq!(sensor.sensor_value().await.unwrap(), None);
    assert_eq!(stub.count("w"), 5);
}

#[tokio::test]
async fn test_averaging_window_is_clamped() {
    let (sensor, stub) = connect().await;

    assert_eq!(sensor.set_averaging_window(2000).await.unwrap(), 1024);
    assert_eq!(sensor.set_averaging_window(0).await.unwrap(), 1);
    assert_eq!(stub.count("css 1024"), 1);
    assert_eq!(stub.count("css 1"), 1);
    assert_eq!(sensor.averaging_window().await.unwrap(), Some(16));
}

#[tokio::test]
async fn test_averaging_threshold_round_trip() {
    let (sensor, stub) = connect().await;

    assert_eq!(sensor.set_averaging_threshold(250).await.unwrap(), 100);
    assert_eq!(sensor.set_averaging_threshold(10).await.unwrap(), 10);
    assert_eq!(stub.count("cla 1"), 1);
    assert_eq!(stub.count("cla 0.1"), 1);
    assert_eq!(sensor.averaging_threshold().await.unwrap(), Some(10));
}

#[tokio::test]
async fn test_current_firmware_commands() {
    let (stream, stub) = StubDevice::spawn_with_terminator("\n", &[], |request| match request {
        "" => lines(&["A"]),
        "tare" => lines(&["Tared"]),
        "cla" => lines(&["0.25"]),
        _ => Reply::Silent,
    });
    let mut config = fast_config();
    config.firmware = FirmwareProfile::current();
    assert_eq!(config.firmware.response_terminator, ResponseTerminator::Lf);
    let sensor = LoadstarSensor::connect(stream, config).await.unwrap();

    assert!(sensor.tare().await.unwrap());
    sensor.set_averaging_window(64).await.unwrap();
    assert_eq!(stub.count("CSS 64"), 1);
    assert_eq!(sensor.averaging_threshold().await.unwrap(), Some(25));
}

#[tokio::test]
async fn test_tare() {
    let (sensor, stub) = connect().await;
    assert!(sensor.tare().await.unwrap());
    assert_eq!(stub.count("tare"), 1);
}

#[tokio::test]
async fn test_tare_never_acknowledged() {
    let (stream, stub) = StubDevice::spawn(&[], |request| match request {
        "" => lines(&["A"]),
        "tare" => lines(&["E"]),
        _ => Reply::Silent,
    });
    let sensor = LoadstarSensor::connect(stream, fast_config()).await.unwrap();

    assert!(!sensor.tare().await.unwrap());
    assert_eq!(stub.count("tare"), 5);
}

#[tokio::test]
async fn test_settings() {
    let (sensor, _stub) = connect().await;
    assert_eq!(
        sensor.settings().await.unwrap(),
        vec!["css 16".to_string(), "cla 0.0022".to_string()]
    );
}

#[tokio::test]
async fn test_device_info_in_kilograms() {
    let (sensor, _stub) = connect().await;
    sensor.set_output_unit("lb", "kg").unwrap();

    let info = sensor.device_info().await.unwrap();
    let capacity = info.load_capacity.unwrap();
    assert!((capacity.value - 453.59237).abs() < 1e-9);

    assert_eq!(
        info,
        DeviceInfo {
            port: "stub".to_string(),
            model: Some("DI-1000U".to_string()),
            id: Some("S1234".to_string()),
            native_units: Some("LB".to_string()),
            load_capacity: Some(capacity),
            averaging_window: Some(16),
            averaging_threshold: Some(10),
        }
    );
    assert_eq!(capacity.unit, Some(Unit::Kilogram));
}

#[tokio::test]
async fn test_scale_factor_applies_to_later_reads() {
    let (sensor, _stub) = connect().await;
    let before = sensor.sensor_value().await.unwrap().unwrap();

    sensor.set_scale_factor(ScaleFactor::PoundsToGrams);
    let after = sensor.sensor_value().await.unwrap().unwrap();

    assert_eq!(before.value, 12.5);
    assert!((after.value - 12.5 * 453.59237).abs() < 1e-9);
    assert_eq!(after.unit, Some(Unit::Gram));
}

#[tokio::test]
async fn test_output_unit_rejected_eagerly() {
    let (sensor, stub) = connect().await;
    let before = stub.requests().len();

    assert!(matches!(
        sensor.set_output_unit("lb", "furlong"),
        Err(ProtocolError::IncompatibleUnits { .. })
    ));
    assert_eq!(stub.requests().len(), before);
}

#[tokio::test]
async fn test_sample_for_duration() {
    let (sensor, _stub) = connect().await;
    sensor.set_output_unit("lb", "N").unwrap();

    let (samples, stats) = sensor
        .sample_for_duration(Duration::from_millis(60))
        .await
        .unwrap();
    assert_eq!(stats.sample_count, 5);
    assert_eq!(samples.len(), 5);
    assert!(samples.iter().all(|s| s.unit == Some(Unit::Newton)));
    assert!((samples[0].value - 4.4482216152605).abs() < 1e-9);

    // Back to request/response afterwards
    assert!(sensor.sensor_value().await.unwrap().is_some());
}

#[tokio::test]
async fn test_reads_refused_while_streaming() {
    let (sensor, _stub) = connect().await;
    sensor.start_streaming(|_| async {}).await.unwrap();

    assert!(matches!(
        sensor.sensor_value().await,
        Err(ProtocolError::Streaming)
    ));
    assert!(matches!(
        sensor.sample_for_duration(Duration::from_millis(5)).await,
        Err(ProtocolError::Streaming)
    ));
    sensor.stop_streaming().await.unwrap();
}

#[tokio::test]
async fn test_close() {
    let (sensor, _stub) = connect().await;
    sensor.close().await.unwrap();
    assert!(matches!(
        sensor.model().await,
        Err(ProtocolError::ChannelClosed)
    ));
}
