// End-to-end scenarios: wire bytes in, output vectors out
use std::thread;
use std::time::Duration;
use wsn_light_core::{
    FrameCodec, LightBridge, LightConfig, LinkConfig, MemorySink, MockTransport, SensorFrame,
    SensorRegistry, SharedTransport,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Addresses [19, 20], 1 s window at 10 fps, sensor range 0..100, auto-fall 0.5 s
fn scenario_config() -> LightConfig {
    LightConfig::new()
        .with_addresses(vec![19, 20])
        .with_timing(1, 0.5)
        .with_frame_rate(10)
        .with_sensor_range(0, 100)
        .with_max_output(255)
}

fn feed_wire(registry: &mut SensorRegistry, codec: &mut FrameCodec, wire: &[u8]) {
    for frame in codec.push_slice(wire) {
        registry.recv_frame(&frame);
    }
}

#[test]
fn test_single_reading_holds_then_falls() {
    init_logging();
    let config = scenario_config();
    let mut registry = SensorRegistry::new(&config).unwrap();
    let mut codec = FrameCodec::new();

    feed_wire(&mut registry, &mut codec, b"/19,50\\");

    let mut outputs = Vec::new();
    for _ in 0..200 {
        let vector = registry.compute_all();
        assert_eq!(vector.get(1), Some(0), "address 20 never reported");
        outputs.push(vector.get(0).unwrap());
    }

    assert_eq!(outputs[0], 13);
    // Held through the auto-fall threshold
    for tick in 1..=config.auto_fall_ticks() as usize {
        assert_eq!(outputs[tick], 13, "tick {}", tick + 1);
    }
    for pair in outputs.windows(2) {
        assert!(pair[1] <= pair[0], "output rose: {:?}", pair);
    }
    // The reading itself stays in the window until nine decay samples
    // displace it, so the first visible fall comes at tick 16
    let first_fall = outputs.iter().position(|&v| v < 13).unwrap();
    assert_eq!(first_fall, 15);
    assert_eq!(outputs[15], 3);
    assert_eq!(*outputs.last().unwrap(), 0);
}

#[test]
fn test_full_window() {
    init_logging();
    let config = scenario_config();
    let mut registry = SensorRegistry::new(&config).unwrap();
    let mut codec = FrameCodec::new();

    let wire: Vec<u8> = (0..config.window_len())
        .flat_map(|_| SensorFrame::new(19, 50).to_wire())
        .collect();
    feed_wire(&mut registry, &mut codec, &wire);

    assert_eq!(registry.compute_all().get(0), Some(128));
}

#[test]
fn test_unknown_address_leaves_output_alone() {
    init_logging();
    let mut registry = SensorRegistry::new(&scenario_config()).unwrap();
    let mut codec = FrameCodec::new();

    feed_wire(&mut registry, &mut codec, b"/20,40\\");
    let before = registry.compute_all().clone();

    feed_wire(&mut registry, &mut codec, b"/99,100\\");
    assert_eq!(registry.output(), &before);
    assert_eq!(registry.unknown_frames(), 1);
}

#[test]
fn test_noisy_line() {
    init_logging();
    let mut registry = SensorRegistry::new(&scenario_config()).unwrap();
    let mut codec = FrameCodec::new();

    // Truncated frame, garbage payload, then a clean reading
    feed_wire(&mut registry, &mut codec, b"xx/19,12/20,abc\\/19,50\\");

    let stats = codec.stats();
    assert_eq!(stats.frames, 1);
    assert_eq!(stats.conflicts, 1);
    assert_eq!(stats.corrupted, 1);
    assert_eq!(registry.compute_all().get(0), Some(13));
}

#[test]
fn test_bridge_lights_up_from_wire() {
    init_logging();
    let mut link = LinkConfig::default().with_timing(1, 20);
    link.read_timeout_ms = 5;
    let config = scenario_config().with_frame_rate(20).with_link(link);

    let mock = MockTransport::modem().with_read_delay(Duration::from_millis(2));
    let sink = MemorySink::new();
    let bridge = LightBridge::new(config, SharedTransport::new(mock.clone()), sink.clone());
    let stop = bridge.stop_signal();
    let handle = thread::spawn(move || bridge.run());

    // Wait until the modem has been configured before sending readings
    let mut waited = 0;
    while !mock.written_text().iter().any(|w| w == "ATCN\r") && waited < 200 {
        thread::sleep(Duration::from_millis(10));
        waited += 1;
    }
    mock.inject_read(b"/19,100\\/99,5\\");
    thread::sleep(Duration::from_millis(300));
    stop.request();

    let report = handle.join().unwrap().unwrap();
    assert_eq!(report.ingest.frames, 2);
    assert_eq!(report.unknown_frames, 1);

    let frames = sink.frames();
    assert!(frames.first().unwrap().iter().all(|&v| v == 0));
    assert!(frames.iter().any(|f| f[0] > 0), "address 19 never lit up");
    assert!(frames.iter().all(|f| f[1] == 0));
    assert!(frames.last().unwrap().iter().all(|&v| v == 0));

    let written = mock.written_text();
    assert_eq!(
        &written[..6],
        &["+++", "ATID1111\r", "ATCH0C\r", "ATMY3210\r", "ATBD3\r", "ATCN\r"]
    );
    assert!(written.iter().any(|w| w == "ATRE\r"));
    assert!(mock.is_closed());
}
