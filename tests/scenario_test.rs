//! End-to-end tests exercising the registry/instance/FIFO contract
//! working together.

use media_processors::fifo::queue::Wait;
use media_processors::frame::{Frame, PlaneInput, SampleFormat, TIMESTAMP_UNSET};
use media_processors::processors::bypass;
use media_processors::registry::{ProcessorRegistry, RegistryConfig};
use media_processors::Status;
use pretty_assertions::assert_eq;
use std::time::Duration;

fn ramp_plane(width: u32, height: u32) -> Vec<u8> {
    let mut rows = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            rows.push((x + width * y) as u8);
        }
    }
    rows
}

/// Registering a name after unregistering it succeeds again.
#[test]
fn register_then_unregister_then_reregister_succeeds() {
    let registry = ProcessorRegistry::open_registry(RegistryConfig::default());

    registry.register_type(bypass::descriptor("bypass_processor")).unwrap();
    registry.unregister_type("bypass_processor").unwrap();
    registry
        .register_type(bypass::descriptor("bypass_processor"))
        .expect("re-registering the same name after unregister must succeed");
}

/// Posting an instance then deleting it makes further lookups fail.
#[test]
fn post_then_delete_then_get_not_found() {
    let registry = ProcessorRegistry::open_registry(RegistryConfig::default());
    registry.register_type(bypass::descriptor("bypass_processor")).unwrap();

    let id = registry.post("bypass_processor", "setting1=100").unwrap();
    assert_eq!(id, 0, "first assignment must be id 0");

    registry.delete(id).unwrap();

    let err = registry.id_get(id).unwrap_err();
    assert!(matches!(err, Status::NotFound(_)));
}

fn setting1_of(envelope: &media_processors::SettingsTree) -> i64 {
    match envelope.get("settings").unwrap() {
        media_processors::Value::Object(map) => map.get("setting1").unwrap().as_i64().unwrap(),
        other => panic!("expected a settings object, got {other:?}"),
    }
}

/// A PUT of new settings is reflected by a subsequent GET.
#[test]
fn settings_round_trip_through_put_and_get() {
    let registry = ProcessorRegistry::open_registry(RegistryConfig::default());
    registry.register_type(bypass::descriptor("bypass_processor")).unwrap();

    let id = registry.post("bypass_processor", "setting1=100").unwrap();
    assert_eq!(setting1_of(&registry.id_get(id).unwrap()), 100);

    registry.id_put(id, "setting1=200").unwrap();
    assert_eq!(setting1_of(&registry.id_get(id).unwrap()), 200);
}

/// Swapping an instance's `proc_name` carries its settings across.
#[test]
fn proc_name_swap_preserves_settings() {
    let registry = ProcessorRegistry::open_registry(RegistryConfig::default());
    registry.register_type(bypass::descriptor("bypass_processor")).unwrap();
    registry.register_type(bypass::descriptor("bypass_processor2")).unwrap();

    let id = registry.post("bypass_processor", "setting1=200").unwrap();
    registry.id_put(id, "proc_name=bypass_processor2").unwrap();

    assert_eq!(setting1_of(&registry.id_get(id).unwrap()), 200);
}

/// A frame pulled back out has its plane bytes preserved but its
/// format and timestamps reset.
#[test]
fn frame_bypass_preserves_plane_bytes_but_resets_metadata() {
    let registry = ProcessorRegistry::open_registry(
        RegistryConfig::builder()
            .default_fifo_sizes(media_processors::FifoSizes { input_slots: 2, output_slots: 2 })
            .build(),
    );
    registry.register_type(bypass::descriptor("bypass_processor")).unwrap();
    let id = registry.post("bypass_processor", "").unwrap();

    let y = ramp_plane(8, 4);
    let u = ramp_plane(4, 2);
    let v = ramp_plane(4, 2);

    let make_frame = || {
        Frame::new(
            SampleFormat::PlanarYuv420,
            0,
            TIMESTAMP_UNSET,
            TIMESTAMP_UNSET,
            0,
            &[
                PlaneInput { width: 8, height: 4, stride: 8, rows: &y },
                PlaneInput { width: 4, height: 2, stride: 4, rows: &u },
                PlaneInput { width: 4, height: 2, stride: 4, rows: &v },
            ],
        )
        .unwrap()
    };

    registry.id_send_frame(id, make_frame()).unwrap();
    registry.id_send_frame(id, make_frame()).unwrap();

    for _ in 0..2 {
        let out = registry.id_recv_frame(id, Wait::Timeout(Duration::from_secs(2))).unwrap();
        assert_eq!(out.format(), SampleFormat::Undefined);
        assert_eq!(out.pts(), TIMESTAMP_UNSET);
        assert_eq!(out.dts(), TIMESTAMP_UNSET);
        assert_eq!(out.plane_bytes(0).unwrap(), &y[..]);
        assert_eq!(out.plane_bytes(1).unwrap(), &u[..]);
        assert_eq!(out.plane_bytes(2).unwrap(), &v[..]);
    }
}

/// Runs "parent" (creator) and "child" (attacher) roles within one
/// test process via `shm_exec_open` against the creator's segment
/// name, since spawning an actual child process is out of scope for
/// an integration test; the attach path exercises the same
/// position-independent offset recomputation a real second process
/// would perform.
#[cfg(target_os = "linux")]
#[test]
#[serial_test::serial]
fn shared_fifo_round_trips_across_two_handles_to_one_segment() {
    use media_processors::fifo::SharedFifo;

    let name = format!("/mp-shared-fifo-test-{}", std::process::id());
    let parent = SharedFifo::shm_open(&name, 4, 16).unwrap();
    let child = SharedFifo::shm_exec_open(&name).unwrap();

    let messages: [&[u8]; 4] = [
        b"short",
        b"another message",
        b"0123456789abcdef", // exactly 16 bytes, the maximum length
        b"last one!",
    ];

    for m in &messages {
        parent.push(m).unwrap();
    }
    for expected in &messages {
        assert_eq!(child.pull(None).unwrap(), *expected);
    }

    let err = parent.push(&[0u8; 17]).unwrap_err();
    assert!(matches!(err, Status::InvalidArgument(_)));

    parent.close();
}
