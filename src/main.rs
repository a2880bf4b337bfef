/*!
 * MediaProcessors - Demo Entry Point
 *
 * Brings up a registry, registers the bypass processor family, posts
 * an instance, and round-trips one frame through it. Exists to give
 * the crate a runnable artifact; real deployments are expected to
 * embed `registry::ProcessorRegistry` directly rather than run this
 * binary.
 */

use log::info;
use media_processors::fifo::queue::Wait;
use media_processors::frame::{Frame, PlaneInput, SampleFormat};
use media_processors::processors::bypass;
use media_processors::registry::{ProcessorRegistry, RegistryConfig};
use std::time::Duration;

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("MediaProcessors starting...");

    let registry = ProcessorRegistry::open_registry(RegistryConfig::default());

    info!("Registering bypass_processor...");
    registry
        .register_type(bypass::descriptor("bypass_processor"))
        .expect("registering bypass_processor should not fail on a fresh registry");

    info!("Posting a bypass_processor instance...");
    let id = registry
        .post("bypass_processor", "setting1=100")
        .expect("post should succeed for a registered type");

    let rows: Vec<u8> = (0..16u8).collect();
    let frame = Frame::new(
        SampleFormat::PlanarYuv420,
        48_000,
        0,
        0,
        0,
        &[PlaneInput { width: 16, height: 1, stride: 16, rows: &rows }],
    )
    .expect("well-formed single-plane frame");

    info!("Sending one frame into instance {id}...");
    registry.id_send_frame(id, frame).expect("send_frame should succeed");

    let out = registry
        .id_recv_frame(id, Wait::Timeout(Duration::from_secs(2)))
        .expect("recv_frame should succeed within the timeout");

    info!(
        "Received frame back: format={:?} pts={} dts={} bytes={}",
        out.format(),
        out.pts(),
        out.dts(),
        out.byte_len()
    );

    registry.delete(id).expect("delete should succeed for a live instance");
    info!("MediaProcessors demo complete");
}
