use fiducial_tracker::camera::{address_to_index, OpenCvCamera};
use fiducial_tracker::config::{CameraConfig, Config};
use opencv::core::Vector;
use opencv::imgcodecs;
use opencv::prelude::*;
use std::thread;
use std::time::Duration;

const CONFIG_PATH: &str = "config.toml";
const MAX_INDEX: i32 = 5;

/// Open a camera with the configured settings and print what it delivers.
fn probe(camera_config: &CameraConfig, label: &str) -> bool {
    print!("{}: ", label);
    let mut camera = match OpenCvCamera::open(camera_config) {
        Ok(c) => c,
        Err(e) => {
            println!("not available ({:#})", e);
            return false;
        }
    };
    let (w, h) = camera.resolution();
    println!("prop: {}x{}", w, h);

    // exposure settles over the first frames
    thread::sleep(Duration::from_millis(500));
    match camera.read_frame() {
        Ok(frame) => {
            println!(
                "       frame: {}x{} ch={} depth={} type={}",
                frame.cols(),
                frame.rows(),
                frame.channels(),
                frame.depth(),
                frame.typ()
            );
            let filename = format!("probe_{}.png", label.replace([' ', '/', ':'], "_"));
            match imgcodecs::imwrite(&filename, &frame, &Vector::new()) {
                Ok(_) => println!("       saved: {}", filename),
                Err(e) => println!("       save err: {}", e),
            }
        }
        Err(e) => println!("       frame err: {:#}", e),
    }
    println!();
    true
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let config = Config::load_or_default(CONFIG_PATH);

    println!("=== Camera probe ===");
    println!();

    // URL / file addresses are probed as configured
    if address_to_index(&config.camera.address).is_none() {
        probe(&config.camera, &config.camera.address);
        return;
    }

    for index in 0..MAX_INDEX {
        let mut camera_config = config.camera.clone();
        camera_config.address = index.to_string();
        if !probe(&camera_config, &format!("index {}", index)) {
            break;
        }
    }
}
