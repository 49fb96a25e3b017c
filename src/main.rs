use anyhow::Result;
use fiducial_tracker::config::{Config, ManualCalibConfig};
use fiducial_tracker::session::Tracker;
use opencv::{core::Vector, imgcodecs};
use std::io::{self, Write};
use tracing::info;

const CONFIG_PATH: &str = "config.toml";
const PREVIEW_PATH: &str = "preview.png";

fn print_help() {
    println!("Commands:");
    println!("  camera            - start the camera");
    println!("  camera stop       - stop the camera (and tracking)");
    println!("  start / stop      - start or stop tracking");
    println!("  calib             - toggle playspace calibration with the controller");
    println!("  pos x y z         - set calibration position offset (cm)");
    println!("  angle p y r       - set calibration angle offset (deg)");
    println!("  scale s           - set calibration scale (%)");
    println!("  preview           - toggle the preview image");
    println!("  snap              - save the latest preview to {}", PREVIEW_PATH);
    println!("  status            - show session status");
    println!("  save              - write the current calibration to {}", CONFIG_PATH);
    println!("  q                 - quit");
    println!();
}

fn parse3(parts: &[&str]) -> Result<[f64; 3]> {
    Ok([parts[0].parse()?, parts[1].parse()?, parts[2].parse()?])
}

fn print_status(tracker: &Tracker) {
    let status = tracker.status();
    let calib = ManualCalibConfig::from_real(&tracker.manual_calib());
    println!("camera:      {}", if status.camera_running { "running" } else { "stopped" });
    println!("tracking:    {}", if status.tracking { "running" } else { "stopped" });
    println!("driver:      {}", if status.driver_connected { "connected" } else { "not connected" });
    println!("calibration: {}", if tracker.is_calibration_visible() { "open" } else { "closed" });
    println!(
        "  pos {:.1} {:.1} {:.1} cm, angle {:.1} {:.1} {:.1} deg, scale {:.1} %",
        calib.pos_offset[0],
        calib.pos_offset[1],
        calib.pos_offset[2],
        calib.angle_offset[0],
        calib.angle_offset[1],
        calib.angle_offset[2],
        calib.scale
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fiducial_tracker=info")),
        )
        .init();
    info!("Fiducial Tracker ({})", env!("GIT_VERSION"));

    let config = Config::load_or_default(CONFIG_PATH);

    println!("=== Fiducial Tracker ===");
    println!("driver pipe: {}", config.driver.pipe_name);
    println!("camera:      {}", config.camera.address);
    println!();
    print_help();

    let mut tracker = Tracker::new(config);
    let mut preview_enabled = false;

    loop {
        if let Some(err) = tracker.take_last_error() {
            println!("error: {}", err);
        }

        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();

        if parts.is_empty() {
            continue;
        }

        let result: Result<()> = match parts.as_slice() {
            ["camera"] => tracker.start_camera().map(|_| println!("camera started")),
            ["camera", "stop"] => {
                tracker.stop_camera();
                println!("camera stopped");
                Ok(())
            }
            ["start"] => tracker.start().map(|_| println!("tracking started")),
            ["stop"] => {
                tracker.stop();
                println!("tracking stopped");
                Ok(())
            }
            ["calib"] => {
                let visible = !tracker.is_calibration_visible();
                tracker.set_calibration_visible(visible);
                println!("calibration {}", if visible { "open" } else { "closed" });
                Ok(())
            }
            ["pos", rest @ ..] if rest.len() == 3 => parse3(rest).map(|v| {
                let mut calib = ManualCalibConfig::from_real(&tracker.manual_calib());
                calib.pos_offset = v;
                tracker.set_manual_calib(calib.to_real());
            }),
            ["angle", rest @ ..] if rest.len() == 3 => parse3(rest).map(|v| {
                let mut calib = ManualCalibConfig::from_real(&tracker.manual_calib());
                calib.angle_offset = v;
                tracker.set_manual_calib(calib.to_real());
            }),
            ["scale", s] => s.parse::<f64>().map_err(Into::into).map(|s| {
                let mut calib = ManualCalibConfig::from_real(&tracker.manual_calib());
                calib.scale = s;
                tracker.set_manual_calib(calib.to_real());
            }),
            ["preview"] => {
                preview_enabled = !preview_enabled;
                tracker.set_preview_enabled(preview_enabled);
                println!("preview {}", if preview_enabled { "on" } else { "off" });
                Ok(())
            }
            ["snap"] => match tracker.take_preview() {
                Some(image) => imgcodecs::imwrite(PREVIEW_PATH, &image, &Vector::new())
                    .map(|_| println!("saved {}", PREVIEW_PATH))
                    .map_err(Into::into),
                None => {
                    println!("no preview yet (enable it with 'preview')");
                    Ok(())
                }
            },
            ["status"] => {
                print_status(&tracker);
                Ok(())
            }
            ["save"] => {
                let mut config = tracker.config().clone();
                config.manual_calib = ManualCalibConfig::from_real(&tracker.manual_calib());
                config.save(CONFIG_PATH).map(|_| println!("saved {}", CONFIG_PATH))
            }
            ["q"] => {
                println!("quitting");
                break;
            }
            _ => {
                println!("unknown command: {}", input.trim());
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("error: {:#}", e);
        }
    }

    tracker.stop_camera();
    Ok(())
}
