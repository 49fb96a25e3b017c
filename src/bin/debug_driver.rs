//! Stand-in driver process. Answers the tracker's IPC requests on the
//! configured pipe so the tracker can run without a VR runtime.

use anyhow::Result;
use fiducial_tracker::config::Config;
use fiducial_tracker::driver::{DebugDriver, SemVer, DRIVER_VERSION};
use tracing::info;

const CONFIG_PATH: &str = "config.toml";

#[cfg(unix)]
mod server {
    use super::*;
    use anyhow::Context;
    use fiducial_tracker::driver::read_message;
    use std::io::Write;
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::Path;
    use std::time::Duration;
    use tracing::warn;

    pub fn bind(path: &Path) -> Result<UnixListener> {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
        }
        UnixListener::bind(path).with_context(|| format!("Failed to bind {}", path.display()))
    }

    /// Answer one request on an accepted connection.
    pub fn serve_connection(driver: &mut DebugDriver, mut stream: UnixStream) -> Result<()> {
        stream.set_read_timeout(Some(Duration::from_secs(2)))?;
        let request = read_message(&mut stream)?;
        let reply = driver.handle(request.trim());
        info!(request = request.trim(), reply = reply.as_str(), "handled");
        stream.write_all(reply.as_bytes())?;
        Ok(())
    }

    pub fn run(listener: UnixListener, driver: &mut DebugDriver) -> Result<()> {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    if let Err(e) = serve_connection(driver, stream) {
                        warn!("request failed: {:#}", e);
                    }
                }
                Err(e) => warn!("accept failed: {}", e),
            }
        }
        Ok(())
    }
}

fn driver_version(config: &Config) -> SemVer {
    config
        .driver
        .expected_version
        .as_deref()
        .and_then(SemVer::parse)
        .unwrap_or(DRIVER_VERSION)
}

#[cfg(unix)]
fn main() -> Result<()> {
    use fiducial_tracker::driver::ipc::UnixSocketClient;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::load_or_default(CONFIG_PATH);
    let path = UnixSocketClient::path_for(&config.driver.pipe_name);
    let mut driver = DebugDriver::new(driver_version(&config));

    let listener = server::bind(&path)?;
    info!("Debug driver {} listening on {}", driver_version(&config), path.display());
    server::run(listener, &mut driver)
}

#[cfg(not(unix))]
fn main() -> Result<()> {
    anyhow::bail!("the debug driver only serves Unix domain sockets")
}
