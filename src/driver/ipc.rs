//! Transport to the driver process.
//!
//! One request per connection: the client connects, writes the request,
//! closes its write half and reads the reply until the driver hangs up.

use std::io::{self, Read, Write};
use std::time::Duration;

/// Largest reply the driver sends.
pub const BUFFER_SIZE: usize = 1024;

pub trait IpcClient: Send {
    fn send_recv(&mut self, request: &str) -> io::Result<String>;
}

/// Read one message until the peer closes, capped at [`BUFFER_SIZE`].
pub fn read_message<R: Read>(reader: R) -> io::Result<String> {
    let mut buf = Vec::with_capacity(BUFFER_SIZE);
    reader.take(BUFFER_SIZE as u64).read_to_end(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(unix)]
pub use unix::UnixSocketClient;

#[cfg(unix)]
mod unix {
    use super::*;
    use std::net::Shutdown;
    use std::os::unix::net::UnixStream;
    use std::path::PathBuf;

    pub struct UnixSocketClient {
        path: PathBuf,
        timeout: Duration,
    }

    impl UnixSocketClient {
        pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
            Self {
                path: path.into(),
                timeout,
            }
        }

        /// Socket path for a pipe name, `/tmp/<name>`.
        pub fn path_for(pipe_name: &str) -> PathBuf {
            PathBuf::from("/tmp").join(pipe_name)
        }
    }

    impl IpcClient for UnixSocketClient {
        fn send_recv(&mut self, request: &str) -> io::Result<String> {
            let mut stream = UnixStream::connect(&self.path)?;
            stream.set_read_timeout(Some(self.timeout))?;
            stream.set_write_timeout(Some(self.timeout))?;
            stream.write_all(request.as_bytes())?;
            stream.shutdown(Shutdown::Write)?;
            read_message(&mut stream)
        }
    }
}

#[cfg(windows)]
pub use windows::NamedPipeClient;

#[cfg(windows)]
mod windows {
    use super::*;
    use std::fs::OpenOptions;
    use std::thread;
    use std::time::Instant;

    const ERROR_PIPE_BUSY: i32 = 231;

    pub struct NamedPipeClient {
        path: String,
        timeout: Duration,
    }

    impl NamedPipeClient {
        pub fn new(pipe_name: &str, timeout: Duration) -> Self {
            Self {
                path: format!(r"\\.\pipe\{}", pipe_name),
                timeout,
            }
        }
    }

    impl IpcClient for NamedPipeClient {
        fn send_recv(&mut self, request: &str) -> io::Result<String> {
            let start = Instant::now();
            let mut pipe = loop {
                match OpenOptions::new().read(true).write(true).open(&self.path) {
                    Ok(p) => break p,
                    Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                        if start.elapsed() >= self.timeout {
                            return Err(io::Error::new(io::ErrorKind::TimedOut, "pipe busy"));
                        }
                        thread::sleep(Duration::from_millis(10));
                    }
                    Err(e) => return Err(e),
                }
            };
            pipe.write_all(request.as_bytes())?;
            // message mode pipe: one read returns the whole reply
            let mut buf = [0u8; BUFFER_SIZE];
            let n = pipe.read(&mut buf)?;
            String::from_utf8(buf[..n].to_vec())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        }
    }
}

/// Client for the platform's default transport.
pub fn connect_default(pipe_name: &str, timeout: Duration) -> Box<dyn IpcClient> {
    #[cfg(unix)]
    {
        Box::new(UnixSocketClient::new(
            UnixSocketClient::path_for(pipe_name),
            timeout,
        ))
    }
    #[cfg(windows)]
    {
        Box::new(NamedPipeClient::new(pipe_name, timeout))
    }
}
