//! A private geckodriver process for one harness run.

use crate::wait::poll_until;
use crate::{Error, Result};
use log::{debug, info};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(200);

/// geckodriver child process, killed on drop
pub struct DriverProcess {
    child: Child,
    addr: SocketAddr,
}

impl DriverProcess {
    /// Start `binary` on a free local port and wait until it accepts
    /// connections.
    pub fn spawn(binary: &Path, timeout: Duration, poll_interval: Duration) -> Result<Self> {
        let port = free_port()?;
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

        let child = Command::new(binary)
            .arg("--host")
            .arg(Ipv4Addr::LOCALHOST.to_string())
            .arg("--port")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::LaunchError(format!("Failed to start {}: {}", binary.display(), e)))?;

        let mut process = Self { child, addr };
        poll_until("geckodriver to accept connections", timeout, poll_interval, || {
            if let Some(status) = process.child.try_wait()? {
                return Err(Error::LaunchError(format!("geckodriver exited early with {}", status)));
            }
            Ok(TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).is_ok())
        })?;

        info!("geckodriver listening on {}", process.url());
        Ok(process)
    }

    /// WebDriver endpoint of this process
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("geckodriver already gone: {}", e);
        }
        let _ = self.child.wait();
    }
}

fn free_port() -> Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .map_err(|e| Error::LaunchError(format!("No free port for geckodriver: {}", e)))?;
    Ok(listener.local_addr()?.port())
}
