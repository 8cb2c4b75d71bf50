//! Shared HAT interrupt line.
//!
//! Boards pull a common GPIO line low to signal an interrupt (MCC 152 input
//! changes, for instance). The line is driven through the sysfs GPIO
//! interface and waited on with `poll(2)` on its `value` file.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::config::InterruptConfig;
use crate::error::{HatError, Result};

/// Idle between polls when the value file does not report edges.
const EDGE_FALLBACK: Duration = Duration::from_millis(1);

/// Longest single `poll(2)`; the level is re-read after each.
const POLL_SLICE_MS: i32 = 100;

/// The interrupt GPIO, exported and configured for falling edges.
#[derive(Debug)]
pub struct InterruptPin {
    pin: u32,
    dir: PathBuf,
}

fn write_attr(path: &Path, value: &str) -> Result<()> {
    fs::write(path, value)
        .map_err(|e| HatError::unavailable(format!("cannot write {}: {e}", path.display())))
}

fn parse_level(raw: &[u8]) -> Result<bool> {
    match raw.first() {
        Some(b'0') => Ok(false),
        Some(b'1') => Ok(true),
        _ => Err(HatError::undefined(format!(
            "unexpected GPIO value {:?}",
            String::from_utf8_lossy(raw)
        ))),
    }
}

impl InterruptPin {
    /// Export and configure the pin named in `config`.
    pub fn open(config: &InterruptConfig) -> Result<Self> {
        let dir = config.sysfs_root.join(format!("gpio{}", config.pin));
        if !dir.exists() {
            write_attr(&config.sysfs_root.join("export"), &config.pin.to_string())?;
            debug!(pin = config.pin, "Exported interrupt GPIO");
        }
        write_attr(&dir.join("direction"), "in")?;
        write_attr(&dir.join("edge"), "falling")?;
        Ok(Self {
            pin: config.pin,
            dir,
        })
    }

    /// GPIO number.
    pub fn pin(&self) -> u32 {
        self.pin
    }

    /// Whether any board is asserting the line (it is active low).
    pub fn state(&self) -> Result<bool> {
        let raw = fs::read(self.dir.join("value"))?;
        Ok(!parse_level(&raw)?)
    }

    /// Block until the line is asserted.
    ///
    /// `None` waits forever. Returns `false` if `timeout` elapsed first.
    pub fn wait_for_low(&self, timeout: Option<Duration>) -> Result<bool> {
        let mut file = File::open(self.dir.join("value"))?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut buf = [0u8; 8];

        loop {
            // reading clears the pending edge
            file.seek(SeekFrom::Start(0))?;
            let n = file.read(&mut buf)?;
            // an empty read races a writer; treat it as idle
            if n > 0 && !parse_level(&buf[..n])? {
                trace!(pin = self.pin, "Interrupt asserted");
                return Ok(true);
            }

            let wait_ms = match deadline {
                None => POLL_SLICE_MS,
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Ok(false);
                    }
                    i32::try_from(left.as_millis().max(1))
                        .unwrap_or(POLL_SLICE_MS)
                        .min(POLL_SLICE_MS)
                }
            };

            if !poll_edge(&file, wait_ms)? {
                // regular files never report POLLPRI
                thread::sleep(EDGE_FALLBACK);
            }
        }
    }
}

/// Wait for an edge event. Returns whether one was reported.
#[allow(unsafe_code)]
fn poll_edge(file: &File, timeout_ms: i32) -> Result<bool> {
    let mut fds = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLPRI | libc::POLLERR,
        revents: 0,
    };
    // SAFETY: `fds` is a single valid pollfd and `file` outlives the call.
    let rc = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            return Ok(false);
        }
        return Err(err.into());
    }
    Ok(rc > 0 && fds.revents & (libc::POLLPRI | libc::POLLERR) != 0)
}
