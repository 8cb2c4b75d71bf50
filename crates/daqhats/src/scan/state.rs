//! Acquisition lifecycle.

use std::fmt;

/// Lifecycle of one scan.
///
/// ```text
/// Idle ──start──▶ Starting ──device running──▶ Running
///                    │                           │ stop / count reached / device ended
///                    │ failure                   ▼
///                    └──────────────────────▶ Stopping ──drained──▶ Terminated
/// ```
///
/// A transport failure in any active state jumps straight to `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScanState {
    /// No acquisition thread
    #[default]
    Idle,
    /// Thread spawned, waiting for the device to report running
    Starting,
    /// Samples are flowing
    Running,
    /// Stop requested or count reached, draining the device
    Stopping,
    /// Thread finished; buffered samples remain readable until cleanup
    Terminated,
}

impl ScanState {
    /// Whether the acquisition thread is still producing.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}
