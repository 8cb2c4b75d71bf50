//! Fault injection for simulated boards.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{HatError, Result};

/// A scripted failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultScenario {
    /// Fail `operation` after it has succeeded `count` times
    FailAfterN {
        /// Operation name, e.g. `"scan_data"`
        operation: &'static str,
        /// Successful calls before failing
        count: u32,
    },
    /// `operation` always times out
    Timeout {
        /// Operation name
        operation: &'static str,
    },
    /// The first call of any operation loses the board; every later call
    /// fails too
    CommunicationLoss,
    /// Scan starts are accepted but the scan never begins
    ScanNeverRuns,
}

#[derive(Debug, Default)]
struct FaultState {
    counts: HashMap<&'static str, u32>,
    communication_lost: bool,
}

/// Set of scenarios applied to one simulated board.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    scenarios: Arc<Vec<FaultScenario>>,
    state: Arc<Mutex<FaultState>>,
}

impl FaultConfig {
    /// No faults.
    pub fn none() -> Self {
        Self::default()
    }

    /// A single scenario.
    pub fn scenario(scenario: FaultScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scenarios, checked in order.
    pub fn scenarios(scenarios: Vec<FaultScenario>) -> Self {
        Self {
            scenarios: Arc::new(scenarios),
            state: Arc::default(),
        }
    }

    /// Whether `scenario` is configured.
    pub fn has(&self, scenario: &FaultScenario) -> bool {
        self.scenarios.contains(scenario)
    }

    /// Fail `operation` if a scenario says so.
    pub fn check(&self, operation: &'static str) -> Result<()> {
        let mut state = self.state.lock();
        if state.communication_lost {
            return Err(HatError::undefined("simulated communication loss"));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                FaultScenario::FailAfterN { operation: op, count } if *op == operation => {
                    let seen = state.counts.entry(operation).or_insert(0);
                    *seen += 1;
                    if *seen > *count {
                        return Err(HatError::undefined(format!(
                            "injected failure of '{operation}' after {count} calls"
                        )));
                    }
                }
                FaultScenario::Timeout { operation: op } if *op == operation => {
                    return Err(HatError::timeout(format!("'{operation}' timed out")));
                }
                FaultScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(HatError::undefined("simulated communication loss"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Clear counters and lost communication.
    pub fn reset(&self) {
        *self.state.lock() = FaultState::default();
    }
}
