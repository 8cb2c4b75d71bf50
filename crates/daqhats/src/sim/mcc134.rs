//! Simulated MCC 134 converter and CJC sensor.

use parking_lot::Mutex;

use super::faults::FaultConfig;
use crate::error::{HatError, Result};
use crate::mcc134::{NUM_CHANNELS, OPEN_TC_CODE};

const PINS: [(u8, u8); NUM_CHANNELS] = [(0, 1), (4, 5), (6, 7), (2, 3)];

#[derive(Debug)]
struct State {
    codes: [i32; NUM_CHANNELS],
    open: [bool; NUM_CHANNELS],
    mux: Option<usize>,
    noisy: bool,
    noise_counter: u32,
    resets: u32,
    self_calibrations: u32,
    conversions: u32,
    cjc_temperature: f64,
    cjc_id: u8,
    cjc_configured: bool,
}

/// One simulated MCC 134.
#[derive(Debug)]
pub struct SimMcc134 {
    state: Mutex<State>,
    faults: Mutex<FaultConfig>,
}

impl Default for SimMcc134 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMcc134 {
    /// Board at 25 °C with shorted inputs.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                codes: [0; NUM_CHANNELS],
                open: [false; NUM_CHANNELS],
                mux: None,
                noisy: false,
                noise_counter: 0,
                resets: 0,
                self_calibrations: 0,
                conversions: 0,
                cjc_temperature: 25.0,
                cjc_id: 0xC3,
                cjc_configured: false,
            }),
            faults: Mutex::new(FaultConfig::none()),
        }
    }

    /// Replace the fault scenarios. CJC reads check `"cjc_read"`, ADC
    /// result reads check `"adc_read"`.
    pub fn set_faults(&self, faults: FaultConfig) {
        *self.faults.lock() = faults;
    }

    /// Signed 24-bit code the channel converts to.
    pub fn set_channel_code(&self, channel: usize, code: i32) {
        if let Some(slot) = self.state.lock().codes.get_mut(channel) {
            *slot = code;
        }
    }

    /// Disconnect or reconnect a thermocouple.
    pub fn set_open(&self, channel: usize, open: bool) {
        if let Some(slot) = self.state.lock().open.get_mut(channel) {
            *slot = open;
        }
    }

    /// Make every result read differ from the last.
    pub fn set_noisy(&self, noisy: bool) {
        self.state.lock().noisy = noisy;
    }

    /// Temperature the CJC sensor reports, °C.
    pub fn set_cjc_temperature(&self, celsius: f64) {
        self.state.lock().cjc_temperature = celsius;
    }

    /// Value the sensor ID register returns.
    pub fn set_cjc_id(&self, id: u8) {
        self.state.lock().cjc_id = id;
    }

    /// ADC resets seen.
    pub fn resets(&self) -> u32 {
        self.state.lock().resets
    }

    /// Self offset calibrations seen.
    pub fn self_calibrations(&self) -> u32 {
        self.state.lock().self_calibrations
    }

    /// Conversions started.
    pub fn conversions(&self) -> u32 {
        self.state.lock().conversions
    }

    /// Whether the CJC configuration register was written.
    pub fn cjc_configured(&self) -> bool {
        self.state.lock().cjc_configured
    }

    pub(crate) fn handle_adc(&self, tx: &[u8]) -> Result<Vec<u8>> {
        let mut rx = vec![0xFF; tx.len()];
        let mut state = self.state.lock();
        match tx {
            [0x06] => {
                state.resets += 1;
                state.mux = None;
            }
            [0x62] => state.self_calibrations += 1,
            // single-register MUX0 write starts a conversion
            [0x40, 0, mux] => {
                let pins = (mux >> 3, mux & 0x07);
                state.mux = PINS.iter().position(|&p| p == pins);
                state.conversions += 1;
            }
            [0x40, 3, ..] => {}
            [0x12, 0xFF, 0xFF, 0xFF] => {
                let faults = self.faults.lock().clone();
                drop(state);
                faults.check("adc_read")?;
                let mut state = self.state.lock();
                let code = match state.mux {
                    Some(ch) if state.open[ch] => OPEN_TC_CODE,
                    Some(ch) => state.codes[ch],
                    None => 0,
                };
                let code = if state.noisy {
                    state.noise_counter = state.noise_counter.wrapping_add(1);
                    code.wrapping_add(state.noise_counter as i32)
                } else {
                    code
                };
                let [_, b2, b1, b0] = (code as u32 & 0xFF_FFFF).to_be_bytes();
                rx[1] = b2;
                rx[2] = b1;
                rx[3] = b0;
            }
            other => {
                return Err(HatError::undefined(format!(
                    "simulated MCC 134 ADC: unexpected frame {other:02x?}"
                )))
            }
        }
        Ok(rx)
    }

    pub(crate) fn handle_cjc(&self, tx: &[u8]) -> Result<Vec<u8>> {
        let mut rx = vec![0; tx.len()];
        match tx {
            [0xFF, 0xFF, 0xFF, 0xFF] => {}
            // ID register read
            [0x58, _] => rx[1] = self.state.lock().cjc_id,
            // configuration write
            [0x08, _] => self.state.lock().cjc_configured = true,
            // temperature read
            [0x50, _, _] => {
                self.faults.lock().clone().check("cjc_read")?;
                let raw = (self.state.lock().cjc_temperature * 128.0).round() as i16;
                let [hi, lo] = raw.to_be_bytes();
                rx[1] = hi;
                rx[2] = lo;
            }
            other => {
                return Err(HatError::undefined(format!(
                    "simulated MCC 134 CJC: unexpected frame {other:02x?}"
                )))
            }
        }
        Ok(rx)
    }
}
