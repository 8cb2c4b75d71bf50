//! Simulated MCC 152 I/O expander and DAC.

use parking_lot::Mutex;

use super::faults::FaultConfig;
use crate::error::{HatError, Result};
use crate::mcc152::DioRegister;

#[derive(Debug)]
struct State {
    registers: [u8; 256],
    pointer: u8,
    inputs: u8,
    interrupt_status: u8,
    command_writes: u32,
    dac_outputs: [u16; 2],
    dac_pending: [u16; 2],
    internal_reference: bool,
}

impl State {
    /// What the input register reads: driven outputs read back, inputs
    /// follow the pins, both through the polarity inversion.
    fn input_port(&self) -> u8 {
        let direction = self.registers[DioRegister::Config as usize];
        let output = self.registers[DioRegister::Output as usize];
        let polarity = self.registers[DioRegister::Polarity as usize];
        ((self.inputs & direction) | (output & !direction)) ^ polarity
    }

    fn read(&mut self, register: u8) -> u8 {
        match DioRegister::from_byte(register) {
            Some(DioRegister::Input) => {
                self.interrupt_status = 0;
                self.input_port()
            }
            Some(DioRegister::InterruptStatus) => std::mem::take(&mut self.interrupt_status),
            _ => self.registers[usize::from(register)],
        }
    }
}

/// One simulated MCC 152.
#[derive(Debug)]
pub struct SimMcc152 {
    state: Mutex<State>,
    faults: Mutex<FaultConfig>,
}

impl Default for SimMcc152 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMcc152 {
    /// Board in its power-on state, all pins pulled high.
    pub fn new() -> Self {
        let mut registers = [0u8; 256];
        for register in [
            DioRegister::Output,
            DioRegister::Config,
            DioRegister::PullEnable,
            DioRegister::PullSelect,
            DioRegister::InterruptMask,
        ] {
            registers[register as usize] = 0xFF;
        }
        Self {
            state: Mutex::new(State {
                registers,
                pointer: 0,
                inputs: 0xFF,
                interrupt_status: 0,
                command_writes: 0,
                dac_outputs: [0; 2],
                dac_pending: [0; 2],
                internal_reference: false,
            }),
            faults: Mutex::new(FaultConfig::none()),
        }
    }

    /// Replace the fault scenarios. Expander transfers check `"dio"`, DAC
    /// writes check `"dac"`.
    pub fn set_faults(&self, faults: FaultConfig) {
        *self.faults.lock() = faults;
    }

    /// Drive the external pin levels. Unmasked input changes raise
    /// interrupt status bits.
    pub fn set_inputs(&self, levels: u8) {
        let mut state = self.state.lock();
        let direction = state.registers[DioRegister::Config as usize];
        let mask = state.registers[DioRegister::InterruptMask as usize];
        let changed = (state.inputs ^ levels) & direction & !mask;
        state.inputs = levels;
        state.interrupt_status |= changed;
    }

    /// Raw register contents.
    pub fn register(&self, register: DioRegister) -> u8 {
        self.state.lock().registers[register as usize]
    }

    /// Transfers that carried a command byte.
    pub fn command_writes(&self) -> u32 {
        self.state.lock().command_writes
    }

    /// DAC output code of `channel`.
    pub fn dac_output(&self, channel: usize) -> u16 {
        self.state.lock().dac_outputs.get(channel).copied().unwrap_or(0)
    }

    /// Whether the DAC was switched to its internal reference.
    pub fn internal_reference(&self) -> bool {
        self.state.lock().internal_reference
    }

    pub(crate) fn handle_i2c(&self, tx: &[u8], rx_len: usize) -> Result<Vec<u8>> {
        self.faults.lock().clone().check("dio")?;
        let mut state = self.state.lock();
        match tx {
            [] => {}
            [command] => {
                state.command_writes += 1;
                state.pointer = *command;
            }
            [command, value] => {
                state.command_writes += 1;
                state.pointer = *command;
                if DioRegister::from_byte(*command).is_none() {
                    return Err(HatError::undefined(format!(
                        "simulated MCC 152: write to unknown register {command:#04x}"
                    )));
                }
                state.registers[usize::from(*command)] = *value;
            }
            other => {
                return Err(HatError::undefined(format!(
                    "simulated MCC 152: unexpected I2C frame {other:02x?}"
                )))
            }
        }
        let pointer = state.pointer;
        Ok((0..rx_len).map(|_| state.read(pointer)).collect())
    }

    pub(crate) fn handle_dac(&self, tx: &[u8]) -> Result<Vec<u8>> {
        self.faults.lock().clone().check("dac")?;
        let [command, hi, lo] = tx else {
            return Err(HatError::undefined(format!(
                "simulated MCC 152 DAC: unexpected frame {tx:02x?}"
            )));
        };
        let code = u16::from_be_bytes([*hi, *lo]) >> 4;
        let channel = usize::from(command & 0x07).min(1);
        let mut state = self.state.lock();
        match command >> 3 {
            0x00 => state.dac_pending[channel] = code,
            0x02 => {
                state.dac_pending[channel] = code;
                state.dac_outputs = state.dac_pending;
            }
            0x03 => {
                state.dac_pending[channel] = code;
                state.dac_outputs[channel] = code;
            }
            0x07 => state.internal_reference = *lo & 0x01 != 0,
            other => {
                return Err(HatError::undefined(format!(
                    "simulated MCC 152 DAC: unsupported command {other}"
                )))
            }
        }
        Ok(vec![0; tx.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_port_reads_back_outputs() {
        let sim = SimMcc152::new();
        sim.set_inputs(0b1010_1010);
        // DIO0 as output driving low
        sim.handle_i2c(&[DioRegister::Output as u8, 0xFE], 0).unwrap();
        sim.handle_i2c(&[DioRegister::Config as u8, 0xFE], 0).unwrap();
        let rx = sim.handle_i2c(&[DioRegister::Input as u8], 1).unwrap();
        assert_eq!(rx, vec![0b1010_1010]);
    }

    #[test]
    fn test_pointer_read_skips_command() {
        let sim = SimMcc152::new();
        sim.handle_i2c(&[DioRegister::PullSelect as u8], 1).unwrap();
        let rx = sim.handle_i2c(&[], 1).unwrap();
        assert_eq!(rx, vec![0xFF]);
        assert_eq!(sim.command_writes(), 1);
    }

    #[test]
    fn test_dac_simultaneous_update() {
        let sim = SimMcc152::new();
        sim.handle_dac(&[0x00, 0x10, 0x00]).unwrap();
        assert_eq!(sim.dac_output(0), 0);
        sim.handle_dac(&[0x11, 0x20, 0x00]).unwrap();
        assert_eq!(sim.dac_output(0), 0x100);
        assert_eq!(sim.dac_output(1), 0x200);
    }
}
