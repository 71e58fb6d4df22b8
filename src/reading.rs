use std::fmt;

use crate::config::CalibrationReference;
use crate::register::to_physical;

#[derive(Debug, Clone, Copy, PartialEq)]
/// One instantaneous sample
/// Current in A, Voltage in V
pub struct Reading {
    pub current: f64,
    pub voltage: f64,
}

impl Reading {
    pub fn new(current: f64, voltage: f64) -> Self {
        Reading { current, voltage }
    }

    /// Scales a pair of raw RMS registers with the calibration references
    pub fn from_registers(current: u32, voltage: u32, calibration: &CalibrationReference) -> Self {
        Reading {
            current: to_physical(current, calibration.current_reference),
            voltage: to_physical(voltage, calibration.voltage_reference),
        }
    }

    /// Real power in W
    pub fn power(&self) -> f64 {
        self.current * self.voltage
    }

    /// The flat `voltage,current,power` line written to the results file
    pub fn to_record(&self) -> String {
        format!(
            "{:.8},{:.8},{:.8}",
            self.voltage,
            self.current,
            self.power()
        )
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cirrus I = {:.8}, V = {:.8}, P = {:.8}",
            self.current,
            self.voltage,
            self.power()
        )
    }
}
