use crate::error::PloadError;
use crate::response::Field;

/// 2^24, one past the largest value a 24-bit register can hold
pub const FULL_SCALE: f64 = 0x100_0000 as f64;

/// Largest raw register value
pub const MAX_REGISTER: u32 = 0xFF_FFFF;

/// Normalized RMS value the chip reports when the measured quantity equals
/// the calibration reference (`0x999999`)
pub const CALIBRATION_POINT: f64 = 0.6;

/// Converts a raw RMS register to a fraction of full scale.
///
/// - `0xFFFFFF` is just under 1.0
/// - `0x999999` is the 0.6 calibration point
/// - `0x5C28F6` is half rms, around 0.36
pub fn to_normalized(register: u32) -> f64 {
    register as f64 / FULL_SCALE
}

/// Converts a raw RMS register to physical units, given the physical value
/// the chip was calibrated against (240 V, 15 A, ...)
pub fn to_physical(register: u32, reference: f64) -> f64 {
    to_normalized(register) * reference / CALIBRATION_POINT
}

/// Parses a register printed as ASCII hex, as in `Raw IRMS: 00999999`.
///
/// The value must fit in 24 bits.
pub fn parse_register(field: Field, hex: &str) -> Result<u32, PloadError> {
    let invalid = || PloadError::InvalidRegisterEncoding {
        field,
        value: hex.to_string(),
    };

    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let value = u32::from_str_radix(hex, 16).map_err(|_| invalid())?;
    if value > MAX_REGISTER {
        return Err(invalid());
    }
    Ok(value)
}
