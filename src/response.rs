use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::PloadError;
use crate::register::parse_register;

static CURRENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Raw IRMS: ([0-9A-F]{8})\b").expect("Invalid IRMS regex"));

static VOLTAGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Raw VRMS: ([0-9A-F]{8})\b").expect("Invalid VRMS regex"));

/// Which of the two RMS registers a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Current,
    Voltage,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Current => f.write_str("current"),
            Field::Voltage => f.write_str("voltage"),
        }
    }
}

/// The two register fields found in one pload response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRegisterPair {
    pub current_hex: String,
    pub voltage_hex: String,
}

impl RawRegisterPair {
    /// Decodes both fields into raw register values, `(current, voltage)`
    pub fn decode(&self) -> Result<(u32, u32), PloadError> {
        let current = parse_register(Field::Current, &self.current_hex)?;
        let voltage = parse_register(Field::Voltage, &self.voltage_hex)?;
        Ok((current, voltage))
    }
}

/// Extracts the IRMS and VRMS fields from the text printed by `<chip>_pload`.
///
/// Both fields are searched for independently anywhere in `raw`, so banners,
/// command echo and ordering don't matter. Only the first match of each is
/// used.
pub fn parse(raw: &str) -> Result<RawRegisterPair, PloadError> {
    if raw.trim().is_empty() {
        return Err(PloadError::EmptyResponse);
    }

    let current_hex = capture(&CURRENT_PATTERN, Field::Current, raw)?;
    let voltage_hex = capture(&VOLTAGE_PATTERN, Field::Voltage, raw)?;

    Ok(RawRegisterPair {
        current_hex,
        voltage_hex,
    })
}

fn capture(pattern: &Regex, field: Field, raw: &str) -> Result<String, PloadError> {
    pattern
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| PloadError::MissingField {
            field,
            raw: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "cu cs5480_pload\r\n\
        CS5480 pload\r\n\
        Raw IRMS: 00999999\r\n\
        Raw VRMS: 005C28F6\r\n\
        Raw PAVG: 00000000\r\n\
        ember> ";

    #[test]
    fn test_parse_device_output() {
        let pair = parse(SAMPLE).unwrap();
        assert_eq!(pair.current_hex, "00999999");
        assert_eq!(pair.voltage_hex, "005C28F6");
        assert_eq!(pair.decode().unwrap(), (0x999999, 0x5C28F6));
    }

    #[test]
    fn test_parse_any_order_with_noise() {
        let expected = RawRegisterPair {
            current_hex: "DEADBEEF".to_string(),
            voltage_hex: "CAFEBABE".to_string(),
        };

        let forward = "junk\nRaw IRMS: DEADBEEF\nmore junk Raw VRMS: CAFEBABE tail";
        let reverse = "Raw VRMS: CAFEBABE;;;   Raw IRMS: DEADBEEF\n\n> ";
        assert_eq!(parse(forward).unwrap(), expected);
        assert_eq!(parse(reverse).unwrap(), expected);
    }

    #[test]
    fn test_first_match_wins() {
        let raw = "Raw IRMS: 00000001 Raw IRMS: 00000002 Raw VRMS: 00000003 Raw VRMS: 00000004";
        let pair = parse(raw).unwrap();
        assert_eq!(pair.current_hex, "00000001");
        assert_eq!(pair.voltage_hex, "00000003");
    }

    #[test]
    fn test_empty_response() {
        assert!(matches!(parse(""), Err(PloadError::EmptyResponse)));
        assert!(matches!(parse(" \r\n\t"), Err(PloadError::EmptyResponse)));
    }

    #[test]
    fn test_missing_voltage() {
        match parse("Raw IRMS: DEADBEEF") {
            Err(PloadError::MissingField { field, raw }) => {
                assert_eq!(field, Field::Voltage);
                assert_eq!(raw, "Raw IRMS: DEADBEEF");
            }
            other => panic!("expected missing voltage, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_current() {
        assert!(matches!(
            parse("Raw VRMS: CAFEBABE"),
            Err(PloadError::MissingField {
                field: Field::Current,
                ..
            })
        ));
    }

    #[test]
    fn test_lowercase_hex_is_not_matched() {
        assert!(matches!(
            parse("Raw IRMS: deadbeef Raw VRMS: CAFEBABE"),
            Err(PloadError::MissingField {
                field: Field::Current,
                ..
            })
        ));
    }

    #[test]
    fn test_overlong_field_is_not_truncated() {
        assert!(matches!(
            parse("Raw IRMS: 0099999999\r\nRaw VRMS: 00999999\r\n"),
            Err(PloadError::MissingField {
                field: Field::Current,
                ..
            })
        ));
        // punctuation or line ends right after the digits are fine
        let pair = parse("Raw IRMS: 00999999; Raw VRMS: 00999999").unwrap();
        assert_eq!(pair.current_hex, "00999999");
    }

    #[test]
    fn test_decode_rejects_wide_register() {
        let pair = parse("Raw IRMS: 00999999 Raw VRMS: CAFEBABE").unwrap();
        assert!(matches!(
            pair.decode(),
            Err(PloadError::InvalidRegisterEncoding {
                field: Field::Voltage,
                ..
            })
        ));
    }
}
