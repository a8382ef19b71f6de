//! Telemetry line parser.
//!
//! Turns a `SENSOR KEY=VALUE …` packet into a [`SensorReading`]. The
//! parser never fails the caller: missing or malformed fields degrade to
//! their defaults, and a line without the marker yields a degenerate
//! reading carrying the raw line for diagnostics.

use std::collections::HashMap;

use homelink_types::{FIELD_DEFAULT, SensorReading};

/// Marker token every telemetry packet must start with.
pub const SENSOR_MARKER: &str = "SENSOR";

/// Parse one telemetry line into a [`SensorReading`].
///
/// Recognised keys are `GAS`, `HUMI`, `PM10`, and `PIR`; unknown keys are
/// tolerated so new sensor fields can ship without touching the relay.
pub fn parse_reading(line: &str) -> SensorReading {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some(SENSOR_MARKER) {
        return SensorReading {
            raw: Some(line.to_string()),
            ..SensorReading::default()
        };
    }

    let fields = parse_fields(tokens);
    SensorReading {
        gas: field(&fields, "GAS"),
        humidity: field(&fields, "HUMI"),
        dust: field(&fields, "PM10"),
        pir: fields
            .get("PIR")
            .and_then(|v| v.parse::<u8>().ok())
            .unwrap_or(0),
        raw: None,
    }
}

/// Tokenize `KEY=VALUE` pairs into an uppercased-key map.
///
/// Tokens with no `=` or an empty value half are skipped.
fn parse_fields<'a>(tokens: impl Iterator<Item = &'a str>) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for token in tokens {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        fields.insert(key.to_uppercase(), value.to_string());
    }
    fields
}

fn field(fields: &HashMap<String, String>, key: &str) -> String {
    fields
        .get(key)
        .cloned()
        .unwrap_or_else(|| FIELD_DEFAULT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_packet_parses() {
        let reading =
            parse_reading("SENSOR GAS=123 METHAN=1 HUMI=36.70 PM1=7 PM25=5 PM10=8 PIR=1");
        assert_eq!(reading.gas, "123");
        assert_eq!(reading.humidity, "36.70");
        assert_eq!(reading.dust, "8");
        assert_eq!(reading.pir, 1);
        assert_eq!(reading.raw, None);
    }

    #[test]
    fn missing_pir_defaults_to_zero() {
        let reading = parse_reading("SENSOR GAS=123 HUMI=36.70 PM10=8");
        assert_eq!(reading.pir, 0);
    }

    #[test]
    fn non_numeric_pir_defaults_to_zero() {
        let reading = parse_reading("SENSOR GAS=123 PIR=x");
        assert_eq!(reading.pir, 0);
        assert_eq!(reading.gas, "123");
    }

    #[test]
    fn missing_string_fields_use_placeholder() {
        let reading = parse_reading("SENSOR PIR=1");
        assert_eq!(reading.gas, "---");
        assert_eq!(reading.humidity, "---");
        assert_eq!(reading.dust, "---");
        assert_eq!(reading.pir, 1);
    }

    #[test]
    fn malformed_tokens_are_skipped() {
        let reading = parse_reading("SENSOR GAS=123 BROKEN HUMI= PM10=8");
        assert_eq!(reading.gas, "123");
        // `HUMI=` has an empty value half, so the default applies.
        assert_eq!(reading.humidity, "---");
        assert_eq!(reading.dust, "8");
    }

    #[test]
    fn lowercase_keys_are_recognised() {
        let reading = parse_reading("SENSOR gas=9 humi=40.1");
        assert_eq!(reading.gas, "9");
        assert_eq!(reading.humidity, "40.1");
    }

    #[test]
    fn missing_marker_yields_raw_fallback() {
        let reading = parse_reading("GAS=123 PIR=1");
        assert_eq!(reading.gas, "---");
        assert_eq!(reading.pir, 0);
        assert_eq!(reading.raw.as_deref(), Some("GAS=123 PIR=1"));
    }
}
