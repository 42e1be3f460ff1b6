//! Decoding of the plug's `get_sysinfo` + `get_realtime` response.
//!
//! The device answers with a JSON document shaped like:
//!
//! ```json
//! {
//!   "system": { "get_sysinfo": { "relay_state": 1, "on_time": 120, "mac": "...", "alias": "..." } },
//!   "emeter": { "get_realtime": { "voltage_mv": 230000, "current_ma": 500, "power_mw": 115000, "total_wh": 42 } }
//! }
//! ```
//!
//! Every field is optional. A missing section or a field of the wrong type
//! decodes as zero (or an empty string) instead of failing the whole reading.
//! Older firmware and models without a metering chip omit or zero large parts
//! of the document.

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced while decoding a raw telemetry payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON payload: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// A single decoded telemetry reading.
///
/// All electrical values stay in the integer units reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reading {
    /// Relay state: 0 = off, 1 = on.
    pub relay_state: u8,
    /// Seconds since the relay last switched on.
    pub on_time: u64,
    /// Hardware address, empty when absent.
    pub mac: String,
    /// User-assigned device name, empty when absent.
    pub alias: String,
    /// Device model, empty when absent.
    pub model: String,
    /// Voltage in millivolts.
    pub voltage_mv: u64,
    /// Current in milliamps.
    pub current_ma: u64,
    /// Power in milliwatts.
    pub power_mw: u64,
    /// Cumulative energy in watt hours. Zero on models without metering.
    pub total_wh: u64,
}

impl Reading {
    /// Whether the device reports energy metering.
    ///
    /// `total_wh` is hard-wired to zero on plugs without a metering chip, so a
    /// zero here is read as "unsupported" even though a brand new metering
    /// plug would report the same thing.
    pub fn supports_metering(&self) -> bool {
        self.total_wh != 0
    }

    /// One-line `key:value` summary used in poll log lines.
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("relay_state:{}", self.relay_state),
            format!("on_time:{}", self.on_time),
        ];

        if self.supports_metering() {
            parts.push(format!("watthours:{}", self.total_wh));
            parts.push(format!("millivolts:{}", self.voltage_mv));
            parts.push(format!("milliamps:{}", self.current_ma));
            parts.push(format!("milliwatts:{}", self.power_mw));
        }

        parts.join(" ")
    }
}

/// Decode a raw payload into a [`Reading`].
///
/// Only a payload that is not valid JSON, or whose top level is not an
/// object, is an error.
pub fn decode(raw: &str) -> Result<Reading, DecodeError> {
    let root: Value = serde_json::from_str(raw)?;
    let root = root.as_object().ok_or(DecodeError::NotAnObject)?;

    let sysinfo = section(root, "system", "get_sysinfo");
    let realtime = section(root, "emeter", "get_realtime");

    Ok(Reading {
        relay_state: u8::try_from(uint(sysinfo, "relay_state")).unwrap_or(0),
        on_time: uint(sysinfo, "on_time"),
        mac: text(sysinfo, "mac"),
        alias: text(sysinfo, "alias"),
        model: text(sysinfo, "model"),
        voltage_mv: uint(realtime, "voltage_mv"),
        current_ma: uint(realtime, "current_ma"),
        power_mw: uint(realtime, "power_mw"),
        total_wh: uint(realtime, "total_wh"),
    })
}

/// Look up `root[outer][inner]` if both levels are objects.
fn section<'a>(
    root: &'a Map<String, Value>,
    outer: &str,
    inner: &str,
) -> Option<&'a Map<String, Value>> {
    root.get(outer)?.as_object()?.get(inner)?.as_object()
}

fn uint(section: Option<&Map<String, Value>>, key: &str) -> u64 {
    section
        .and_then(|s| s.get(key))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn text(section: Option<&Map<String, Value>>, key: &str) -> String {
    section
        .and_then(|s| s.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAMP: &str = r#"{"system":{"get_sysinfo":{"relay_state":1,"on_time":120,"mac":"AA:BB:CC:DD:EE:FF","alias":"Lamp"}},"emeter":{"get_realtime":{"voltage_mv":230000,"current_ma":500,"power_mw":115000,"total_wh":42}}}"#;

    #[test]
    fn test_decode_full_payload() {
        let reading = decode(LAMP).unwrap();

        assert_eq!(reading.relay_state, 1);
        assert_eq!(reading.on_time, 120);
        assert_eq!(reading.mac, "AA:BB:CC:DD:EE:FF");
        assert_eq!(reading.alias, "Lamp");
        assert_eq!(reading.voltage_mv, 230_000);
        assert_eq!(reading.current_ma, 500);
        assert_eq!(reading.power_mw, 115_000);
        assert_eq!(reading.total_wh, 42);
        assert!(reading.supports_metering());
    }

    #[test]
    fn test_decode_is_idempotent() {
        assert_eq!(decode(LAMP).unwrap(), decode(LAMP).unwrap());
    }

    #[test]
    fn test_decode_ignores_unknown_device_fields() {
        let raw = r#"{
            "system": {"get_sysinfo": {
                "sw_ver": "1.5.4 Build 180815 Rel.121440",
                "hw_ver": "2.0",
                "model": "HS110(EU)",
                "deviceId": "8006",
                "rssi": -57,
                "latitude_i": 0,
                "next_action": {"type": -1},
                "relay_state": 0,
                "on_time": 0,
                "mac": "50:C7:BF:00:00:01",
                "alias": "Heater",
                "err_code": 0
            }},
            "emeter": {
                "get_realtime": {"voltage_mv": 231512, "current_ma": 14, "power_mw": 0, "total_wh": 918, "err_code": 0},
                "get_vgain_igain": {"vgain": 13462, "igain": 16835, "err_code": 0}
            }
        }"#;

        let reading = decode(raw).unwrap();
        assert_eq!(reading.relay_state, 0);
        assert_eq!(reading.model, "HS110(EU)");
        assert_eq!(reading.alias, "Heater");
        assert_eq!(reading.power_mw, 0);
        assert_eq!(reading.total_wh, 918);
        assert!(reading.supports_metering());
    }

    #[test]
    fn test_decode_without_emeter_section() {
        // HS100 answers the emeter query with an error object
        let raw = r#"{
            "system": {"get_sysinfo": {"relay_state": 1, "on_time": 3600, "mac": "AA:BB", "alias": "Fan"}},
            "emeter": {"err_code": -1, "err_msg": "module not support"}
        }"#;

        let reading = decode(raw).unwrap();
        assert_eq!(reading.relay_state, 1);
        assert_eq!(reading.on_time, 3600);
        assert_eq!(reading.voltage_mv, 0);
        assert_eq!(reading.total_wh, 0);
        assert!(!reading.supports_metering());
    }

    #[test]
    fn test_decode_type_mismatch_falls_back_to_zero() {
        let raw = r#"{
            "system": {"get_sysinfo": {"relay_state": "on", "on_time": -5, "mac": 12, "alias": "Desk"}},
            "emeter": {"get_realtime": {"voltage_mv": 230.5, "current_ma": null, "power_mw": 7, "total_wh": 3}}
        }"#;

        let reading = decode(raw).unwrap();
        assert_eq!(reading.relay_state, 0);
        assert_eq!(reading.on_time, 0);
        assert_eq!(reading.mac, "");
        assert_eq!(reading.alias, "Desk");
        assert_eq!(reading.voltage_mv, 0);
        assert_eq!(reading.current_ma, 0);
        assert_eq!(reading.power_mw, 7);
        assert_eq!(reading.total_wh, 3);
    }

    #[test]
    fn test_decode_relay_state_out_of_range() {
        let raw = r#"{"system": {"get_sysinfo": {"relay_state": 300}}}"#;
        assert_eq!(decode(raw).unwrap().relay_state, 0);
    }

    #[test]
    fn test_decode_empty_object() {
        let reading = decode("{}").unwrap();
        assert_eq!(reading, Reading::default());
    }

    #[test]
    fn test_decode_truncated_payload() {
        let raw = &LAMP[..LAMP.len() / 2];
        assert!(matches!(decode(raw), Err(DecodeError::Syntax(_))));
    }

    #[test]
    fn test_decode_non_object() {
        assert!(matches!(decode("[1, 2, 3]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode("\"text\""), Err(DecodeError::NotAnObject)));
    }

    #[test]
    fn test_summary_metered() {
        let reading = decode(LAMP).unwrap();
        assert_eq!(
            reading.summary(),
            "relay_state:1 on_time:120 watthours:42 millivolts:230000 milliamps:500 milliwatts:115000"
        );
    }

    #[test]
    fn test_summary_unmetered() {
        let reading = Reading {
            relay_state: 1,
            on_time: 7,
            ..Default::default()
        };
        assert_eq!(reading.summary(), "relay_state:1 on_time:7");
    }
}
