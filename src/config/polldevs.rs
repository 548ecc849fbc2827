//! Parser for the legacy line-oriented device list
//!
//! The file consists of blank-line-separated sections of `key: value` pairs.
//! Lines starting with `#` are comments.  Keys of the form `default <key>`
//! set defaults that apply to all subsequent device sections.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ZinoError, ZinoResult};

/// Default polling interval in minutes
pub const DEFAULT_INTERVAL_MINUTES: u64 = 5;

/// Everything Zino needs to know to poll one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollDevice {
    pub name: String,
    pub address: IpAddr,
    pub community: String,
    /// Polling interval in minutes
    pub interval: u64,
    /// Interfaces matching this pattern are not monitored
    pub ignorepat: Option<String>,
    /// If set, only interfaces matching this pattern are monitored
    pub watchpat: Option<String>,
    pub priority: u32,
    /// SNMP timeout in seconds
    pub timeout: u64,
    pub retries: u32,
    pub statistics: bool,
    pub hcounters: bool,
    pub do_bgp: bool,
    pub port: u16,
    pub max_repetitions: Option<u32>,
}

impl Default for PollDevice {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: IpAddr::from([0, 0, 0, 0]),
            community: "public".to_string(),
            interval: DEFAULT_INTERVAL_MINUTES,
            ignorepat: None,
            watchpat: None,
            priority: 100,
            timeout: 5,
            retries: 3,
            statistics: true,
            hcounters: false,
            do_bgp: true,
            port: 161,
            max_repetitions: None,
        }
    }
}

impl PollDevice {
    fn from_section(section: &HashMap<String, String>, lineno: usize) -> ZinoResult<Self> {
        let mut device = PollDevice::default();
        let field_error = |key: &str, value: &str| {
            ZinoError::Configuration(format!(
                "line {}: invalid value {:?} for {:?}",
                lineno, value, key
            ))
        };
        for (key, value) in section {
            match key.as_str() {
                "name" => device.name = value.clone(),
                "address" => {
                    device.address = value.parse().map_err(|_| field_error(key, value))?
                }
                "community" => device.community = value.clone(),
                "interval" => {
                    device.interval = value.parse().map_err(|_| field_error(key, value))?
                }
                "ignorepat" => device.ignorepat = Some(value.clone()),
                "watchpat" => device.watchpat = Some(value.clone()),
                "priority" => {
                    device.priority = value.parse().map_err(|_| field_error(key, value))?
                }
                "timeout" => device.timeout = value.parse().map_err(|_| field_error(key, value))?,
                "retries" => device.retries = value.parse().map_err(|_| field_error(key, value))?,
                "statistics" => {
                    device.statistics = parse_bool(value).ok_or_else(|| field_error(key, value))?
                }
                "hcounters" => {
                    device.hcounters = parse_bool(value).ok_or_else(|| field_error(key, value))?
                }
                "do_bgp" => {
                    device.do_bgp = parse_bool(value).ok_or_else(|| field_error(key, value))?
                }
                "port" => device.port = value.parse().map_err(|_| field_error(key, value))?,
                "max_repetitions" => {
                    device.max_repetitions =
                        Some(value.parse().map_err(|_| field_error(key, value))?)
                }
                other => {
                    return Err(ZinoError::Configuration(format!(
                        "line {}: unknown device attribute {:?}",
                        lineno, other
                    )))
                }
            }
        }
        if device.name.is_empty() {
            return Err(ZinoError::Configuration(format!(
                "line {}: device section is missing a name",
                lineno
            )));
        }
        for pattern in [&device.ignorepat, &device.watchpat].into_iter().flatten() {
            regex::Regex::new(pattern).map_err(|error| {
                ZinoError::Configuration(format!("line {}: invalid pattern: {}", lineno, error))
            })?;
        }
        Ok(device)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Some(true),
        "no" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Parses the device file, returning the devices by name and the raw default
/// settings in effect at the end of the file
pub fn read_polldevs(
    path: &Path,
) -> ZinoResult<(HashMap<String, PollDevice>, HashMap<String, String>)> {
    let content = std::fs::read_to_string(path)
        .map_err(|error| ZinoError::Configuration(format!("{}: {}", path.display(), error)))?;
    parse_polldevs(&content)
        .map_err(|error| ZinoError::Configuration(format!("{}: {}", path.display(), error)))
}

/// Parses device file content.  Split from [`read_polldevs`] so tests can
/// work on strings.
pub fn parse_polldevs(
    content: &str,
) -> ZinoResult<(HashMap<String, PollDevice>, HashMap<String, String>)> {
    let mut devices = HashMap::new();
    let mut defaults: HashMap<String, String> = HashMap::new();

    for (first_lineno, section) in read_sections(content)? {
        if section.keys().any(|key| key.starts_with("default ")) {
            for (key, value) in section {
                if let Some(name) = key.strip_prefix("default ") {
                    defaults.insert(name.trim().to_string(), value);
                }
            }
            continue;
        }
        let mut merged = defaults.clone();
        merged.extend(section);
        let device = PollDevice::from_section(&merged, first_lineno)?;
        devices.insert(device.name.clone(), device);
    }

    Ok((devices, defaults))
}

/// Yields blank-line-separated sections as maps, tagged with the line number
/// the section starts at
fn read_sections(content: &str) -> ZinoResult<Vec<(usize, HashMap<String, String>)>> {
    let mut sections = Vec::new();
    let mut section: HashMap<String, String> = HashMap::new();
    let mut first_line = 0;

    for (index, raw_line) in content.lines().enumerate() {
        let lineno = index + 1;
        let line = raw_line.trim();
        if line.starts_with('#') {
            continue;
        }
        if line.is_empty() {
            if !section.is_empty() {
                sections.push((first_line, std::mem::take(&mut section)));
            }
            continue;
        }
        let (key, value) = line.split_once(':').ok_or_else(|| {
            ZinoError::Configuration(format!(
                "line {}: {:?} is not a valid configuration line",
                lineno, line
            ))
        })?;
        if section.is_empty() {
            first_line = lineno;
        }
        section.insert(key.trim().to_string(), value.trim().to_string());
    }
    if !section.is_empty() {
        sections.push((first_line, section));
    }
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const SIMPLE: &str = "\
# Example device list
default interval: 10
default community: s3cret

name: example-gw
address: 10.0.0.1
priority: 500

name: other-gw
address: 10.0.0.2
community: public
interval: 1
";

    #[test]
    fn parses_sections_with_defaults() {
        let (devices, defaults) = parse_polldevs(SIMPLE).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(defaults.get("interval").map(String::as_str), Some("10"));

        let example = &devices["example-gw"];
        assert_eq!(example.address, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(example.interval, 10);
        assert_eq!(example.community, "s3cret");
        assert_eq!(example.priority, 500);

        let other = &devices["other-gw"];
        assert_eq!(other.interval, 1);
        assert_eq!(other.community, "public");
    }

    #[test]
    fn garbage_lines_are_rejected_with_line_numbers() {
        let error = parse_polldevs("name example-gw\n").unwrap_err();
        let message = error.to_string();
        assert!(message.contains("line 1"), "got: {}", message);
    }

    #[test]
    fn bad_address_is_a_configuration_error() {
        let result = parse_polldevs("name: x\naddress: not-an-ip\n");
        assert!(matches!(result, Err(ZinoError::Configuration(_))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = parse_polldevs("name: x\naddress: 10.0.0.1\nbogus: 1\n");
        assert!(matches!(result, Err(ZinoError::Configuration(_))));
    }

    #[test]
    fn invalid_watch_pattern_is_rejected() {
        let result = parse_polldevs("name: x\naddress: 10.0.0.1\nwatchpat: (unclosed\n");
        assert!(matches!(result, Err(ZinoError::Configuration(_))));
    }

    #[test_case("yes", Some(true))]
    #[test_case("on", Some(true))]
    #[test_case("1", Some(true))]
    #[test_case("No", Some(false))]
    #[test_case("false", Some(false))]
    #[test_case("maybe", None)]
    fn boolean_values_accept_the_legacy_forms(value: &str, expected: Option<bool>) {
        assert_eq!(parse_bool(value), expected);
    }

    #[test]
    fn multiple_blank_lines_between_sections_are_fine() {
        let (devices, _) = parse_polldevs("name: a\naddress: 10.0.0.1\n\n\n\nname: b\naddress: 10.0.0.2\n").unwrap();
        assert_eq!(devices.len(), 2);
    }
}
