//! Capture configuration and filter parsing.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeParseError {
    #[error("range '{0}' is not of the form start-end")]
    MissingSeparator(String),
    #[error("invalid number '{0}' in range")]
    InvalidNumber(String),
    #[error("range '{0}' ends before it starts")]
    Reversed(String),
}

/// Inclusive address range written as `0x1000-0x2000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct AddressRange {
    pub start: u64,
    pub end: u64,
}

impl AddressRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, address: u64) -> bool {
        self.start <= address && address <= self.end
    }
}

impl FromStr for AddressRange {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = split_range(s)?;
        let range = Self::new(parse_hex(start)?, parse_hex(end)?);
        if range.end < range.start {
            return Err(RangeParseError::Reversed(s.to_string()));
        }
        Ok(range)
    }
}

impl TryFrom<String> for AddressRange {
    type Error = RangeParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}-{:#x}", self.start, self.end)
    }
}

/// Inclusive exec id range written as `1000-2000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct IdRange {
    pub start: u64,
    pub end: u64,
}

impl IdRange {
    pub fn contains(&self, id: u64) -> bool {
        self.start <= id && id <= self.end
    }
}

impl FromStr for IdRange {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = split_range(s)?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map_err(|_| RangeParseError::InvalidNumber(v.to_string()))
        };
        let range = Self {
            start: parse(start)?,
            end: parse(end)?,
        };
        if range.end < range.start {
            return Err(RangeParseError::Reversed(s.to_string()));
        }
        Ok(range)
    }
}

impl TryFrom<String> for IdRange {
    type Error = RangeParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Instructions to keep: an explicit address range, or the text of a library
/// resolved once the library is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum InstructionFilter {
    Range(AddressRange),
    Library(String),
}

impl From<String> for InstructionFilter {
    fn from(s: String) -> Self {
        match s.parse::<AddressRange>() {
            Ok(range) => InstructionFilter::Range(range),
            Err(_) => InstructionFilter::Library(s),
        }
    }
}

impl FromStr for InstructionFilter {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.to_string().into())
    }
}

/// Settings for one capture session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Only instructions inside one of these are captured. Empty keeps all.
    pub instruction_filters: Vec<InstructionFilter>,

    /// Only accesses starting inside one of these are buffered. Empty keeps all.
    pub memory_filters: Vec<AddressRange>,

    /// Only exec ids inside one of these are written. Empty keeps all.
    pub exec_filters: Vec<IdRange>,

    pub trace_instructions: bool,
    pub trace_reads: bool,
    pub trace_writes: bool,

    /// A run is flushed once it holds this many instructions.
    pub max_run_instructions: usize,

    /// A run is flushed before its code would exceed this many bytes.
    pub max_run_code_bytes: usize,

    /// Initial size of the access buffer. It doubles whenever it fills up.
    pub access_buffer_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            instruction_filters: Vec::new(),
            memory_filters: Vec::new(),
            exec_filters: Vec::new(),
            trace_instructions: true,
            trace_reads: true,
            trace_writes: true,
            max_run_instructions: 4096,
            max_run_code_bytes: 32 * 4096,
            access_buffer_capacity: crate::trace::DEFAULT_ACCESS_BUFFER_CAPACITY,
        }
    }
}

impl CaptureConfig {
    /// Load a configuration from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read capture config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse capture config {}", path.display()))
    }
}

/// Parse a comma separated list such as `0x1000-0x2000,0x4000-0x5000`.
pub fn parse_list<T: FromStr>(s: &str) -> Result<Vec<T>, T::Err> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::parse)
        .collect()
}

fn split_range(s: &str) -> Result<(&str, &str), RangeParseError> {
    s.trim()
        .split_once('-')
        .ok_or_else(|| RangeParseError::MissingSeparator(s.to_string()))
}

fn parse_hex(s: &str) -> Result<u64, RangeParseError> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| RangeParseError::InvalidNumber(s.to_string()))?;
    u64::from_str_radix(digits, 16).map_err(|_| RangeParseError::InvalidNumber(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_range_parse() {
        let range: AddressRange = "0x1000-0x1fff".parse().unwrap();
        assert_eq!(range, AddressRange::new(0x1000, 0x1fff));
        assert!(range.contains(0x1000));
        assert!(range.contains(0x1fff));
        assert!(!range.contains(0x2000));
        assert_eq!(range.to_string(), "0x1000-0x1fff");
    }

    #[test]
    fn test_address_range_errors() {
        assert!(matches!(
            "0x1000".parse::<AddressRange>(),
            Err(RangeParseError::MissingSeparator(_))
        ));
        assert!(matches!(
            "1000-2000".parse::<AddressRange>(),
            Err(RangeParseError::InvalidNumber(_))
        ));
        assert!(matches!(
            "0x2000-0x1000".parse::<AddressRange>(),
            Err(RangeParseError::Reversed(_))
        ));
    }

    #[test]
    fn test_parse_lists() {
        let ids: Vec<IdRange> = parse_list("10-20, 30-30").unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids[1].contains(30));
        assert!(!ids[0].contains(21));

        let filters: Vec<InstructionFilter> = parse_list("0x400000-0x401000,libc.so.6").unwrap();
        assert_eq!(
            filters,
            vec![
                InstructionFilter::Range(AddressRange::new(0x400000, 0x401000)),
                InstructionFilter::Library("libc.so.6".into()),
            ]
        );
    }

    #[test]
    fn test_config_from_json() {
        let config: CaptureConfig = serde_json::from_str(
            r#"{
                "memory_filters": ["0x7ff000-0x7fffff"],
                "exec_filters": ["5-9"],
                "trace_writes": false
            }"#,
        )
        .unwrap();
        assert_eq!(config.memory_filters.len(), 1);
        assert_eq!(config.exec_filters[0].start, 5);
        assert!(!config.trace_writes);
        assert!(config.trace_reads);
        assert_eq!(config.max_run_instructions, 4096);
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");
        fs::write(&path, r#"{"instruction_filters": ["ld-linux.so.2"]}"#).unwrap();
        let config = CaptureConfig::from_json_file(&path).unwrap();
        assert_eq!(
            config.instruction_filters,
            vec![InstructionFilter::Library("ld-linux.so.2".into())]
        );

        fs::write(&path, r#"{"memory_filters": ["nope"]}"#).unwrap();
        assert!(CaptureConfig::from_json_file(&path).is_err());
    }
}
