//! `.cvcrc` configuration loading (`spec.md` §6).
//!
//! Line-oriented `KEY = 'value'` with `$VAR`/`${VAR}` shell-style expansion
//! against the process environment. The model/power/fuse file *readers*
//! themselves are out of scope (`spec.md` §1); this module only parses the
//! `.cvcrc` that would name their paths, into a typed [`CvcConfig`].

use std::collections::HashMap;
use std::path::PathBuf;

use crate::detect::DetectConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("line {0}: missing '=' separator")]
    MissingSeparator(usize),
    #[error("line {0}: value is not a quoted string")]
    UnquotedValue(usize),
    #[error("line {0}: unterminated ${{VAR}} expansion")]
    UnterminatedExpansion(usize),
    #[error("line {0}: '{1}' is not a recognized boolean value")]
    InvalidBoolean(usize, String),
    #[error("line {0}: '{1}' is not a valid integer")]
    InvalidInteger(usize, String),
    #[error("line {0}: '{1}' is not a valid floating-point number")]
    InvalidFloat(usize, String),
}

/// Typed view of every key `spec.md` §6 names. Paths are kept as
/// `Option<PathBuf>` rather than opened here — reading them is the
/// (out-of-scope) model/power/fuse parsers' job.
#[derive(Clone, Debug, Default)]
pub struct CvcConfig {
    pub top: Option<String>,
    pub netlist: Option<PathBuf>,
    pub mode: Option<String>,
    pub model_file: Option<PathBuf>,
    pub power_file: Option<PathBuf>,
    pub fuse_file: Option<PathBuf>,
    pub report_file: Option<PathBuf>,
    pub circuit_error_limit: u32,
    pub leak_limit_ua: f64,
    pub soi: bool,
    pub scrc: bool,
    pub error_thresholds: HashMap<String, i32>,
}

impl CvcConfig {
    fn defaults() -> Self {
        CvcConfig {
            circuit_error_limit: 1,
            leak_limit_ua: 200.0,
            ..Default::default()
        }
    }

    /// Parse a `.cvcrc`-format string into a config, applying `$VAR`/
    /// `${VAR}` expansion (against `std::env::var`) to every quoted value
    /// before interpreting it.
    pub fn parse(source: &str) -> Result<CvcConfig, ConfigError> {
        let mut config = CvcConfig::defaults();
        for (idx, raw_line) in source.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, raw_value) = line.split_once('=').ok_or(ConfigError::MissingSeparator(line_no))?;
            let key = key.trim();
            let raw_value = raw_value.trim();
            let quoted = raw_value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .or_else(|| raw_value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
                .ok_or(ConfigError::UnquotedValue(line_no))?;
            let value = expand_env(quoted, line_no)?;
            apply(&mut config, key, &value, line_no)?;
        }
        Ok(config)
    }

    /// Project the subset of fields the error detectors consult into a
    /// [`DetectConfig`] (`spec.md` §4.F).
    pub fn detect_config(&self) -> DetectConfig {
        let threshold = |key: &str| self.error_thresholds.get(key).copied().unwrap_or(0);
        DetectConfig {
            circuit_error_limit: self.circuit_error_limit,
            leak_limit_ua: self.leak_limit_ua,
            forward_error_threshold_mv: threshold("CVC_FORWARD_ERROR_THRESHOLD"),
            vgs_error_threshold_mv: threshold("CVC_VGS_ERROR_THRESHOLD"),
            vds_error_threshold_mv: threshold("CVC_VDS_ERROR_THRESHOLD"),
            vbs_error_threshold_mv: threshold("CVC_VBS_ERROR_THRESHOLD"),
            vbg_error_threshold_mv: threshold("CVC_VBG_ERROR_THRESHOLD"),
            ignore_no_leak_floating: false,
        }
    }
}

fn apply(config: &mut CvcConfig, key: &str, value: &str, line_no: usize) -> Result<(), ConfigError> {
    match key {
        "CVC_TOP" => config.top = Some(value.to_string()),
        "CVC_NETLIST" => config.netlist = Some(PathBuf::from(value)),
        "CVC_MODE" => config.mode = Some(value.to_string()),
        "CVC_MODEL_FILE" => config.model_file = Some(PathBuf::from(value)),
        "CVC_POWER_FILE" => config.power_file = Some(PathBuf::from(value)),
        "CVC_FUSE_FILE" => config.fuse_file = Some(PathBuf::from(value)),
        "CVC_REPORT_FILE" => config.report_file = Some(PathBuf::from(value)),
        "CVC_CIRCUIT_ERROR_LIMIT" => {
            config.circuit_error_limit = value.parse().map_err(|_| ConfigError::InvalidInteger(line_no, value.to_string()))?;
        }
        "CVC_LEAK_LIMIT" => {
            config.leak_limit_ua = value.parse().map_err(|_| ConfigError::InvalidFloat(line_no, value.to_string()))?;
        }
        "CVC_SOI" => config.soi = parse_bool(value, line_no)?,
        "CVC_SCRC" => config.scrc = parse_bool(value, line_no)?,
        other if other.starts_with("CVC_") && other.ends_with("_ERROR_THRESHOLD") => {
            let mv: i32 = value.parse().map_err(|_| ConfigError::InvalidInteger(line_no, value.to_string()))?;
            config.error_thresholds.insert(other.to_string(), mv);
        }
        _ => {
            // Unrecognized keys are ignored rather than rejected: `spec.md`
            // §6 lists the keys this crate interprets, but a `.cvcrc` is
            // allowed to carry keys only the (out-of-scope) debug-cvcrc
            // exporter or REPL would use.
        }
    }
    Ok(())
}

fn parse_bool(value: &str, line_no: usize) -> Result<bool, ConfigError> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::InvalidBoolean(line_no, other.to_string())),
    }
}

/// Expand `$VAR` and `${VAR}` references against the process environment.
/// An undefined variable expands to the empty string (shell semantics
/// under `set +u`), matching `spec.md` §6's "shell-expansion in values"
/// without requiring a `.cvcrc` author to guard every reference.
fn expand_env(value: &str, line_no: usize) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('{') => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(ConfigError::UnterminatedExpansion(line_no));
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            Some(c) if c.is_ascii_alphabetic() || *c == '_' => {
                let mut name = String::new();
                while let Some(c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_keys_with_quoted_values() {
        let config = CvcConfig::parse("CVC_TOP = 'INVERTER'\nCVC_LEAK_LIMIT = '50.0'\n").unwrap();
        assert_eq!(config.top.as_deref(), Some("INVERTER"));
        assert_eq!(config.leak_limit_ua, 50.0);
    }

    #[test]
    fn expands_both_dollar_var_forms() {
        std::env::set_var("CVC_TEST_ROOT", "/tmp/design");
        let config = CvcConfig::parse("CVC_NETLIST = '$CVC_TEST_ROOT/top.cdl'\n").unwrap();
        assert_eq!(config.netlist, Some(PathBuf::from("/tmp/design/top.cdl")));
        let config = CvcConfig::parse("CVC_NETLIST = '${CVC_TEST_ROOT}/top.cdl'\n").unwrap();
        assert_eq!(config.netlist, Some(PathBuf::from("/tmp/design/top.cdl")));
        std::env::remove_var("CVC_TEST_ROOT");
    }

    #[test]
    fn blank_lines_and_comments_are_skipped() {
        let config = CvcConfig::parse("# a comment\n\nCVC_SOI = 'true'\n").unwrap();
        assert!(config.soi);
    }

    #[test]
    fn missing_separator_is_an_error() {
        assert!(matches!(CvcConfig::parse("CVC_TOP 'x'\n"), Err(ConfigError::MissingSeparator(1))));
    }

    #[test]
    fn unquoted_value_is_an_error() {
        assert!(matches!(CvcConfig::parse("CVC_TOP = x\n"), Err(ConfigError::UnquotedValue(1))));
    }

    #[test]
    fn per_kind_error_threshold_is_captured() {
        let config = CvcConfig::parse("CVC_VDS_ERROR_THRESHOLD = '50'\n").unwrap();
        assert_eq!(config.error_thresholds.get("CVC_VDS_ERROR_THRESHOLD"), Some(&50));
        assert_eq!(config.detect_config().vds_error_threshold_mv, 50);
    }

    #[test]
    fn unrecognized_key_is_ignored_not_rejected() {
        assert!(CvcConfig::parse("CVC_FUTURE_FEATURE = 'x'\n").is_ok());
    }
}
