//! Pattern - task の呼び出しチャンネルを表す glob パターン
//!
//! # 命名規約
//! - デフォルト: `{module}:{handler_name}`
//! - 完了チャンネル: `{pattern}:on_completed`
//! - エラーチャンネル: `{pattern}:on_error`
//! - `*` は全チャンネルにマッチする

use std::fmt;

use super::errors::RegistryError;

pub const WILDCARD: &str = "*";
pub const COMPLETED_SUFFIX: &str = ":on_completed";
pub const ERROR_SUFFIX: &str = ":on_error";

/// Channel a task publishes its successful results on.
pub fn result_channel(pattern: &str) -> String {
    format!("{pattern}{COMPLETED_SUFFIX}")
}

/// Channel a task publishes its error envelopes on.
pub fn error_channel(pattern: &str) -> String {
    format!("{pattern}{ERROR_SUFFIX}")
}

/// A glob pattern matched against channel names.
///
/// The source string is kept verbatim (it is also the channel the
/// dispatcher publishes invocations on); the compiled form is only used
/// for matching.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    glob: glob::Pattern,
}

impl Pattern {
    pub fn new(raw: impl Into<String>) -> Result<Self, RegistryError> {
        let raw = raw.into();
        let glob = glob::Pattern::new(&raw).map_err(|e| RegistryError::InvalidPattern {
            pattern: raw.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { raw, glob })
    }

    /// Default pattern for a handler: `<module>:<name>`.
    pub fn for_handler(module: &str, name: &str) -> Result<Self, RegistryError> {
        Self::new(format!("{module}:{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_wildcard(&self) -> bool {
        self.raw == WILDCARD
    }

    pub fn matches(&self, channel: &str) -> bool {
        self.glob.matches(channel)
    }

    pub fn result_channel(&self) -> String {
        result_channel(&self.raw)
    }

    pub fn error_channel(&self) -> String {
        error_channel(&self.raw)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Pattern {}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.raw.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("*", "example:my_task", true)]
    #[case("*", "example:my_task:on_completed", true)]
    #[case("example:my_task", "example:my_task", true)]
    #[case("example:my_task", "example:my_task:on_completed", false)]
    #[case("example:*", "example:my_task", true)]
    #[case("example:*", "other:my_task", false)]
    #[case("job.?", "job.1", true)]
    #[case("job.[ab]", "job.c", false)]
    fn glob_matching(#[case] pattern: &str, #[case] channel: &str, #[case] expected: bool) {
        let p = Pattern::new(pattern).unwrap();
        assert_eq!(p.matches(channel), expected);
    }

    #[test]
    fn default_pattern_is_module_and_name() {
        let p = Pattern::for_handler("example", "my_task").unwrap();
        assert_eq!(p.as_str(), "example:my_task");
        assert_eq!(p.result_channel(), "example:my_task:on_completed");
        assert_eq!(p.error_channel(), "example:my_task:on_error");
        assert!(!p.is_wildcard());
    }

    #[test]
    fn wildcard_is_detected() {
        assert!(Pattern::new(WILDCARD).unwrap().is_wildcard());
        assert!(!Pattern::new("a*").unwrap().is_wildcard());
    }

    #[test]
    fn malformed_glob_is_rejected() {
        let err = Pattern::new("tasks.[").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPattern { pattern, .. } if pattern == "tasks.["));
    }
}
