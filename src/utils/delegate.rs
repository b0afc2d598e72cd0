// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::BTreeMap;
use std::str::FromStr;

/// Parsed delegate selector of the form `"<type> [key=value ...]"`.
///
/// The first whitespace-separated word selects the predictor; the rest are
/// options passed to it. A word without `=` is an option with an empty value.
///
/// # Example
///
/// ```rust
/// use npu_runtime::utils::DelegateSpec;
///
/// let spec = DelegateSpec::parse("local kernel=add value=3 verbose");
/// assert_eq!(spec.kind(), "local");
/// assert_eq!(spec.option("kernel"), Some("add"));
/// assert_eq!(spec.option_as::<u8>("value"), Some(3));
/// assert!(spec.flag("verbose"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DelegateSpec {
    kind: String,
    options: BTreeMap<String, String>,
}

impl DelegateSpec {
    pub fn parse(selector: &str) -> Self {
        let mut words = selector.split_whitespace();
        let kind = words.next().unwrap_or_default().to_string();
        let options = words
            .map(|word| match word.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (word.to_string(), String::new()),
            })
            .collect();
        Self { kind, options }
    }

    /// Predictor type, empty when the selector is blank.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Option parsed as `T`; `None` when absent or unparsable.
    pub fn option_as<T: FromStr>(&self, key: &str) -> Option<T> {
        self.option(key).and_then(|value| value.parse().ok())
    }

    /// True for a bare word, `1`, `true` or `yes`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.option(key), Some("" | "1" | "true" | "yes"))
    }
}
