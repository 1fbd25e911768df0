//! Separator handling for composite `base64|base64[|base64]` strings.
//!
//! Older writers separated fields with `fA==` (the base64 form of `|`).
//! The format is resolved once per string; callers then work with the parts.

use cfold_core::{CfoldError, CfoldResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Literal `|` separator
    Current,
    /// Base64-encoded `|` separator (`fA==`), read-only
    Legacy,
}

impl WireFormat {
    pub const fn delimiter(self) -> &'static str {
        match self {
            WireFormat::Current => "|",
            WireFormat::Legacy => "fA==",
        }
    }

    /// Current wins whenever a `|` is present; base64 never produces one.
    pub fn detect(s: &str) -> CfoldResult<Self> {
        if s.contains(WireFormat::Current.delimiter()) {
            Ok(WireFormat::Current)
        } else if s.contains(WireFormat::Legacy.delimiter()) {
            Ok(WireFormat::Legacy)
        } else {
            Err(CfoldError::Format(
                "composite string has no IV delimiter".into(),
            ))
        }
    }

    /// Split at the last delimiter: `(format, head, tail)`.
    pub fn split_last(s: &str) -> CfoldResult<(Self, &str, &str)> {
        let format = Self::detect(s)?;
        let delim = format.delimiter();
        // detect() guarantees the delimiter occurs
        let pos = s
            .rfind(delim)
            .ok_or_else(|| CfoldError::Format("composite string has no IV delimiter".into()))?;
        Ok((format, &s[..pos], &s[pos + delim.len()..]))
    }

    /// Split on every delimiter.
    pub fn split_all(s: &str) -> CfoldResult<(Self, Vec<&str>)> {
        let format = Self::detect(s)?;
        Ok((format, s.split(format.delimiter()).collect()))
    }
}
