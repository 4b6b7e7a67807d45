//! Wire types for SES receipt notifications.
//!
//! Only the fields the relay reads are modelled; everything else in the
//! notification is ignored.

use std::fmt;

use serde::Deserialize;

/// Raw SES notification as delivered by the receipt rule.
#[derive(Debug, Default, Deserialize)]
pub struct SesNotification {
    /// Raw message, base64-encoded unless the receipt rule says otherwise
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub mail: SesMail,
    #[serde(default)]
    pub receipt: SesReceipt,
}

#[derive(Debug, Default, Deserialize)]
pub struct SesMail {
    #[serde(default)]
    pub headers: Vec<SesHeader>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SesHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesReceipt {
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub spam_verdict: SesVerdict,
    #[serde(default)]
    pub virus_verdict: SesVerdict,
}

#[derive(Debug, Default, Deserialize)]
pub struct SesVerdict {
    #[serde(default)]
    pub status: String,
}

impl SesMail {
    /// First header value with exactly this name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name == name)
            .map(|header| header.value.as_str())
    }
}

/// Upstream spam / virus classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
    Disabled,
    Other(String),
}

impl Verdict {
    /// Parse a verdict status. Matching is case-sensitive.
    pub fn from_status(status: &str) -> Self {
        match status {
            "PASS" => Verdict::Pass,
            "FAIL" => Verdict::Fail,
            "DISABLED" => Verdict::Disabled,
            other => Verdict::Other(other.to_string()),
        }
    }

    /// Only `PASS` and `DISABLED` may be relayed.
    pub fn is_forwardable(&self) -> bool {
        matches!(self, Verdict::Pass | Verdict::Disabled)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("PASS"),
            Verdict::Fail => f.write_str("FAIL"),
            Verdict::Disabled => f.write_str("DISABLED"),
            Verdict::Other(status) => f.write_str(status),
        }
    }
}
