//! Strongly-typed identifiers used across the domain.
//!
//! Identifiers are opaque strings assigned by the entity store. They travel
//! inside job payloads unchanged, so the serialized form is the bare string.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a tenant website.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebsiteId(String);

/// Identifier of a control-plane admin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdminId(String);

/// Identifier of an article.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(String);

/// Identifier of an article category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(String);

/// Identifier of an ad.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdsId(String);

/// Identifier of a content row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Wrap a raw identifier without validation.
            ///
            /// Use [`FromStr`] when the value comes from untrusted input.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// An identifier is usable when it has at least one non-whitespace character.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(format!("{}: must not be empty", $name)));
                }
                Ok(Self(trimmed.to_string()))
            }
        }
    };
}

impl_string_newtype!(WebsiteId, "WebsiteId");
impl_string_newtype!(AdminId, "AdminId");
impl_string_newtype!(ArticleId, "ArticleId");
impl_string_newtype!(CategoryId, "CategoryId");
impl_string_newtype!(AdsId, "AdsId");
impl_string_newtype!(ContentId, "ContentId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_whitespace() {
        let id: WebsiteId = "  W1 ".parse().unwrap();
        assert_eq!(id.as_str(), "W1");
    }

    #[test]
    fn parse_rejects_blank() {
        let err = "   ".parse::<ArticleId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(msg) if msg.contains("ArticleId")));
    }

    #[test]
    fn serializes_as_bare_string() {
        let json = serde_json::to_string(&AdsId::new("AD-9")).unwrap();
        assert_eq!(json, "\"AD-9\"");
    }
}
