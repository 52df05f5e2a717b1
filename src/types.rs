//! NewType wrappers for the identifiers that flow through the dispatcher.
//!
//! Provider identifiers and tool names are both plain strings on the wire,
//! so they are wrapped to keep `resolve` and `invoke` call sites honest.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between the provider identifier and the provider-local tool name.
pub const NAMESPACE_SEPARATOR: char = '.';

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Identifier of a provider executable within one registry generation.
    ///
    /// Derived from the executable's file name with its last extension
    /// stripped, e.g. `calculator-mcp` for `calculator-mcp.exe`.
    ProviderId
);

newtype_string!(
    /// Tool name as reported by the provider itself in `tools/list`.
    ///
    /// May contain further `.` characters; only the namespaced form adds
    /// the provider prefix.
    LocalToolName
);

/// A tool name qualified by its owning provider: `<provider>.<local name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacedName {
    pub provider: ProviderId,
    pub tool: LocalToolName,
}

impl NamespacedName {
    pub fn new(provider: impl Into<ProviderId>, tool: impl Into<LocalToolName>) -> Self {
        Self {
            provider: provider.into(),
            tool: tool.into(),
        }
    }

    /// Split on the first separator. Returns `None` when there is none.
    pub fn parse(name: &str) -> Option<Self> {
        let (provider, tool) = name.split_once(NAMESPACE_SEPARATOR)?;
        Some(Self::new(provider, tool))
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.provider, NAMESPACE_SEPARATOR, self.tool)
    }
}
