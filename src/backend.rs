//! Descriptor model for provisioned storage backends.
//!
//! A backend descriptor is the normalised view of one allocated zdb: which
//! configuration section it belongs to, the endpoint selected for it, its
//! namespace, and the deployment-wide password. Descriptors are sorted by the
//! numeric suffix embedded in their namespace so the rendered configuration is
//! byte-for-byte reproducible across runs.

use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// TCP port every zdb backend listens on.
pub const BACKEND_PORT: u16 = 9900;

/// Configuration section a backend belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackendRole {
    /// Metadata backend, rendered under `[[meta.config.backends]]`.
    Meta,
    /// Data backend, rendered under `[[groups.backends]]`.
    Data,
}

/// Network used to reach backends and the deployment VM.
///
/// Provisioned resources expose a list of candidate addresses. When a node has
/// public IPv6 it is the first entry in the list; the mycelium overlay address
/// is always the last.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Public IPv6; selects the first candidate address.
    #[default]
    Ipv6,
    /// Mycelium overlay network; selects the last candidate address.
    Mycelium,
}

impl ConnectionMode {
    /// Selects one address from a provisioned candidate list according to the
    /// mode, or `None` when the list is empty.
    #[must_use]
    pub fn select<'a>(self, candidates: &'a [String]) -> Option<&'a str> {
        let chosen = match self {
            Self::Ipv6 => candidates.first(),
            Self::Mycelium => candidates.last(),
        };
        chosen.map(String::as_str)
    }
}

/// Error returned when a connection mode string is not recognised.
#[derive(Debug, Error, Eq, PartialEq)]
#[error("unknown connection mode {value:?}; expected \"ipv6\" or \"mycelium\"")]
pub struct UnknownConnectionMode {
    /// The rejected input value.
    pub value: String,
}

impl FromStr for ConnectionMode {
    type Err = UnknownConnectionMode;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.trim().to_lowercase().as_str() {
            "ipv6" => Ok(Self::Ipv6),
            "mycelium" => Ok(Self::Mycelium),
            _ => Err(UnknownConnectionMode {
                value: text.to_owned(),
            }),
        }
    }
}

/// One allocated storage backend, normalised for rendering.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackendDescriptor {
    /// Section the backend belongs to.
    pub role: BackendRole,
    /// Host selected by the configured connection mode. May be an IPv6
    /// literal or a mycelium overlay address.
    pub host: String,
    /// Namespace identifier, unique within its role, carrying a trailing
    /// numeric ordinal used for sort order.
    pub namespace: String,
    /// Deployment-wide backend password.
    pub password: String,
}

impl BackendDescriptor {
    /// Renders the backend endpoint as `[host]:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("[{}]:{BACKEND_PORT}", self.host)
    }

    /// Numeric ordinal embedded at the end of the namespace, if any.
    #[must_use]
    pub fn ordinal(&self) -> Option<u64> {
        namespace_ordinal(&self.namespace)
    }
}

/// Parses the trailing decimal digit run of a namespace as its ordinal.
///
/// Returns `None` when the namespace has no trailing digits or when the digit
/// run does not fit in a `u64`.
#[must_use]
pub fn namespace_ordinal(namespace: &str) -> Option<u64> {
    let digits: Vec<char> = namespace
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.iter().rev().collect::<String>().parse().ok()
}

/// Sorts descriptors by namespace ordinal, ascending, with the full namespace
/// as a tie-breaker.
///
/// The comparison is numeric, so `meta-2` sorts before `meta-10`. Descriptors
/// without a trailing ordinal sort first, ordered by namespace.
pub fn sort_descriptors(descriptors: &mut [BackendDescriptor]) {
    descriptors.sort_by(|left, right| {
        (left.ordinal(), &left.namespace).cmp(&(right.ordinal(), &right.namespace))
    });
}
