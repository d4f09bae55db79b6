//! Object identifiers.

use crate::error::BridgeError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// An SNMP object identifier.
///
/// Ordering is lexicographic over the sub-identifiers, which is the order
/// GETNEXT walks in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(arcs: impl Into<Vec<u32>>) -> Self {
        Self(arcs.into())
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A new OID with `arcs` appended.
    pub fn child(&self, arcs: &[u32]) -> Oid {
        let mut out = self.0.clone();
        out.extend_from_slice(arcs);
        Oid(out)
    }

    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Sub-identifiers following `prefix`, if this OID lies under it.
    pub fn suffix_after(&self, prefix: &Oid) -> Option<&[u32]> {
        self.0.strip_prefix(prefix.0.as_slice())
    }
}

impl From<&[u32]> for Oid {
    fn from(arcs: &[u32]) -> Self {
        Oid(arcs.to_vec())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", arc)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Err(BridgeError::InvalidOid(s.to_string()));
        }
        trimmed
            .split('.')
            .map(|arc| arc.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map(Oid)
            .map_err(|_| BridgeError::InvalidOid(s.to_string()))
    }
}

impl Serialize for Oid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Encode a variable-length OCTET STRING table index: length, then bytes.
pub fn encode_string_index(index: &str) -> Vec<u32> {
    let bytes = index.as_bytes();
    let mut arcs = Vec::with_capacity(bytes.len() + 1);
    arcs.push(bytes.len() as u32);
    arcs.extend(bytes.iter().map(|&b| u32::from(b)));
    arcs
}

/// Reverse of [`encode_string_index`]. `None` unless `arcs` is exactly one
/// well-formed UTF-8 index.
pub fn decode_string_index(arcs: &[u32]) -> Option<String> {
    let (&len, rest) = arcs.split_first()?;
    if rest.len() != len as usize {
        return None;
    }
    let bytes = rest
        .iter()
        .map(|&arc| u8::try_from(arc).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}
