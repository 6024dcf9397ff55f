// 🏢 Peer Entities - stable identity + per-source keys
//
// A peer is identified by its ticker (or internal key). Each source may know
// it under a different key (e.g. a database-specific company id), so the
// registry resolves incoming records through both.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Primary peer used for the headline statistics
pub const FLAG_SELECTED: &str = "selected";
/// Tight core set within the selected peers
pub const FLAG_CORE: &str = "core";
/// Peer kept only for sensitivity analysis
pub const FLAG_SENSITIVITY: &str = "sensitivity";

// ============================================================================
// PEER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    /// Ticker or internal key (e.g. "ASMI.AS")
    pub id: String,

    /// Human label (e.g. "ASM International")
    pub label: String,

    /// Source identifier → source-specific key
    #[serde(default)]
    pub external_ids: BTreeMap<String, String>,

    /// Declared selection flags ("selected", "core", "sensitivity", ...)
    #[serde(default)]
    pub flags: BTreeSet<String>,

    /// Why this peer is (or is not) in the set
    #[serde(default)]
    pub rationale: String,
}

impl Peer {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Peer {
            id: id.into(),
            label: label.into(),
            external_ids: BTreeMap::new(),
            flags: BTreeSet::new(),
            rationale: String::new(),
        }
    }

    /// Builder: add a source-specific key
    pub fn with_external_id(mut self, source: impl Into<String>, key: impl Into<String>) -> Self {
        self.external_ids.insert(source.into(), key.into());
        self
    }

    /// Builder: add a selection flag
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into().to_lowercase());
        self
    }

    /// Builder: add a selection rationale
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(&flag.to_lowercase())
    }

    pub fn is_selected(&self) -> bool {
        self.has_flag(FLAG_SELECTED)
    }

    pub fn is_core(&self) -> bool {
        self.has_flag(FLAG_CORE)
    }

    /// Does a record key from `source` refer to this peer?
    pub fn matches(&self, source: &str, key: &str) -> bool {
        let key = key.trim();
        if self.id.eq_ignore_ascii_case(key) {
            return true;
        }
        self.external_ids
            .get(source)
            .map_or(false, |ext| ext.eq_ignore_ascii_case(key))
    }
}

// ============================================================================
// PEER REGISTRY
// ============================================================================

/// The peer universe of one run, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Vec<Peer>,
}

impl PeerRegistry {
    pub fn new(peers: Vec<Peer>) -> Result<Self, ConfigError> {
        let mut seen = BTreeSet::new();
        for peer in &peers {
            if !seen.insert(peer.id.to_uppercase()) {
                return Err(ConfigError::DuplicatePeer(peer.id.clone()));
            }
        }
        Ok(PeerRegistry { peers })
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id.eq_ignore_ascii_case(id))
    }

    /// Resolve a record key from `source` to a peer
    ///
    /// An exact id match wins over an external-id match so that one
    /// source's key can never shadow another peer's ticker.
    pub fn resolve(&self, source: &str, key: &str) -> Option<&Peer> {
        let key = key.trim();
        self.get(key)
            .or_else(|| self.peers.iter().find(|p| p.matches(source, key)))
    }

    /// Peers carrying a selection flag
    pub fn with_flag<'a>(&'a self, flag: &'a str) -> impl Iterator<Item = &'a Peer> + 'a {
        self.peers.iter().filter(move |p| p.has_flag(flag))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PeerRegistry {
        PeerRegistry::new(vec![
            Peer::new("ASMI.AS", "ASM International")
                .with_external_id("compustat", "100432")
                .with_flag("selected")
                .with_flag("Core"),
            Peer::new("VPK.AS", "Vopak").with_rationale("Tank storage, limited overlap"),
        ])
        .unwrap()
    }

    #[test]
    fn test_resolve_by_id_and_external_key() {
        let reg = registry();

        assert_eq!(reg.resolve("yahoo", "asmi.as").unwrap().label, "ASM International");
        assert_eq!(reg.resolve("compustat", "100432").unwrap().id, "ASMI.AS");
        // External keys are per source
        assert!(reg.resolve("yahoo", "100432").is_none());
    }

    #[test]
    fn test_flags_are_case_insensitive() {
        let reg = registry();
        let asmi = reg.get("ASMI.AS").unwrap();

        assert!(asmi.is_selected());
        assert!(asmi.is_core());
        assert!(!reg.get("VPK.AS").unwrap().is_selected());
        assert_eq!(reg.with_flag(FLAG_SELECTED).count(), 1);
    }

    #[test]
    fn test_duplicate_peer_rejected() {
        let result = PeerRegistry::new(vec![Peer::new("ACME", "Acme"), Peer::new("acme", "Acme 2")]);
        assert_eq!(result.unwrap_err(), ConfigError::DuplicatePeer("acme".to_string()));
    }

    #[test]
    fn test_peer_matches() {
        let peer = Peer::new("BSL.DE", "Basler").with_external_id("compustat", "X1");
        assert!(peer.matches("any", " bsl.de "));
        assert!(peer.matches("compustat", "x1"));
        assert!(!peer.matches("other", "X1"));
    }
}
