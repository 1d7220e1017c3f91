//! Centralized configuration and builder for SnapGraph.
//!
//! Goals:
//! - Single place to collect codec/store tunables instead of scattering env lookups.
//! - SnapConfig::from_env() reads SNAPGRAPH_* variables; SnapBuilder starts from env
//!   and allows overrides.
//!
//! Tunables:
//! - strict_refs (SNAPGRAPH_STRICT_REFS, default true): a reference to a structural
//!   object that is not reachable from the snapshot root is a contract violation.
//!   With false, an EPHEMERAL object of that kind is promoted to a freestanding one.
//! - max_depth (SNAPGRAPH_MAX_DEPTH, default 64): container nesting limit for
//!   encode and decode.
//! - pretty_json (SNAPGRAPH_PRETTY, default false): pretty JSON in the record store.
//! - verify_crc (SNAPGRAPH_VERIFY_CRC, default true): check the envelope CRC on read.

use std::fmt;

pub const DEFAULT_MAX_DEPTH: usize = 64;

#[derive(Clone, Debug)]
pub struct SnapConfig {
    /// Env: SNAPGRAPH_STRICT_REFS (default true; "0|false|off|no" => false)
    pub strict_refs: bool,

    /// Env: SNAPGRAPH_MAX_DEPTH (default 64, 0 is ignored)
    pub max_depth: usize,

    /// Env: SNAPGRAPH_PRETTY (default false)
    pub pretty_json: bool,

    /// Env: SNAPGRAPH_VERIFY_CRC (default true)
    pub verify_crc: bool,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            strict_refs: true,
            max_depth: DEFAULT_MAX_DEPTH,
            pretty_json: false,
            verify_crc: true,
        }
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

impl SnapConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SNAPGRAPH_STRICT_REFS") {
            if let Some(on) = parse_flag(&v) {
                cfg.strict_refs = on;
            }
        }

        if let Ok(v) = std::env::var("SNAPGRAPH_MAX_DEPTH") {
            if let Ok(n) = v.trim().parse::<usize>() {
                if n > 0 {
                    cfg.max_depth = n;
                }
            }
        }

        if let Ok(v) = std::env::var("SNAPGRAPH_PRETTY") {
            if let Some(on) = parse_flag(&v) {
                cfg.pretty_json = on;
            }
        }

        if let Ok(v) = std::env::var("SNAPGRAPH_VERIFY_CRC") {
            if let Some(on) = parse_flag(&v) {
                cfg.verify_crc = on;
            }
        }

        cfg
    }

    pub fn with_strict_refs(mut self, on: bool) -> Self {
        self.strict_refs = on;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    pub fn with_pretty_json(mut self, on: bool) -> Self {
        self.pretty_json = on;
        self
    }

    pub fn with_verify_crc(mut self, on: bool) -> Self {
        self.verify_crc = on;
        self
    }

    pub fn builder() -> SnapBuilder {
        SnapBuilder::new()
    }
}

impl fmt::Display for SnapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SnapConfig {{ strict_refs: {}, max_depth: {}, pretty_json: {}, verify_crc: {} }}",
            self.strict_refs, self.max_depth, self.pretty_json, self.verify_crc,
        )
    }
}

/// Lightweight builder that produces a SnapConfig.
#[derive(Clone, Debug)]
pub struct SnapBuilder {
    cfg: SnapConfig,
}

impl Default for SnapBuilder {
    fn default() -> Self {
        // Start from env, then allow overrides.
        Self {
            cfg: SnapConfig::from_env(),
        }
    }
}

impl SnapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: SnapConfig::default(),
        }
    }

    pub fn strict_refs(mut self, on: bool) -> Self {
        self.cfg.strict_refs = on;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.cfg.max_depth = depth.max(1);
        self
    }

    pub fn pretty_json(mut self, on: bool) -> Self {
        self.cfg.pretty_json = on;
        self
    }

    pub fn verify_crc(mut self, on: bool) -> Self {
        self.cfg.verify_crc = on;
        self
    }

    pub fn build(self) -> SnapConfig {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_strict() {
        let c = SnapConfig::default();
        assert!(c.strict_refs);
        assert!(c.verify_crc);
        assert!(!c.pretty_json);
        assert_eq!(c.max_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn builder_overrides() {
        let c = SnapBuilder::from_default()
            .strict_refs(false)
            .max_depth(0)
            .pretty_json(true)
            .build();
        assert!(!c.strict_refs);
        assert_eq!(c.max_depth, 1, "depth is clamped to at least 1");
        assert!(c.pretty_json);
        assert!(c.to_string().contains("strict_refs: false"));
    }

    #[test]
    fn flag_parsing() {
        assert_eq!(parse_flag(" YES "), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
