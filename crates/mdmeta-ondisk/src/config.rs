//! Decode options shared by every record codec.

use serde::{Deserialize, Serialize};

/// Knobs for the `decode_*_with` functions.
///
/// The plain `decode_*` functions use [`DecodeOptions::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    /// Verify record checksums (superblocks, PPL header, R5-log blocks).
    pub verify_checksums: bool,
    /// Reject out-of-range and reserved roles instead of degrading them.
    pub strict_roles: bool,
    /// Verify PPL entry payload CRCs when the payload follows the header in the buffer.
    pub verify_ppl_payloads: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            strict_roles: false,
            verify_ppl_payloads: true,
        }
    }
}

impl DecodeOptions {
    /// Options for forensic reads of damaged images: no checksum checks.
    pub fn unchecked() -> Self {
        Self {
            verify_checksums: false,
            strict_roles: false,
            verify_ppl_payloads: false,
        }
    }

    /// Default options with strict role decoding.
    pub fn strict() -> Self {
        Self {
            strict_roles: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = DecodeOptions::default();
        assert!(opts.verify_checksums);
        assert!(!opts.strict_roles);
        assert!(opts.verify_ppl_payloads);
    }

    #[test]
    fn test_presets() {
        assert!(!DecodeOptions::unchecked().verify_checksums);
        assert!(DecodeOptions::strict().strict_roles);
        assert!(DecodeOptions::strict().verify_checksums);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let opts: DecodeOptions = serde_json::from_str(r#"{"strict_roles": true}"#).unwrap();
        assert!(opts.strict_roles);
        assert!(opts.verify_checksums);
        assert!(opts.verify_ppl_payloads);
    }
}
