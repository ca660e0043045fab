//! Canonical tenant/space identifier derivation.
//!
//! Derivation is pure: it never touches the store, so every scheme is
//! unit-testable in isolation. Callers depend on [`IdentifierScheme`] and
//! never on a concrete scheme.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix token of tenant-scoped identifiers.
pub const TENANT_PREFIX: &str = "tenant_";

/// Prefix token of space-scoped identifiers.
pub const SPACE_PREFIX: &str = "space_";

/// Namespace UUID for deterministic default-space identifiers.
const SPACEGRAPH_NS: Uuid = Uuid::from_bytes([
    0x3f, 0x1c, 0x8e, 0x52, 0x6a, 0x0b, 0x4d, 0x97, 0x9e, 0x21, 0x5c, 0x7d, 0x04, 0xb3, 0xa8, 0x6e,
]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeriveError {
    #[error("raw identifier {raw:?} has no identifier characters to synthesize from")]
    EmptyIdentifier { raw: String },
}

/// Legacy scalar inputs to a derivation.
#[derive(Debug, Clone, Copy)]
pub struct LegacyIdentity<'a> {
    /// The entity's own raw identifier.
    pub raw_id: &'a str,
    /// A pre-existing legacy tenant identifier, if any.
    pub legacy_tenant_id: Option<&'a str>,
}

/// Which branch produced a derivation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Derivation {
    /// Space id obtained by swapping the legacy tenant's prefix token.
    Legacy,
    /// Both ids synthesized from the raw entity identifier.
    Synthesized,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalIds {
    pub tenant_id: String,
    pub space_id: String,
    pub derivation: Derivation,
}

/// A rule turning legacy identifiers into canonical tenant/space identifiers.
pub trait IdentifierScheme: Send + Sync {
    /// Short name recorded in run reports.
    fn name(&self) -> &'static str;

    fn derive(&self, identity: &LegacyIdentity<'_>) -> Result<CanonicalIds, DeriveError>;
}

/// Swap the tenant prefix for the space prefix, or synthesize from the raw id
/// with separators stripped.
///
/// The synthesized branch is not collision-free (`u-1` and `u1` collide);
/// the backfill engine checks uniqueness before writing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixSwapScheme;

impl IdentifierScheme for PrefixSwapScheme {
    fn name(&self) -> &'static str {
        "prefix_swap"
    }

    fn derive(&self, identity: &LegacyIdentity<'_>) -> Result<CanonicalIds, DeriveError> {
        if let Some(ids) = from_legacy_tenant(identity) {
            return Ok(ids);
        }

        let clean = strip_separators(identity.raw_id);
        if clean.is_empty() {
            return Err(DeriveError::EmptyIdentifier {
                raw: identity.raw_id.to_string(),
            });
        }

        Ok(CanonicalIds {
            tenant_id: format!("{TENANT_PREFIX}{clean}"),
            space_id: format!("{SPACE_PREFIX}{clean}"),
            derivation: Derivation::Synthesized,
        })
    }
}

/// Like [`PrefixSwapScheme`], but the synthesized branch is content-derived
/// from a BLAKE3 digest of the raw identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashedScheme;

impl IdentifierScheme for HashedScheme {
    fn name(&self) -> &'static str {
        "hashed"
    }

    fn derive(&self, identity: &LegacyIdentity<'_>) -> Result<CanonicalIds, DeriveError> {
        if let Some(ids) = from_legacy_tenant(identity) {
            return Ok(ids);
        }
        if identity.raw_id.trim().is_empty() {
            return Err(DeriveError::EmptyIdentifier {
                raw: identity.raw_id.to_string(),
            });
        }

        let digest = blake3::hash(identity.raw_id.as_bytes()).to_hex();
        let short = &digest.as_str()[..24];
        Ok(CanonicalIds {
            tenant_id: format!("{TENANT_PREFIX}{short}"),
            space_id: format!("{SPACE_PREFIX}{short}"),
            derivation: Derivation::Synthesized,
        })
    }
}

fn from_legacy_tenant(identity: &LegacyIdentity<'_>) -> Option<CanonicalIds> {
    let tenant = identity.legacy_tenant_id.map(str::trim).filter(|t| !t.is_empty())?;
    Some(CanonicalIds {
        tenant_id: tenant.to_string(),
        space_id: space_for_tenant(tenant),
        derivation: Derivation::Legacy,
    })
}

/// Space identifier paired with a tenant identifier.
pub fn space_for_tenant(tenant_id: &str) -> String {
    match tenant_id.strip_prefix(TENANT_PREFIX) {
        Some(rest) => format!("{SPACE_PREFIX}{rest}"),
        None => format!("{SPACE_PREFIX}{tenant_id}"),
    }
}

/// Inverse of [`space_for_tenant`] for prefixed tenant identifiers.
pub fn tenant_for_space(space_id: &str) -> Option<String> {
    space_id
        .strip_prefix(SPACE_PREFIX)
        .map(|rest| format!("{TENANT_PREFIX}{rest}"))
}

/// Deterministic identifier of the default Space synthesized for an Organization.
pub fn default_space_id(organization_id: &str) -> String {
    let id = Uuid::new_v5(
        &SPACEGRAPH_NS,
        format!("default-space:{organization_id}").as_bytes(),
    );
    format!("{SPACE_PREFIX}{}", id.simple())
}

fn strip_separators(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity<'a>(raw_id: &'a str, legacy: Option<&'a str>) -> LegacyIdentity<'a> {
        LegacyIdentity {
            raw_id,
            legacy_tenant_id: legacy,
        }
    }

    #[test]
    fn legacy_tenant_swaps_prefix() {
        let ids = PrefixSwapScheme
            .derive(&identity("u1", Some("tenant_123")))
            .unwrap();
        assert_eq!(ids.tenant_id, "tenant_123");
        assert_eq!(ids.space_id, "space_123");
        assert_eq!(ids.derivation, Derivation::Legacy);
    }

    #[test]
    fn empty_legacy_tenant_falls_back_to_synthesis() {
        let ids = PrefixSwapScheme
            .derive(&identity("user-4f2a_9", Some("  ")))
            .unwrap();
        assert_eq!(ids.tenant_id, "tenant_user4f2a9");
        assert_eq!(ids.space_id, "space_user4f2a9");
        assert_eq!(ids.derivation, Derivation::Synthesized);
    }

    #[test]
    fn unprefixed_legacy_tenant_gets_space_prefix() {
        assert_eq!(space_for_tenant("acme"), "space_acme");
        assert_eq!(tenant_for_space("space_123").as_deref(), Some("tenant_123"));
        assert_eq!(tenant_for_space(&space_for_tenant("tenant_9")).as_deref(), Some("tenant_9"));
    }

    #[test]
    fn identifier_without_usable_characters_is_rejected() {
        let err = PrefixSwapScheme.derive(&identity("--", None)).unwrap_err();
        assert_eq!(err, DeriveError::EmptyIdentifier { raw: "--".into() });
        assert!(HashedScheme.derive(&identity(" ", None)).is_err());
    }

    #[test]
    fn prefix_swap_synthesis_can_collide_but_hashed_does_not() {
        let a = PrefixSwapScheme.derive(&identity("u-1", None)).unwrap();
        let b = PrefixSwapScheme.derive(&identity("u1", None)).unwrap();
        assert_eq!(a.space_id, b.space_id);

        let a = HashedScheme.derive(&identity("u-1", None)).unwrap();
        let b = HashedScheme.derive(&identity("u1", None)).unwrap();
        assert_ne!(a.space_id, b.space_id);
        assert_eq!(a.space_id.len(), SPACE_PREFIX.len() + 24);
    }

    #[test]
    fn hashed_scheme_keeps_legacy_branch() {
        let ids = HashedScheme
            .derive(&identity("u1", Some("tenant_123")))
            .unwrap();
        assert_eq!(ids.space_id, "space_123");
    }

    #[test]
    fn default_space_id_is_stable_per_organization() {
        assert_eq!(default_space_id("org_2"), default_space_id("org_2"));
        assert_ne!(default_space_id("org_2"), default_space_id("org_3"));
        assert!(default_space_id("org_2").starts_with(SPACE_PREFIX));
    }
}
