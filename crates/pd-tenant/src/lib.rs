//! Tenant context resolution.
//!
//! Every operation against tenant-owned data starts here: the resolver turns
//! the inbound security material into a [`TenantId`] before any query runs.
//! Resolution is pure and side-effect free so it can always be called ahead
//! of data access; if nothing resolves, the request fails closed with
//! [`CoreError::NoTenantContext`].

use pd_common::{CoreError, Result, TenantId};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Header a trusted upstream gateway uses to re-scope a request to a tenant.
pub const TENANT_SCOPE_HEADER: &str = "x-podium-tenant";

// ============================================================================
// Access Context
// ============================================================================

/// The identity under which data access runs.
///
/// `Tenant` is the normal request path. `System` is the explicit elevated
/// mode for background processes (migrations, the outbox relay scanning
/// across tenants) and is never the default; constructing one is logged so
/// elevated access stays auditable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessContext {
    Tenant(TenantId),
    System { actor: String },
}

impl AccessContext {
    pub fn tenant(id: TenantId) -> Self {
        AccessContext::Tenant(id)
    }

    pub fn system(actor: impl Into<String>) -> Self {
        let actor = actor.into();
        info!(actor = %actor, "elevated system access context created");
        AccessContext::System { actor }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        match self {
            AccessContext::Tenant(id) => Some(*id),
            AccessContext::System { .. } => None,
        }
    }
}

// ============================================================================
// Token Claims
// ============================================================================

/// Claims carried by an inbound bearer token once verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    /// Tenant-scope claim; present when the caller authenticates directly
    /// rather than through the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
}

/// Verifies bearer tokens at this service's boundary.
///
/// Validation includes the audience-exchange check: the token must be scoped
/// to *this* service's audience, not merely be generically valid, so a token
/// minted for one service boundary cannot be replayed against another.
pub struct TokenVerifier {
    decoding_key: jsonwebtoken::DecodingKey,
    validation: jsonwebtoken::Validation,
}

impl TokenVerifier {
    pub fn new(secret: &[u8], audience: &str) -> Self {
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_audience(&[audience]);
        Self {
            decoding_key: jsonwebtoken::DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<TokenClaims> {
        jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| CoreError::InvalidToken(e.to_string()))
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Security material extracted from an inbound request.
///
/// The caller (HTTP middleware, an external collaborator) assembles this;
/// the resolver only inspects it.
#[derive(Debug, Default)]
pub struct RequestSecurity<'a> {
    /// Raw value of [`TENANT_SCOPE_HEADER`], if present.
    pub gateway_header: Option<&'a str>,
    /// Verified token claims, if the request carried a valid bearer token.
    pub claims: Option<&'a TokenClaims>,
    /// Tenant pre-populated into request-scoped storage by earlier-running
    /// middleware, for intentionally public endpoints.
    pub scope_preset: Option<TenantId>,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Whether the deployment sits behind a gateway that is trusted to set
    /// the tenant-scope header. When false the header is ignored entirely.
    pub trust_gateway_header: bool,
    /// Deployment-level fallback tenant. None in multi-tenant deployments.
    pub fallback: Option<TenantId>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            trust_gateway_header: false,
            fallback: None,
        }
    }
}

/// Resolves the caller's tenant from [`RequestSecurity`], first match wins:
/// gateway header, then token claim, then request-scoped preset, then the
/// configured fallback.
pub struct TenantResolver {
    config: ResolverConfig,
}

impl TenantResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn resolve(&self, security: &RequestSecurity<'_>) -> Result<TenantId> {
        if self.config.trust_gateway_header {
            if let Some(raw) = security.gateway_header {
                return TenantId::parse(raw);
            }
        }

        if let Some(tenant) = security.claims.and_then(|c| c.tenant_id) {
            return Ok(tenant);
        }

        if let Some(tenant) = security.scope_preset {
            return Ok(tenant);
        }

        if let Some(tenant) = self.config.fallback {
            return Ok(tenant);
        }

        Err(CoreError::NoTenantContext)
    }

    /// Resolve straight to a tenant [`AccessContext`].
    pub fn resolve_context(&self, security: &RequestSecurity<'_>) -> Result<AccessContext> {
        self.resolve(security).map(AccessContext::Tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims_for(tenant: Option<TenantId>) -> TokenClaims {
        TokenClaims {
            sub: "competitor-7".to_string(),
            aud: "podium-core".to_string(),
            exp: (chrono::Utc::now().timestamp()) + 600,
            tenant_id: tenant,
        }
    }

    #[test]
    fn gateway_header_wins_when_trusted() {
        let header_tenant = TenantId::new();
        let claim_tenant = TenantId::new();
        let header = header_tenant.to_string();
        let claims = claims_for(Some(claim_tenant));

        let resolver = TenantResolver::new(ResolverConfig {
            trust_gateway_header: true,
            fallback: None,
        });
        let resolved = resolver
            .resolve(&RequestSecurity {
                gateway_header: Some(&header),
                claims: Some(&claims),
                scope_preset: None,
            })
            .unwrap();
        assert_eq!(resolved, header_tenant);
    }

    #[test]
    fn header_ignored_when_untrusted() {
        let header_tenant = TenantId::new();
        let claim_tenant = TenantId::new();
        let header = header_tenant.to_string();
        let claims = claims_for(Some(claim_tenant));

        let resolver = TenantResolver::new(ResolverConfig::default());
        let resolved = resolver
            .resolve(&RequestSecurity {
                gateway_header: Some(&header),
                claims: Some(&claims),
                scope_preset: None,
            })
            .unwrap();
        assert_eq!(resolved, claim_tenant);
    }

    #[test]
    fn preset_used_when_no_claim() {
        let preset = TenantId::new();
        let claims = claims_for(None);
        let resolver = TenantResolver::new(ResolverConfig::default());
        let resolved = resolver
            .resolve(&RequestSecurity {
                gateway_header: None,
                claims: Some(&claims),
                scope_preset: Some(preset),
            })
            .unwrap();
        assert_eq!(resolved, preset);
    }

    #[test]
    fn fails_closed_with_nothing_to_resolve() {
        let resolver = TenantResolver::new(ResolverConfig::default());
        let err = resolver.resolve(&RequestSecurity::default()).unwrap_err();
        assert!(matches!(err, CoreError::NoTenantContext));
    }

    #[test]
    fn fallback_applies_only_when_configured() {
        let fallback = TenantId::new();
        let resolver = TenantResolver::new(ResolverConfig {
            trust_gateway_header: false,
            fallback: Some(fallback),
        });
        let resolved = resolver.resolve(&RequestSecurity::default()).unwrap();
        assert_eq!(resolved, fallback);
    }

    #[test]
    fn malformed_header_is_rejected() {
        let resolver = TenantResolver::new(ResolverConfig {
            trust_gateway_header: true,
            fallback: None,
        });
        let err = resolver
            .resolve(&RequestSecurity {
                gateway_header: Some("not-a-tenant-id"),
                claims: None,
                scope_preset: None,
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn verifier_rejects_wrong_audience() {
        let secret = b"test-secret";
        let claims = claims_for(Some(TenantId::new()));
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(secret),
        )
        .unwrap();

        let right = TokenVerifier::new(secret, "podium-core");
        assert!(right.verify(&token).is_ok());

        let wrong = TokenVerifier::new(secret, "other-service");
        assert!(matches!(
            wrong.verify(&token).unwrap_err(),
            CoreError::InvalidToken(_)
        ));
    }

    #[test]
    fn system_context_has_no_tenant() {
        let ctx = AccessContext::system("outbox-relay");
        assert!(ctx.tenant_id().is_none());
    }
}
