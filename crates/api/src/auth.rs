//! Tenant authentication
//!
//! Every tenant-scoped route receives an [`AuthUser`] extension carrying the
//! authenticated tenant context. Cross-tenant access is impossible by
//! construction: handlers never take a tenant id from the request, only from
//! the verified token.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use slotwise_billing::TenantContext;
use slotwise_shared::types::{TenantId, UserId};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// JWT claims issued by the identity layer
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    /// Tenant the user belongs to; platform admins may have none
    pub tenant_id: Option<Uuid>,
    /// Platform super-admin flag
    #[serde(default)]
    pub super_admin: bool,
    /// Expiry, unix seconds
    pub exp: i64,
}

/// Authenticated identity attached to each request
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub is_super_admin: bool,
}

impl AuthUser {
    /// The capability every billing read or write requires.
    pub fn context(&self) -> Result<TenantContext, ApiError> {
        let tenant_id = TenantId(self.tenant_id.ok_or(ApiError::NoTenant)?);
        let user_id = Some(UserId(self.user_id));
        Ok(if self.is_super_admin {
            TenantContext::super_admin(tenant_id, user_id)
        } else {
            TenantContext::new(tenant_id, user_id)
        })
    }

    /// Context for acting on an arbitrary tenant; super-admin only.
    pub fn context_for_tenant(&self, tenant_id: Uuid) -> Result<TenantContext, ApiError> {
        if !self.is_super_admin {
            return Err(ApiError::Forbidden);
        }
        Ok(TenantContext::super_admin(
            TenantId(tenant_id),
            Some(UserId(self.user_id)),
        ))
    }
}

/// Verify the bearer token and attach the authenticated identity.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "Token verification failed");
        ApiError::InvalidToken
    })?;

    let auth_user = AuthUser {
        user_id: data.claims.sub,
        tenant_id: data.claims.tenant_id,
        is_super_admin: data.claims.super_admin,
    };

    req.extensions_mut().insert(auth_user);
    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn test_claims_round_trip() {
        let secret = "test-secret-that-is-long-enough-000";
        let claims = Claims {
            sub: Uuid::new_v4(),
            tenant_id: Some(Uuid::new_v4()),
            super_admin: false,
            exp: time::OffsetDateTime::now_utc().unix_timestamp() + 3600,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();

        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .unwrap();

        assert_eq!(decoded.claims.sub, claims.sub);
        assert_eq!(decoded.claims.tenant_id, claims.tenant_id);
        assert!(!decoded.claims.super_admin);
    }

    #[test]
    fn test_super_admin_defaults_to_false() {
        let json = serde_json::json!({
            "sub": Uuid::new_v4(),
            "tenant_id": null,
            "exp": 2_000_000_000i64,
        });
        let claims: Claims = serde_json::from_value(json).unwrap();
        assert!(!claims.super_admin);
    }

    #[test]
    fn test_context_requires_tenant() {
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            tenant_id: None,
            is_super_admin: false,
        };
        assert!(matches!(user.context(), Err(ApiError::NoTenant)));
    }

    #[test]
    fn test_context_for_tenant_requires_super_admin() {
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            tenant_id: None,
            is_super_admin: false,
        };
        assert!(matches!(
            user.context_for_tenant(Uuid::new_v4()),
            Err(ApiError::Forbidden)
        ));
    }
}
