//! Calling-principal extraction: tenant, user, and role.
//!
//! Generalizes `crate::extractor::AuthUser` (which only carries a bare
//! integer `user_id` and a free-form `role: String`) to the quota domain's
//! needs: a tenant (`business_name`) and a closed operator/end-user
//! distinction, since spec.md §4.7 hinges on rejecting end-user callers
//! from enrollment creation.

use axum::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use super::model::Scope;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// A tenant operator: may create/list/get enrollments and usages for
    /// any user under its business.
    Operator,
    /// An end-user: reads are scoped to their own user_id; enrollment
    /// creation is forbidden (spec.md §4.7).
    EndUser,
}

#[derive(Deserialize)]
struct Claims {
    sub: Uuid,
    business_name: String,
    role: String,
    #[allow(dead_code)]
    exp: usize,
}

#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub business_name: String,
    pub role: Role,
}

impl Principal {
    /// The `Scope` a read made by this principal is restricted to.
    pub fn scope(&self) -> Scope {
        Scope {
            business_name: self.business_name.clone(),
            user_id: match self.role {
                Role::Operator => None,
                Role::EndUser => Some(self.user_id),
            },
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or((StatusCode::UNAUTHORIZED, "Missing token".into()))?;

        let secret = crate::config::JWT_SECRET.as_str();
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid token".into()))?;

        let role = match decoded.claims.role.as_str() {
            "operator" => Role::Operator,
            "user" => Role::EndUser,
            other => {
                return Err((
                    StatusCode::UNAUTHORIZED,
                    format!("Unknown principal role: {other}"),
                ))
            }
        };

        Ok(Principal {
            user_id: decoded.claims.sub,
            business_name: decoded.claims.business_name,
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::Request, RequestPartsExt};
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(role: &str) -> String {
        let uid = Uuid::new_v4();
        let claims = serde_json::json!({
            "sub": uid,
            "business_name": "acme",
            "role": role,
            "exp": 9999999999u64,
        });
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap()
    }

    #[tokio::test]
    async fn operator_scope_has_no_user_restriction() {
        std::env::set_var("JWT_SECRET", "secret");
        let token = token_for("operator");
        let request = Request::builder()
            .header("Authorization", format!("Bearer {token}"))
            .body(axum::body::Body::empty())
            .unwrap();
        let mut parts = request.into_parts().0;
        let principal = Principal::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(principal.role, Role::Operator);
        assert!(principal.scope().user_id.is_none());
    }

    #[tokio::test]
    async fn end_user_scope_is_restricted_to_self() {
        std::env::set_var("JWT_SECRET", "secret");
        let token = token_for("user");
        let request = Request::builder()
            .header("Authorization", format!("Bearer {token}"))
            .body(axum::body::Body::empty())
            .unwrap();
        let mut parts = request.into_parts().0;
        let principal = Principal::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(principal.role, Role::EndUser);
        assert_eq!(principal.scope().user_id, Some(principal.user_id));
    }
}
