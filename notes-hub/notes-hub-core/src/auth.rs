use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

/// Durable identifier of a document owner.
pub type UserId = String;

/// Per-call request data handed to an [`IdentityResolver`].
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    /// Raw bearer token, without the `Bearer ` prefix.
    pub bearer_token: Option<String>,
    /// User id asserted by a trusted front end.
    pub user_id: Option<String>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
            user_id: None,
        }
    }

    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            bearer_token: None,
            user_id: Some(user.into()),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct Claims {
    pub sub: String,
}

/// Resolves the caller behind a request, or `None` when unauthenticated.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, ctx: &RequestContext) -> Option<UserId>;
}

/// Accepts the user id carried on the context as-is.
pub struct TrustedUserResolver;

#[async_trait]
impl IdentityResolver for TrustedUserResolver {
    async fn resolve(&self, ctx: &RequestContext) -> Option<UserId> {
        ctx.user_id.clone().filter(|u| !u.is_empty())
    }
}

/// Verifies HS256 bearer tokens and takes the `sub` claim as the user id.
pub struct TokenIdentityResolver {
    key: DecodingKey,
    trust_user_id: bool,
}

impl TokenIdentityResolver {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            trust_user_id: false,
        }
    }

    /// Fall back to the context's user id when no valid token is present.
    pub fn allow_trusted_user(mut self, allow: bool) -> Self {
        self.trust_user_id = allow;
        self
    }

    pub fn verify(&self, token: &str) -> Option<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.key, &validation)
            .ok()
            .map(|d| d.claims)
            .filter(|c| !c.sub.is_empty())
    }
}

#[async_trait]
impl IdentityResolver for TokenIdentityResolver {
    async fn resolve(&self, ctx: &RequestContext) -> Option<UserId> {
        if let Some(claims) = ctx.bearer_token.as_deref().and_then(|t| self.verify(t)) {
            return Some(claims.sub);
        }
        if self.trust_user_id {
            return TrustedUserResolver.resolve(ctx).await;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: i64,
    }

    fn token(secret: &str, sub: &str, exp_offset: i64) -> String {
        let claims = TestClaims {
            sub: sub.to_string(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn trusted_resolver_uses_context_user() {
        let resolver = TrustedUserResolver;
        assert_eq!(
            resolver.resolve(&RequestContext::for_user("user1")).await,
            Some("user1".to_string())
        );
        assert_eq!(resolver.resolve(&RequestContext::anonymous()).await, None);
        assert_eq!(resolver.resolve(&RequestContext::for_user("")).await, None);
    }

    #[tokio::test]
    async fn token_resolver_accepts_valid_tokens() {
        let resolver = TokenIdentityResolver::new("secret");
        let ctx = RequestContext::with_token(token("secret", "alice", 3600));
        assert_eq!(resolver.resolve(&ctx).await, Some("alice".to_string()));
    }

    #[tokio::test]
    async fn token_resolver_rejects_bad_tokens() {
        let resolver = TokenIdentityResolver::new("secret");
        let wrong_key = RequestContext::with_token(token("other", "alice", 3600));
        assert_eq!(resolver.resolve(&wrong_key).await, None);
        let expired = RequestContext::with_token(token("secret", "alice", -3600));
        assert_eq!(resolver.resolve(&expired).await, None);
        let garbage = RequestContext::with_token("not-a-jwt");
        assert_eq!(resolver.resolve(&garbage).await, None);
        // user ids are ignored unless explicitly trusted
        assert_eq!(resolver.resolve(&RequestContext::for_user("bob")).await, None);
    }

    #[tokio::test]
    async fn token_resolver_can_fall_back_to_trusted_user() {
        let resolver = TokenIdentityResolver::new("secret").allow_trusted_user(true);
        assert_eq!(
            resolver.resolve(&RequestContext::for_user("bob")).await,
            Some("bob".to_string())
        );
        let ctx = RequestContext {
            bearer_token: Some(token("secret", "alice", 3600)),
            user_id: Some("bob".to_string()),
        };
        assert_eq!(resolver.resolve(&ctx).await, Some("alice".to_string()));
    }
}
