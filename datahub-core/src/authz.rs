//! Per-push service tokens.
//!
//! One [`AuthorizationCache`] lives for exactly one push call. Each service is
//! authorised at most once, even when concurrent uploads or presigns ask for
//! the token at the same time; afterwards the token is only read.

use tokio::sync::OnceCell;
use tracing::debug;

use crate::contract::{DataHubApi, Service};
use crate::error::PushError;

pub struct AuthorizationCache<'a, A: ?Sized> {
    api: &'a A,
    rawstore: OnceCell<String>,
    source: OnceCell<String>,
}

impl<'a, A: DataHubApi + ?Sized> AuthorizationCache<'a, A> {
    pub fn new(api: &'a A) -> Self {
        AuthorizationCache {
            api,
            rawstore: OnceCell::new(),
            source: OnceCell::new(),
        }
    }

    pub async fn token(&self, service: Service) -> Result<&str, PushError> {
        let cell = match service {
            Service::Rawstore => &self.rawstore,
            Service::Source => &self.source,
        };
        let token = cell
            .get_or_try_init(|| async {
                debug!(%service, "Authorizing for service");
                self.api.authorize(service).await
            })
            .await?;
        Ok(token.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockDataHubApi;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn authorizes_each_service_once() {
        let mut api = MockDataHubApi::new();
        api.expect_authorize()
            .with(eq(Service::Rawstore))
            .times(1)
            .returning(|_| Ok("raw.token".to_string()));
        api.expect_authorize()
            .with(eq(Service::Source))
            .times(1)
            .returning(|_| Ok("source.token".to_string()));

        let cache = AuthorizationCache::new(&api);
        let (a, b) = tokio::join!(cache.token(Service::Rawstore), cache.token(Service::Rawstore));
        assert_eq!(a.unwrap(), "raw.token");
        assert_eq!(b.unwrap(), "raw.token");
        assert_eq!(cache.token(Service::Source).await.unwrap(), "source.token");
    }

    #[tokio::test]
    async fn failed_authorization_propagates() {
        let mut api = MockDataHubApi::new();
        api.expect_authorize().returning(|_| {
            Err(PushError::Authorization {
                status: 401,
                status_text: "Unauthorized".into(),
            })
        });
        let cache = AuthorizationCache::new(&api);
        let err = cache.token(Service::Rawstore).await.unwrap_err();
        assert_eq!(err.to_string(), "Authz server: Unauthorized");
    }
}
