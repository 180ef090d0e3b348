//! OAuth connections to chat platforms and the access-token capability the
//! ingestion pollers consume.

use crate::error::CredentialError;
use crate::model::ChatPlatform;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const TWITCH_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
/// Appended to the Graph API base.
pub const FACEBOOK_TOKEN_PATH: &str = "/v18.0/oauth/access_token";

/// Lifetime of an exchanged Facebook token that reports none (60 days).
const FACEBOOK_DEFAULT_EXPIRES_IN: i64 = 5_184_000;

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct OAuthConnection {
    pub user_id: String,
    pub provider: ChatPlatform,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthConnection {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|at| at <= now + ChronoDuration::seconds(EXPIRY_SKEW_SECS))
    }
}

/// Token endpoint response of a refresh or exchange grant.
#[derive(Clone, Debug, Deserialize)]
pub struct RefreshedToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Given a user and a provider, returns a non-expired access token.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn valid_access_token(
        &self,
        user_id: &str,
        provider: ChatPlatform,
    ) -> Result<String, CredentialError>;
}

/// Trades an expired connection for a fresh access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, connection: &OAuthConnection) -> Result<RefreshedToken, CredentialError>;
}

/// How a provider renews its tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenGrant {
    /// `POST` form with `grant_type=refresh_token`; needs a refresh token.
    RefreshToken,
    /// `GET` with `grant_type=fb_exchange_token` on the current access token.
    FacebookExchange,
}

#[derive(Clone, Debug)]
pub struct OAuthClient {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub grant: TokenGrant,
}

/// Refreshes tokens against each provider's token endpoint.
pub struct OAuthRefresher {
    http: reqwest::Client,
    clients: HashMap<ChatPlatform, OAuthClient>,
}

impl OAuthRefresher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            clients: HashMap::new(),
        })
    }

    pub fn with_client(mut self, provider: ChatPlatform, client: OAuthClient) -> Self {
        self.clients.insert(provider, client);
        self
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, connection: &OAuthConnection) -> Result<RefreshedToken, CredentialError> {
        let provider = connection.provider;
        let expired = || CredentialError::Expired(provider.to_string());
        let Some(client) = self.clients.get(&provider) else {
            return Err(expired());
        };
        let failure = |message: String| CredentialError::Refresh {
            provider: provider.to_string(),
            message,
        };

        let request = match client.grant {
            TokenGrant::RefreshToken => {
                let refresh_token = connection.refresh_token.as_deref().ok_or_else(expired)?;
                self.http.post(&client.token_url).form(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", client.client_id.as_str()),
                    ("client_secret", client.client_secret.as_str()),
                ])
            }
            TokenGrant::FacebookExchange => self.http.get(&client.token_url).query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
                ("fb_exchange_token", connection.access_token.as_str()),
            ]),
        };

        let response = request
            .send()
            .await
            .map_err(|error| failure(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failure(format!("{status}: {body}")));
        }

        let mut token = response
            .json::<RefreshedToken>()
            .await
            .map_err(|error| failure(error.to_string()))?;
        if client.grant == TokenGrant::FacebookExchange {
            token.expires_in = token.expires_in.or(Some(FACEBOOK_DEFAULT_EXPIRES_IN));
        }
        Ok(token)
    }
}

type ConnectionKey = (String, ChatPlatform);

/// In-process OAuth connections, one per (user, provider).
///
/// Refreshes of one key are serialized, so concurrent pollers of the same
/// user trigger a single token refresh.
#[derive(Clone)]
pub struct CredentialStore {
    connections: Arc<RwLock<HashMap<ConnectionKey, OAuthConnection>>>,
    refresh_locks: Arc<SyncMutex<HashMap<ConnectionKey, Arc<Mutex<()>>>>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl CredentialStore {
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            connections: Default::default(),
            refresh_locks: Default::default(),
            refresher: Some(refresher),
        }
    }

    /// A store whose expired tokens are never refreshed.
    pub fn without_refresh() -> Self {
        Self {
            connections: Default::default(),
            refresh_locks: Default::default(),
            refresher: None,
        }
    }

    fn refresh_lock(&self, key: &ConnectionKey) -> Arc<Mutex<()>> {
        self.refresh_locks
            .lock()
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Saves or replaces the connection for its (user, provider).
    pub async fn save(&self, connection: OAuthConnection) {
        info!(user_id = connection.user_id, platform = %connection.provider, "OAuth connection saved");
        let key = (connection.user_id.clone(), connection.provider);
        self.connections.write().await.insert(key, connection);
    }

    pub async fn revoke(&self, user_id: &str, provider: ChatPlatform) -> bool {
        let key = (user_id.to_string(), provider);
        let removed = self.connections.write().await.remove(&key).is_some();
        self.refresh_locks.lock().remove(&key);
        if removed {
            info!(user_id, platform = %provider, "OAuth connection revoked");
        }
        removed
    }

    pub async fn connection(&self, user_id: &str, provider: ChatPlatform) -> Option<OAuthConnection> {
        self.connections
            .read()
            .await
            .get(&(user_id.to_string(), provider))
            .cloned()
    }
}

#[async_trait]
impl CredentialProvider for CredentialStore {
    async fn valid_access_token(
        &self,
        user_id: &str,
        provider: ChatPlatform,
    ) -> Result<String, CredentialError> {
        let connection = self
            .connection(user_id, provider)
            .await
            .ok_or_else(|| CredentialError::NotConnected(provider.to_string()))?;

        if !connection.is_expired(Utc::now()) {
            return Ok(connection.access_token);
        }
        let Some(refresher) = &self.refresher else {
            warn!(user_id, platform = %provider, "Access token expired without a way to refresh it");
            return Err(CredentialError::Expired(provider.to_string()));
        };

        let key = (user_id.to_string(), provider);
        let lock = self.refresh_lock(&key);
        let _refreshing = lock.lock().await;

        // whoever held the lock before may have refreshed already
        let connection = self
            .connection(user_id, provider)
            .await
            .ok_or_else(|| CredentialError::NotConnected(provider.to_string()))?;
        let now = Utc::now();
        if !connection.is_expired(now) {
            return Ok(connection.access_token);
        }

        debug!(user_id, platform = %provider, "Refreshing access token");
        let refreshed = refresher
            .refresh(&connection)
            .await
            .inspect_err(|error| warn!(user_id, platform = %provider, %error, "Token refresh failed"))?;

        let mut connections = self.connections.write().await;
        // a revoke that raced the refresh wins
        let Some(stored) = connections.get_mut(&key) else {
            return Err(CredentialError::NotConnected(provider.to_string()));
        };
        stored.access_token = refreshed.access_token.clone();
        if let Some(refresh_token) = refreshed.refresh_token {
            stored.refresh_token = Some(refresh_token);
        }
        stored.expires_at = refreshed
            .expires_in
            .map(|secs| now + ChronoDuration::seconds(secs));
        info!(user_id, platform = %provider, "Access token refreshed");

        Ok(refreshed.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::{Form, Query};
    use axum::routing::{get, post};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    struct CountingRefresher {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingRefresher {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, connection: &OAuthConnection) -> Result<RefreshedToken, CredentialError> {
            let Some(refresh_token) = connection.refresh_token.as_deref() else {
                return Err(CredentialError::Expired(connection.provider.to_string()));
            };
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            Ok(RefreshedToken {
                access_token: format!("fresh-{call}-{refresh_token}"),
                refresh_token: None,
                expires_in: Some(3600),
            })
        }
    }

    fn connection(expires_at: Option<DateTime<Utc>>, refresh_token: Option<&str>) -> OAuthConnection {
        OAuthConnection {
            user_id: "user-1".into(),
            provider: ChatPlatform::Youtube,
            access_token: "stored".into(),
            refresh_token: refresh_token.map(str::to_owned),
            expires_at,
        }
    }

    #[tokio::test]
    async fn missing_connection_is_not_connected() {
        let store = CredentialStore::without_refresh();
        let result = store.valid_access_token("user-1", ChatPlatform::Twitch).await;
        assert_eq!(result, Err(CredentialError::NotConnected("twitch".into())));
    }

    #[tokio::test]
    async fn unexpired_token_is_returned_as_is() {
        let store = CredentialStore::without_refresh();
        store
            .save(connection(Some(Utc::now() + ChronoDuration::hours(1)), None))
            .await;

        let token = store.valid_access_token("user-1", ChatPlatform::Youtube).await;
        assert_eq!(token.as_deref(), Ok("stored"));
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_once_and_stored() {
        let refresher = Arc::new(CountingRefresher::new());
        let store = CredentialStore::new(refresher.clone());
        store
            .save(connection(Some(Utc::now() - ChronoDuration::minutes(5)), Some("r1")))
            .await;

        let first = store.valid_access_token("user-1", ChatPlatform::Youtube).await;
        let second = store.valid_access_token("user-1", ChatPlatform::Youtube).await;

        assert_eq!(first.as_deref(), Ok("fresh-1-r1"));
        assert_eq!(second.as_deref(), Ok("fresh-1-r1"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        let stored = store.connection("user-1", ChatPlatform::Youtube).await.unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
        assert!(stored.expires_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token_is_expired() {
        let store = CredentialStore::new(Arc::new(CountingRefresher::new()));
        store
            .save(connection(Some(Utc::now() - ChronoDuration::minutes(5)), None))
            .await;

        let result = store.valid_access_token("user-1", ChatPlatform::Youtube).await;
        assert_eq!(result, Err(CredentialError::Expired("youtube".into())));
    }

    #[tokio::test]
    async fn revoked_connection_is_gone() {
        let store = CredentialStore::without_refresh();
        store.save(connection(None, None)).await;

        assert!(store.revoke("user-1", ChatPlatform::Youtube).await);
        assert!(!store.revoke("user-1", ChatPlatform::Youtube).await);
        assert!(
            store
                .valid_access_token("user-1", ChatPlatform::Youtube)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn refresher_without_client_reports_expired() {
        let refresher = OAuthRefresher::new(Duration::from_secs(1)).unwrap();
        let connection = OAuthConnection {
            provider: ChatPlatform::Facebook,
            ..connection(None, Some("r"))
        };
        let result = refresher.refresh(&connection).await;
        assert!(matches!(result, Err(CredentialError::Expired(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_refresh() {
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
        });
        let store = CredentialStore::new(refresher.clone());
        store
            .save(connection(Some(Utc::now() - ChronoDuration::minutes(5)), Some("r1")))
            .await;

        let (first, second) = tokio::join!(
            store.valid_access_token("user-1", ChatPlatform::Youtube),
            store.valid_access_token("user-1", ChatPlatform::Youtube),
        );

        assert_eq!(first.as_deref(), Ok("fresh-1-r1"));
        assert_eq!(second.as_deref(), Ok("fresh-1-r1"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn expired_facebook_token_is_exchanged() {
        let app = Router::new().route(
            FACEBOOK_TOKEN_PATH,
            get(|Query(query): Query<HashMap<String, String>>| async move {
                let expected = [
                    ("grant_type", "fb_exchange_token"),
                    ("client_id", "fb-app"),
                    ("client_secret", "fb-secret"),
                    ("fb_exchange_token", "short-lived"),
                ];
                if expected
                    .iter()
                    .any(|(k, v)| query.get(*k).map(String::as_str) != Some(*v))
                {
                    return (axum::http::StatusCode::BAD_REQUEST, axum::Json(json!({})));
                }
                (
                    axum::http::StatusCode::OK,
                    axum::Json(json!({"access_token": "long-lived", "token_type": "bearer"})),
                )
            }),
        );
        let base = serve(app).await;
        let refresher = OAuthRefresher::new(Duration::from_secs(5))
            .unwrap()
            .with_client(
                ChatPlatform::Facebook,
                OAuthClient {
                    token_url: format!("{base}{FACEBOOK_TOKEN_PATH}"),
                    client_id: "fb-app".into(),
                    client_secret: "fb-secret".into(),
                    grant: TokenGrant::FacebookExchange,
                },
            );
        let store = CredentialStore::new(Arc::new(refresher));
        store
            .save(OAuthConnection {
                provider: ChatPlatform::Facebook,
                access_token: "short-lived".into(),
                ..connection(Some(Utc::now() - ChronoDuration::minutes(1)), None)
            })
            .await;

        let token = store.valid_access_token("user-1", ChatPlatform::Facebook).await;

        assert_eq!(token.as_deref(), Ok("long-lived"));
        let stored = store.connection("user-1", ChatPlatform::Facebook).await.unwrap();
        assert!(stored.expires_at.unwrap() > Utc::now() + ChronoDuration::days(59));
    }

    #[tokio::test]
    async fn refresh_token_grant_posts_a_form() {
        let app = Router::new().route(
            "/token",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                let ok = form.get("grant_type").map(String::as_str) == Some("refresh_token")
                    && form.get("refresh_token").map(String::as_str) == Some("r1")
                    && form.get("client_id").map(String::as_str) == Some("google-app");
                if !ok {
                    return (axum::http::StatusCode::BAD_REQUEST, axum::Json(json!({})));
                }
                (
                    axum::http::StatusCode::OK,
                    axum::Json(json!({"access_token": "ya29.new", "expires_in": 3599})),
                )
            }),
        );
        let base = serve(app).await;
        let refresher = OAuthRefresher::new(Duration::from_secs(5))
            .unwrap()
            .with_client(
                ChatPlatform::Youtube,
                OAuthClient {
                    token_url: format!("{base}/token"),
                    client_id: "google-app".into(),
                    client_secret: "google-secret".into(),
                    grant: TokenGrant::RefreshToken,
                },
            );

        let token = refresher.refresh(&connection(None, Some("r1"))).await.unwrap();

        assert_eq!(token.access_token, "ya29.new");
        assert_eq!(token.expires_in, Some(3599));
        let missing = refresher.refresh(&connection(None, None)).await;
        assert_eq!(missing.unwrap_err(), CredentialError::Expired("youtube".into()));
    }
}
