//! OAuth token persistence and refresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use tracing::{error, info, instrument};

use pacer_core::TokenProvider;
use pacer_domain::config::FeedConfig;
use pacer_domain::{PacerError, Result};

use crate::database::activity_store::{db_err, rfc3339, run_blocking};
use crate::database::DbManager;

/// Tokens expiring within this many seconds are refreshed proactively, so a
/// token handed to a caller never dies mid-request.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// One athlete's stored OAuth credentials.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds at which `access_token` expires.
    pub expires_at: i64,
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshGrantResponse {
    access_token: String,
    refresh_token: String,
    expires_at: i64,
}

/// [`TokenProvider`] backed by the `oauth_tokens` table.
///
/// Refresh grants go to the configured token endpoint; renewed credentials
/// are persisted before being handed out, so a crash between refresh and
/// use never strands a revoked refresh token.
#[derive(Clone)]
pub struct SqliteTokenProvider {
    db: Arc<DbManager>,
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl SqliteTokenProvider {
    pub fn new(db: Arc<DbManager>, config: &FeedConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| PacerError::Config(format!("http client construction: {e}")))?;

        Ok(Self {
            db,
            http,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    /// Store or replace one athlete's credentials (initial connect flow).
    pub async fn store_tokens(&self, athlete_id: i64, tokens: TokenSet) -> Result<()> {
        let db = Arc::clone(&self.db);
        run_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT INTO oauth_tokens
                     (athlete_id, access_token, refresh_token, expires_at, scope, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(athlete_id) DO UPDATE SET
                     access_token = excluded.access_token,
                     refresh_token = excluded.refresh_token,
                     expires_at = excluded.expires_at,
                     scope = excluded.scope,
                     updated_at = excluded.updated_at",
                params![
                    athlete_id,
                    tokens.access_token,
                    tokens.refresh_token,
                    tokens.expires_at,
                    tokens.scope,
                    rfc3339(Utc::now()),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    /// Remove one athlete's credentials (disconnect flow).
    pub async fn remove_tokens(&self, athlete_id: i64) -> Result<()> {
        let db = Arc::clone(&self.db);
        run_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute(
                "DELETE FROM oauth_tokens WHERE athlete_id = ?1",
                params![athlete_id],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn load_tokens(&self, athlete_id: i64) -> Result<Option<TokenSet>> {
        let db = Arc::clone(&self.db);
        run_blocking(move || {
            let conn = db.get_connection()?;
            conn.query_row(
                "SELECT access_token, refresh_token, expires_at, scope
                 FROM oauth_tokens WHERE athlete_id = ?1",
                params![athlete_id],
                |row| {
                    Ok(TokenSet {
                        access_token: row.get(0)?,
                        refresh_token: row.get(1)?,
                        expires_at: row.get(2)?,
                        scope: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    #[instrument(skip(self, tokens))]
    async fn refresh_and_persist(&self, athlete_id: i64, tokens: TokenSet) -> Result<String> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", tokens.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PacerError::Network(format!("token refresh request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(athlete_id, %status, "token refresh rejected");
            return Err(PacerError::Unauthorized(format!(
                "token refresh failed with {status}: {body}"
            )));
        }

        let grant: RefreshGrantResponse = response
            .json()
            .await
            .map_err(|e| PacerError::Upstream(format!("token refresh body decode: {e}")))?;

        let renewed = TokenSet {
            access_token: grant.access_token.clone(),
            refresh_token: grant.refresh_token,
            expires_at: grant.expires_at,
            scope: tokens.scope,
        };
        self.store_tokens(athlete_id, renewed).await?;
        info!(athlete_id, "access token refreshed");
        Ok(grant.access_token)
    }
}

#[async_trait]
impl TokenProvider for SqliteTokenProvider {
    async fn access_token(&self, athlete_id: i64) -> Result<String> {
        let tokens = self
            .load_tokens(athlete_id)
            .await?
            .ok_or_else(|| PacerError::Unauthorized(format!("athlete {athlete_id} not connected")))?;

        if tokens.expires_at - EXPIRY_MARGIN_SECS > Utc::now().timestamp() {
            return Ok(tokens.access_token);
        }
        self.refresh_and_persist(athlete_id, tokens).await
    }

    async fn refresh_token(&self, athlete_id: i64) -> Result<String> {
        let tokens = self
            .load_tokens(athlete_id)
            .await?
            .ok_or_else(|| PacerError::Unauthorized(format!("athlete {athlete_id} not connected")))?;
        self.refresh_and_persist(athlete_id, tokens).await
    }

    async fn connected_athletes(&self) -> Result<Vec<i64>> {
        let db = Arc::clone(&self.db);
        run_blocking(move || {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare("SELECT athlete_id FROM oauth_tokens ORDER BY athlete_id")
                .map_err(db_err)?;
            let ids = stmt
                .query_map([], |row| row.get(0))
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<i64>, _>>()
                .map_err(db_err)?;
            Ok(ids)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(token_url: &str) -> SqliteTokenProvider {
        let config = FeedConfig {
            token_url: token_url.to_string(),
            client_id: "client-1".to_string(),
            client_secret: "secret-1".to_string(),
            ..FeedConfig::default()
        };
        SqliteTokenProvider::new(Arc::new(DbManager::in_memory().unwrap()), &config).unwrap()
    }

    fn tokens(expires_in_secs: i64) -> TokenSet {
        TokenSet {
            access_token: "access-old".to_string(),
            refresh_token: "refresh-old".to_string(),
            expires_at: Utc::now().timestamp() + expires_in_secs,
            scope: Some("activity:read_all".to_string()),
        }
    }

    #[tokio::test]
    async fn valid_token_is_returned_without_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let provider = provider(&server.uri());
        provider.store_tokens(7, tokens(3600)).await.unwrap();

        assert_eq!(provider.access_token(7).await.unwrap(), "access-old");
    }

    #[tokio::test]
    async fn near_expiry_token_is_refreshed_and_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-new",
                "refresh_token": "refresh-new",
                "expires_at": Utc::now().timestamp() + 21600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server.uri());
        // 30s left is inside the proactive-refresh margin.
        provider.store_tokens(7, tokens(30)).await.unwrap();

        assert_eq!(provider.access_token(7).await.unwrap(), "access-new");

        let stored = provider.load_tokens(7).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "access-new");
        assert_eq!(stored.refresh_token, "refresh-new");
    }

    #[tokio::test]
    async fn forced_refresh_ignores_apparent_validity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-new",
                "refresh_token": "refresh-new",
                "expires_at": Utc::now().timestamp() + 21600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server.uri());
        provider.store_tokens(7, tokens(3600)).await.unwrap();

        assert_eq!(provider.refresh_token(7).await.unwrap(), "access-new");
    }

    #[tokio::test]
    async fn rejected_refresh_maps_to_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid grant"))
            .mount(&server)
            .await;

        let provider = provider(&server.uri());
        provider.store_tokens(7, tokens(0)).await.unwrap();

        let err = provider.access_token(7).await.unwrap_err();
        assert!(matches!(err, PacerError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn unknown_athlete_is_unauthorized() {
        let provider = provider("http://localhost:9");
        let err = provider.access_token(404).await.unwrap_err();
        assert!(matches!(err, PacerError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn connected_athletes_lists_stored_rows() {
        let provider = provider("http://localhost:9");
        provider.store_tokens(3, tokens(3600)).await.unwrap();
        provider.store_tokens(1, tokens(3600)).await.unwrap();
        provider.store_tokens(2, tokens(3600)).await.unwrap();
        provider.remove_tokens(2).await.unwrap();

        assert_eq!(provider.connected_athletes().await.unwrap(), vec![1, 3]);
    }
}
