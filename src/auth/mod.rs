//! OAuth credential refresh.
//!
//! A token is refresh-eligible when a refresh token is present and the
//! expiry is within five minutes of now (or missing). Refresh is
//! dispatched by provider; refreshed values are written back to the
//! metadata store, and a failed write is tolerated for the current
//! invocation.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::OAuthConfig;
use crate::error::{Error, Result};
use crate::storage::{SqliteStore, UserAutomation};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const TIKTOK_TOKEN_URL: &str = "https://open.tiktokapis.com/v2/oauth/token/";

/// Expiry skew: tokens this close to expiring are refreshed up front.
const EXPIRY_SKEW_MINUTES: i64 = 5;

/// The outcome of one provider refresh.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    /// New refresh token when the provider rotated it.
    pub refresh_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
}

/// Whether the record's token needs refreshing before use.
pub fn needs_refresh(record: &UserAutomation, now: DateTime<Utc>) -> bool {
    if record.refresh_token.as_deref().unwrap_or("").is_empty() {
        return false;
    }
    match record.token_expiry {
        Some(expiry) => expiry - now < Duration::minutes(EXPIRY_SKEW_MINUTES),
        None => true,
    }
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TikTokTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Dispatch a refresh by provider. Unknown providers skip refresh and
/// keep the existing access token.
pub async fn refresh_token(
    client: &Client,
    oauth: &OAuthConfig,
    provider: &str,
    refresh_token: &str,
) -> Result<Option<RefreshedToken>> {
    match provider {
        "google" => refresh_google(client, oauth, refresh_token).await.map(Some),
        "tiktok" => refresh_tiktok(client, oauth, refresh_token).await.map(Some),
        other => {
            info!(provider = %other, "no refresh flow for provider, using existing token");
            Ok(None)
        }
    }
}

async fn refresh_google(
    client: &Client,
    oauth: &OAuthConfig,
    refresh_token: &str,
) -> Result<RefreshedToken> {
    let client_id = oauth.google_client_id.as_deref().ok_or_else(|| Error::Auth {
        provider: "google".to_string(),
        reason: "google client id not configured".to_string(),
    })?;
    let client_secret = oauth
        .google_client_secret
        .as_deref()
        .ok_or_else(|| Error::Auth {
            provider: "google".to_string(),
            reason: "google client secret not configured".to_string(),
        })?;

    let response = client
        .post(GOOGLE_TOKEN_URL)
        .form(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await
        .map_err(|e| Error::Auth {
            provider: "google".to_string(),
            reason: e.to_string(),
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Auth {
            provider: "google".to_string(),
            reason: format!("token endpoint returned {}: {}", status, body),
        });
    }

    let parsed: GoogleTokenResponse = response.json().await.map_err(|e| Error::Auth {
        provider: "google".to_string(),
        reason: format!("invalid token response: {}", e),
    })?;

    Ok(RefreshedToken {
        access_token: parsed.access_token,
        // Google typically does not rotate the refresh token; reuse ours.
        refresh_token: parsed.refresh_token,
        token_expiry: parsed.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
    })
}

async fn refresh_tiktok(
    client: &Client,
    oauth: &OAuthConfig,
    refresh_token: &str,
) -> Result<RefreshedToken> {
    let client_key = oauth.tiktok_client_key.as_deref().ok_or_else(|| Error::Auth {
        provider: "tiktok".to_string(),
        reason: "tiktok client key not configured".to_string(),
    })?;
    let client_secret = oauth
        .tiktok_client_secret
        .as_deref()
        .ok_or_else(|| Error::Auth {
            provider: "tiktok".to_string(),
            reason: "tiktok client secret not configured".to_string(),
        })?;

    let response = client
        .post(TIKTOK_TOKEN_URL)
        .form(&[
            ("client_key", client_key),
            ("client_secret", client_secret),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .send()
        .await
        .map_err(|e| Error::Auth {
            provider: "tiktok".to_string(),
            reason: e.to_string(),
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Auth {
            provider: "tiktok".to_string(),
            reason: format!("token endpoint returned {}: {}", status, body),
        });
    }

    let parsed: TikTokTokenResponse = response.json().await.map_err(|e| Error::Auth {
        provider: "tiktok".to_string(),
        reason: format!("invalid token response: {}", e),
    })?;

    Ok(RefreshedToken {
        access_token: parsed.access_token,
        // TikTok rotates the refresh token; the new one must be stored.
        refresh_token: parsed.refresh_token,
        token_expiry: parsed.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
    })
}

/// Ensure the record carries a usable access token: refresh when
/// eligible, write the result back, and mutate the in-memory record so
/// the invocation proceeds even when the write fails.
pub async fn ensure_fresh(
    client: &Client,
    store: &SqliteStore,
    oauth: &OAuthConfig,
    record: &mut UserAutomation,
) -> Result<()> {
    if !needs_refresh(record, Utc::now()) {
        return Ok(());
    }

    let refresh = record.refresh_token.clone().unwrap_or_default();
    let Some(refreshed) = refresh_token(client, oauth, &record.provider, &refresh).await? else {
        return Ok(());
    };

    info!(
        provider = %record.provider,
        automation = %record.id,
        "access token refreshed"
    );

    record.access_token = Some(refreshed.access_token.clone());
    if let Some(new_refresh) = &refreshed.refresh_token {
        record.refresh_token = Some(new_refresh.clone());
    }
    record.token_expiry = refreshed.token_expiry;

    if let Err(e) = store
        .update_tokens(
            &record.id,
            &refreshed.access_token,
            refreshed.refresh_token.as_deref(),
            refreshed.token_expiry,
        )
        .await
    {
        warn!(
            automation = %record.id,
            error = %e,
            "failed to persist refreshed tokens, proceeding with in-memory values"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        refresh: Option<&str>,
        expiry: Option<DateTime<Utc>>,
    ) -> UserAutomation {
        let mut record = UserAutomation::new("u1", "a1", "google");
        record.access_token = Some("tok".to_string());
        record.refresh_token = refresh.map(|s| s.to_string());
        record.token_expiry = expiry;
        record
    }

    #[test]
    fn test_needs_refresh_within_skew() {
        let now = Utc::now();
        assert!(needs_refresh(
            &record(Some("r"), Some(now + Duration::minutes(3))),
            now
        ));
        assert!(needs_refresh(
            &record(Some("r"), Some(now - Duration::minutes(1))),
            now
        ));
        assert!(!needs_refresh(
            &record(Some("r"), Some(now + Duration::minutes(30))),
            now
        ));
    }

    #[test]
    fn test_needs_refresh_missing_expiry() {
        let now = Utc::now();
        assert!(needs_refresh(&record(Some("r"), None), now));
    }

    #[test]
    fn test_no_refresh_token_never_eligible() {
        let now = Utc::now();
        assert!(!needs_refresh(&record(None, None), now));
        assert!(!needs_refresh(&record(Some(""), Some(now)), now));
    }

    #[tokio::test]
    async fn test_unknown_provider_skips() {
        let client = Client::new();
        let oauth = OAuthConfig::default();
        let result = refresh_token(&client, &oauth, "megacorp", "r").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_google_refresh_requires_client_config() {
        let client = Client::new();
        let oauth = OAuthConfig::default();
        let err = refresh_token(&client, &oauth, "google", "r")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AUTH_ERROR");
    }
}
