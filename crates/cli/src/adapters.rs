//! Maps a configured adapter entry to a concrete `Source`/`Sink`, running
//! the interactive OAuth2 bootstrap for the providers that need one.
//!
//! CalDAV reuses the `oAuth` config block for basic-auth credentials
//! instead of running a browser flow - the username/app-password pair
//! has nowhere else to live in the config schema, and iCloud-style
//! servers authenticate that way regardless.

use anyhow::{anyhow, Result};
use calendarsync_adapters::{CalDavAdapter, GoogleAdapter, IcsAdapter, OutlookAdapter};
use calendarsync_auth::{CalendarAuth, OAuth2Token, OAuthHandler, TokenStore};
use calendarsync_core::config::Adapter;
use calendarsync_core::port::{Sink, Source};
use chrono::Utc;
use oauth2::TokenResponse;
use std::sync::Arc;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_SCOPES: &[&str] = &["https://www.googleapis.com/auth/calendar"];

const OUTLOOK_AUTH_URL_TEMPLATE: &str = "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/authorize";
const OUTLOOK_TOKEN_URL_TEMPLATE: &str = "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token";
const OUTLOOK_SCOPES: &[&str] = &["offline_access", "Calendars.ReadWrite"];

/// Collaborators the interactive OAuth2 flow needs, threaded through from
/// the CLI flags and the opened token store.
pub struct AuthContext<'a> {
    pub store: &'a dyn TokenStore,
    pub open_browser: bool,
    pub port: u16,
}

pub async fn build_source(adapter: &Adapter, auth: &AuthContext<'_>) -> Result<Arc<dyn Source>> {
    match adapter.kind.as_str() {
        "google" => Ok(Arc::new(google(adapter, auth).await?)),
        "outlook" | "outlook_http" => Ok(Arc::new(outlook(adapter, auth).await?)),
        "caldav" => Ok(Arc::new(caldav(adapter)?)),
        "ics" => Ok(Arc::new(IcsAdapter::new(require_config_str(adapter, "url")?))),
        other => Err(anyhow!("unknown source adapter type: {other}")),
    }
}

pub async fn build_sink(adapter: &Adapter, auth: &AuthContext<'_>) -> Result<Arc<dyn Sink>> {
    match adapter.kind.as_str() {
        "google" => Ok(Arc::new(google(adapter, auth).await?)),
        "outlook" | "outlook_http" => Ok(Arc::new(outlook(adapter, auth).await?)),
        "caldav" => Ok(Arc::new(caldav(adapter)?)),
        "ics" => Err(anyhow!("the ics adapter is source-only and cannot be used as a sink")),
        other => Err(anyhow!("unknown sink adapter type: {other}")),
    }
}

async fn google(adapter: &Adapter, auth: &AuthContext<'_>) -> Result<GoogleAdapter> {
    let calendar_id = adapter.calendar.clone();
    let access_token = oauth_access_token(
        &calendar_id,
        &adapter.oauth.client_id,
        &adapter.oauth.client_key,
        GOOGLE_AUTH_URL,
        GOOGLE_TOKEN_URL,
        GOOGLE_SCOPES,
        auth,
    )
    .await?;
    Ok(GoogleAdapter::new(calendar_id, access_token))
}

async fn outlook(adapter: &Adapter, auth: &AuthContext<'_>) -> Result<OutlookAdapter> {
    let tenant = if adapter.oauth.tenant_id.is_empty() { "common" } else { adapter.oauth.tenant_id.as_str() };
    let auth_url = OUTLOOK_AUTH_URL_TEMPLATE.replace("{tenant}", tenant);
    let token_url = OUTLOOK_TOKEN_URL_TEMPLATE.replace("{tenant}", tenant);
    let calendar_id = adapter.calendar.clone();
    let access_token = oauth_access_token(
        &calendar_id,
        &adapter.oauth.client_id,
        &adapter.oauth.client_key,
        &auth_url,
        &token_url,
        OUTLOOK_SCOPES,
        auth,
    )
    .await?;
    Ok(OutlookAdapter::new(calendar_id, access_token))
}

fn caldav(adapter: &Adapter) -> Result<CalDavAdapter> {
    let base_url = require_config_str(adapter, "baseUrl")?;
    let home_set_path = config_str(adapter, "homeSetPath").unwrap_or_else(|| "/".to_string());
    Ok(CalDavAdapter::new(
        base_url,
        adapter.oauth.client_id.clone(),
        adapter.oauth.client_key.clone(),
        home_set_path,
        adapter.calendar.clone(),
    ))
}

/// Returns a cached, unexpired access token if one is stored, otherwise
/// runs a full authorization-code-with-PKCE exchange and persists the
/// result before returning it. There is no silent background refresh: an
/// expired token just triggers the interactive flow again.
async fn oauth_access_token(
    calendar_id: &str,
    client_id: &str,
    client_secret: &str,
    auth_url: &str,
    token_url: &str,
    scopes: &[&str],
    auth: &AuthContext<'_>,
) -> Result<String> {
    if let Some(stored) = auth.store.read(calendar_id)? {
        if let Some(token) = stored.oauth2 {
            if token.expiry > Utc::now() {
                return Ok(token.access_token);
            }
        }
    }

    let handler = OAuthHandler::new(client_id, client_secret, auth_url, token_url, auth.port)?;
    let (url, csrf_token, pkce_verifier) = handler.authorize_url(scopes);

    tracing::info!(%url, calendar = %calendar_id, "open this url to authorize access");
    if auth.open_browser {
        let _ = webbrowser::open(url.as_str());
    }

    let response = handler.listen_and_exchange(csrf_token, pkce_verifier).await?;

    let access_token = response.access_token().secret().clone();
    let refresh_token = response.refresh_token().map(|t| t.secret().clone()).unwrap_or_default();
    let ttl = response
        .expires_in()
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .unwrap_or_else(|| chrono::Duration::hours(1));

    auth.store.write(CalendarAuth {
        calendar_id: calendar_id.to_string(),
        oauth2: Some(OAuth2Token {
            access_token: access_token.clone(),
            refresh_token,
            expiry: Utc::now() + ttl,
            token_type: "Bearer".to_string(),
        }),
        access_token: None,
    })?;

    Ok(access_token)
}

fn config_str(adapter: &Adapter, key: &str) -> Option<String> {
    adapter.config.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn require_config_str(adapter: &Adapter, key: &str) -> Result<String> {
    config_str(adapter, key)
        .ok_or_else(|| anyhow!("adapter '{}' is missing required config key '{key}'", adapter.kind))
}
