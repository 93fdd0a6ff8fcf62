//! The OAuth2 authorization-code-with-PKCE flow: a short-lived local
//! redirect listener that captures the provider's callback, exchanges the
//! code, and shuts itself down.
//!
//! The listener binds before the authorize URL is built, so the redirect
//! URI always matches the port actually in use, and only ever serves one
//! request before the handler is dropped.

use crate::error::OAuthError;
use axum::extract::Query;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use oauth2::basic::{BasicClient, BasicTokenResponse};
use tower_http::trace::TraceLayer;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenUrl,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>CalendarSync</title></head>
<body style='font-family: "Helvetica Neue",Helvetica,Arial,sans-serif;'>
  <div style="text-align: center; padding-top: 30px;">
    <h2 style="color:#0fad00; font-weight: 500; font-size: 30px; margin-bottom: 10px;">CalendarSync authentication successful!</h2>
    <p style="font-size:20px; color:#5C5C5C; margin-top: 10px;">You can now close this window.</p>
  </div>
</body>
</html>"#;

struct RedirectParams {
    code: Option<String>,
    state: Option<String>,
}

/// Binds the redirect listener up front (so the redirect URL can be
/// derived from whatever port the OS handed us) and drives a single
/// authorization-code exchange.
pub struct OAuthHandler {
    client: BasicClient,
    listener: std::net::TcpListener,
}

impl OAuthHandler {
    /// `bind_port == 0` asks the OS for an ephemeral port, matching the
    /// CLI's `--port` default.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        bind_port: u16,
    ) -> Result<Self, OAuthError> {
        let listener = std::net::TcpListener::bind(("127.0.0.1", bind_port))
            .map_err(|source| OAuthError::Bind { port: bind_port, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| OAuthError::Bind { port: bind_port, source })?;
        let port = listener.local_addr().map_err(|source| OAuthError::Bind { port: bind_port, source })?.port();

        let redirect_url = format!("http://127.0.0.1:{port}/redirect");
        let client = BasicClient::new(
            ClientId::new(client_id.into()),
            Some(ClientSecret::new(client_secret.into())),
            AuthUrl::new(auth_url.into()).map_err(|e| OAuthError::Endpoint(anyhow::anyhow!(e)))?,
            Some(TokenUrl::new(token_url.into()).map_err(|e| OAuthError::Endpoint(anyhow::anyhow!(e)))?),
        )
        .set_redirect_uri(
            RedirectUrl::new(redirect_url).map_err(|e| OAuthError::Endpoint(anyhow::anyhow!(e)))?,
        );

        Ok(Self { client, listener })
    }

    /// The port the redirect listener is actually bound to, for building
    /// the consent URL a human clicks through.
    pub fn port(&self) -> u16 {
        self.listener.local_addr().expect("listener is bound").port()
    }

    /// Builds the provider consent URL with a fresh PKCE challenge and CSRF
    /// state; the caller opens this in a browser (`--open-browser`) or
    /// prints it for the operator to click.
    pub fn authorize_url(&self, scopes: &[&str]) -> (url::Url, CsrfToken, PkceCodeVerifier) {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let mut request = self.client.authorize_url(CsrfToken::new_random).set_pkce_challenge(pkce_challenge);
        for scope in scopes {
            request = request.add_scope(Scope::new((*scope).to_string()));
        }
        let (url, csrf_token) = request.url();
        (url, csrf_token, pkce_verifier)
    }

    /// Serves exactly one `/redirect` request, validates the CSRF state,
    /// exchanges the code for a token, then drops the listener.
    pub async fn listen_and_exchange(
        self,
        expected_state: CsrfToken,
        pkce_verifier: PkceCodeVerifier,
    ) -> Result<BasicTokenResponse, OAuthError> {
        let (tx, rx) = oneshot::channel::<RedirectParams>();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let app = Router::new().route(
            "/redirect",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let tx = tx.clone();
                async move {
                    if let Some(sender) = tx.lock().expect("oauth redirect mutex poisoned").take() {
                        let _ = sender.send(RedirectParams {
                            code: params.get("code").cloned(),
                            state: params.get("state").cloned(),
                        });
                    }
                    Html(SUCCESS_HTML)
                }
            }),
        )
        .layer(TraceLayer::new_for_http());

        let listener =
            tokio::net::TcpListener::from_std(self.listener).map_err(OAuthError::Listener)?;
        let server = axum::serve(listener, app);
        tokio::pin!(server);

        let params = tokio::select! {
            result = &mut server => {
                result.map_err(OAuthError::Listener)?;
                return Err(OAuthError::MissingCode);
            }
            received = rx => received.map_err(|_| OAuthError::MissingCode)?,
        };

        if params.state.as_deref() != Some(expected_state.secret().as_str()) {
            return Err(OAuthError::StateMismatch);
        }
        let code = params.code.ok_or(OAuthError::MissingCode)?;

        self.client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(async_http_client)
            .await
            .map_err(|e| OAuthError::Exchange(anyhow::anyhow!(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_an_ephemeral_port_when_asked() {
        let handler =
            OAuthHandler::new("id", "secret", "https://example.com/auth", "https://example.com/token", 0)
                .unwrap();
        assert_ne!(handler.port(), 0);
    }

    #[test]
    fn authorize_url_carries_requested_scopes_and_pkce() {
        let handler =
            OAuthHandler::new("id", "secret", "https://example.com/auth", "https://example.com/token", 0)
                .unwrap();
        let (url, _csrf, _verifier) = handler.authorize_url(&["calendar.readonly"]);
        assert!(url.query().unwrap().contains("calendar.readonly"));
        assert!(url.query().unwrap().contains("code_challenge"));
    }
}
