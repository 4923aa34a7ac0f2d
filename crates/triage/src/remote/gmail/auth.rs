//! Gmail OAuth2 authentication
//!
//! Implements the OAuth2 authorization code flow for installed apps, with a
//! local HTTP listener receiving the redirect. Tokens are cached in the
//! config directory and refreshed when close to expiry.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Mutex;

/// OAuth2 configuration and token management for Gmail
pub struct GmailAuth {
    client_id: String,
    client_secret: String,
    token_path: PathBuf,
    /// Serializes refreshes so parallel fetches share one new token
    refresh_lock: Mutex<()>,
}

/// Stored token data
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

impl StoredToken {
    /// Valid for at least five more minutes
    fn is_fresh(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at > chrono::Utc::now().timestamp() + 300)
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl GmailAuth {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Read, trash and label changes
    const GMAIL_MODIFY_SCOPE: &'static str = "https://www.googleapis.com/auth/gmail.modify";

    /// Port range to try for the local OAuth callback server
    const PORT_RANGE_START: u16 = 8080;
    const PORT_RANGE_END: u16 = 8090;

    const TOKEN_FILE: &'static str = "gmail-tokens.json";

    pub fn new(client_id: String, client_secret: String) -> Result<Self> {
        let token_path =
            config::config_path(Self::TOKEN_FILE).context("Could not determine config directory")?;
        Ok(Self::with_token_path(client_id, client_secret, token_path))
    }

    pub fn with_token_path(client_id: String, client_secret: String, token_path: PathBuf) -> Self {
        Self {
            client_id,
            client_secret,
            token_path,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Get a valid access token, refreshing or re-authenticating as needed
    pub fn get_access_token(&self) -> Result<String> {
        if let Ok(token) = self.load_token()
            && token.is_fresh()
        {
            return Ok(token.access_token);
        }

        let _guard = self
            .refresh_lock
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?;

        // Another thread may have refreshed while we waited
        if let Ok(token) = self.load_token() {
            if token.is_fresh() {
                return Ok(token.access_token);
            }

            if let Some(refresh_token) = token.refresh_token {
                match self.refresh_access_token(&refresh_token) {
                    Ok(new_token) => {
                        self.save_token_response(&new_token)?;
                        return Ok(new_token.access_token);
                    }
                    Err(e) => warn!("Token refresh failed, re-authenticating: {:#}", e),
                }
            }
        }

        let token = self.authorization_code_auth()?;
        self.save_token_response(&token)?;
        Ok(token.access_token)
    }

    /// Browser consent flow; the redirect lands on a local listener
    fn authorization_code_auth(&self) -> Result<TokenResponse> {
        let (listener, port) = bind_callback_listener()?;
        let redirect_uri = format!("http://localhost:{}", port);
        let consent_url = url::Url::parse_with_params(
            Self::AUTH_URL,
            [
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", Self::GMAIL_MODIFY_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .context("Invalid consent URL")?;

        info!("Gmail needs consent; visit {} if no browser opens", consent_url);
        if let Err(e) = open::that(consent_url.as_str()) {
            warn!("Could not launch a browser: {}", e);
        }

        let code = match accept_callback(&listener)? {
            Callback::Code(code) => code,
            Callback::Denied(reason) => anyhow::bail!("Gmail consent denied: {}", reason),
            Callback::Malformed => anyhow::bail!("OAuth redirect carried no authorization code"),
        };

        let token = self.token_request(&[
            ("code", code.as_str()),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri.as_str()),
        ])?;
        info!("Gmail consent granted");
        Ok(token)
    }

    /// Exchange a refresh token; Google keeps the old refresh token valid
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let mut token = self.token_request(&[
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])?;
        token.refresh_token.get_or_insert_with(|| refresh_token.to_string());
        Ok(token)
    }

    /// POST to the token endpoint with client credentials added
    fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        form.extend_from_slice(params);

        ureq::post(Self::TOKEN_URL)
            .send_form(form)
            .context("Token endpoint request failed")?
            .into_body()
            .read_json()
            .context("Unreadable token endpoint response")
    }

    fn load_token(&self) -> Result<StoredToken> {
        let content = fs::read_to_string(&self.token_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save_token_response(&self, token: &TokenResponse) -> Result<()> {
        if let Some(parent) = self.token_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let stored = StoredToken {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token
                .expires_in
                .map(|d| chrono::Utc::now().timestamp() + d as i64),
        };

        fs::write(&self.token_path, serde_json::to_string_pretty(&stored)?)?;
        Ok(())
    }

    /// Whether a usable token is cached, without starting a browser flow
    pub fn is_authenticated(&self) -> bool {
        match self.load_token() {
            Ok(token) if token.is_fresh() => true,
            Ok(token) => token
                .refresh_token
                .is_some_and(|r| self.refresh_access_token(&r).is_ok()),
            Err(_) => false,
        }
    }

    /// Clear stored tokens
    pub fn logout(&self) -> Result<()> {
        if self.token_path.exists() {
            fs::remove_file(&self.token_path)?;
        }
        Ok(())
    }
}

/// What the OAuth redirect told us
#[derive(Debug, PartialEq, Eq)]
enum Callback {
    Code(String),
    Denied(String),
    Malformed,
}

/// First free port in the callback range
fn bind_callback_listener() -> Result<(TcpListener, u16)> {
    (GmailAuth::PORT_RANGE_START..=GmailAuth::PORT_RANGE_END)
        .find_map(|port| TcpListener::bind(("127.0.0.1", port)).ok().map(|l| (l, port)))
        .with_context(|| {
            format!(
                "No free callback port in {}-{}",
                GmailAuth::PORT_RANGE_START,
                GmailAuth::PORT_RANGE_END
            )
        })
}

/// Serve one redirect request and report its outcome to the browser
fn accept_callback(listener: &TcpListener) -> Result<Callback> {
    let (mut stream, _) = listener.accept().context("OAuth redirect never arrived")?;

    let mut request_line = String::new();
    BufReader::new(&stream)
        .read_line(&mut request_line)
        .context("Unreadable OAuth redirect")?;
    let callback = parse_callback(&request_line);

    let (status, text) = match callback {
        Callback::Code(_) => ("200 OK", "Triage is connected to Gmail. You can close this tab."),
        _ => ("400 Bad Request", "Triage could not connect to Gmail. Try again from the app."),
    };
    let page = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain; charset=utf-8\r\nConnection: close\r\n\r\n{}",
        status, text
    );
    if let Err(e) = stream.write_all(page.as_bytes()) {
        warn!("Failed to answer OAuth redirect: {}", e);
    }
    Ok(callback)
}

/// Read the query of `GET /?code=...&scope=... HTTP/1.1`
fn parse_callback(request_line: &str) -> Callback {
    let url = request_line
        .split_whitespace()
        .nth(1)
        .and_then(|path| url::Url::parse(&format!("http://localhost{}", path)).ok());
    let Some(url) = url else {
        return Callback::Malformed;
    };

    let mut denied = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => return Callback::Code(value.into_owned()),
            "error" => denied = Some(value.into_owned()),
            _ => {}
        }
    }
    denied.map(Callback::Denied).unwrap_or(Callback::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_callback_code() {
        assert_eq!(
            parse_callback("GET /?code=4%2F0Abc&scope=gmail.modify HTTP/1.1\r\n"),
            Callback::Code("4/0Abc".to_string())
        );
    }

    #[test]
    fn test_parse_callback_denied() {
        assert_eq!(
            parse_callback("GET /?error=access_denied HTTP/1.1\r\n"),
            Callback::Denied("access_denied".to_string())
        );
        assert_eq!(parse_callback("GET /favicon.ico HTTP/1.1\r\n"), Callback::Malformed);
        assert_eq!(parse_callback(""), Callback::Malformed);
    }

    #[test]
    fn test_fresh_token_is_used_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        let stored = StoredToken {
            access_token: "cached".to_string(),
            refresh_token: None,
            expires_at: Some(chrono::Utc::now().timestamp() + 3600),
        };
        fs::write(&path, serde_json::to_string(&stored).unwrap()).unwrap();

        let auth = GmailAuth::with_token_path("id".to_string(), "secret".to_string(), path);
        assert_eq!(auth.get_access_token().unwrap(), "cached");
        assert!(auth.is_authenticated());
    }
}
