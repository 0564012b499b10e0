//! Authentication against the Comfort Cloud identity provider.
//!
//! The service fronts its login with Auth0: an authorization-code flow with
//! PKCE, driven headlessly by following redirects by hand and re-submitting
//! the hidden form fields of the interstitial login page. `LoginFlow` walks
//! the steps; `TokenManager` decides between reuse, refresh and full login
//! based on the persisted token's expiry.

use chrono::Utc;
use log::{debug, info, warn};

use crate::error::ApiError;
use crate::models::comfortcloud::{ErrorEnvelope, LoginFormRequest, RegisterClientResponse, TokenResponse};
use crate::storage::TokenStore;
use crate::utils;

pub const APP_CLIENT_ID: &str = "Xmy6xIYIitMxngjB2rHvlm6HSDNnaMJx";
pub const AUTH_0_CLIENT: &str =
    "eyJuYW1lIjoiQXV0aDAuQW5kcm9pZCIsImVudiI6eyJhbmRyb2lkIjoiMzAifSwidmVyc2lvbiI6IjIuOS4zIn0=";
pub const REDIRECT_URI: &str =
    "panasonic-iot-cfc://authglb.digital.panasonic.com/android/com.panasonic.ACCsmart/callback";
pub const BASE_PATH_AUTH: &str = "https://authglb.digital.panasonic.com";
pub const APP_BRAIN_URL: &str = "https://www.appbrain.com/app/panasonic-comfort-cloud/com.panasonic.ACCsmart";
pub const DEFAULT_APP_VERSION: &str = "1.21.0";

const AUTH_SCOPE: &str = "openid offline_access comfortcloud.control a2w.control";
const STATE_LENGTH: usize = 20;
const CODE_VERIFIER_LENGTH: usize = 43;

/// Refresh this long before the stored expiry instead of letting the token
/// lapse mid-poll.
const REFRESH_WINDOW_SECS: i64 = 3600;

const KEY_ACCESS_TOKEN: &str = "accessToken";
const KEY_REFRESH_TOKEN: &str = "refreshToken";
const KEY_CLIENT_ID: &str = "clientId";
const KEY_TOKEN_EXPIRY: &str = "tokenExpiry";
const KEY_SCOPE: &str = "scope";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    /// Registered per-installation client id, sent as `x-client-id`.
    pub client_id: String,
    /// Epoch seconds at which `access_token` stops being accepted.
    pub expiry: i64,
    pub scope: String,
}

impl Token {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expiry
    }

    pub fn should_refresh(&self, now: i64) -> bool {
        now >= self.expiry - REFRESH_WINDOW_SECS
    }
}

/// Load a complete token from the store. A store missing any field is treated
/// as having no token at all.
pub fn load_token(store: &dyn TokenStore) -> Option<Token> {
    let access_token = store.get(KEY_ACCESS_TOKEN)?;
    let refresh_token = store.get(KEY_REFRESH_TOKEN)?;
    let client_id = store.get(KEY_CLIENT_ID)?;
    let expiry = store.get(KEY_TOKEN_EXPIRY)?.parse::<i64>().ok()?;
    let scope = store.get(KEY_SCOPE)?;
    Some(Token {
        access_token,
        refresh_token,
        client_id,
        expiry,
        scope,
    })
}

pub fn store_token(store: &mut dyn TokenStore, token: &Token) {
    store.put(KEY_ACCESS_TOKEN, &token.access_token);
    store.put(KEY_REFRESH_TOKEN, &token.refresh_token);
    store.put(KEY_CLIENT_ID, &token.client_id);
    store.put(KEY_TOKEN_EXPIRY, &token.expiry.to_string());
    store.put(KEY_SCOPE, &token.scope);
}

pub fn clear_token(store: &mut dyn TokenStore) {
    store.remove(KEY_ACCESS_TOKEN);
    store.remove(KEY_REFRESH_TOKEN);
    store.remove(KEY_CLIENT_ID);
    store.remove(KEY_TOKEN_EXPIRY);
    store.remove(KEY_SCOPE);
}

/// Seam between token bookkeeping and the HTTP login machinery, so the
/// manager can be exercised without a server.
pub trait Authenticator {
    fn authenticate(&self) -> Result<Token, ApiError>;
    fn refresh(&self, token: &Token) -> Result<Token, ApiError>;
}

/// Minimal cookie jar for the login flow. The identity provider only needs
/// its cookies echoed back within the same flow, so attributes beyond the
/// name/value pair are dropped.
#[derive(Debug, Default)]
struct CookieJar {
    cookies: Vec<(String, String)>,
}

impl CookieJar {
    fn absorb(&mut self, response: &ureq::Response) {
        for header in response.all("Set-Cookie") {
            let Some(pair) = header.split(';').next() else {
                continue;
            };
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim().to_string();
            let value = value.trim().to_string();
            match self.cookies.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry.1 = value,
                None => self.cookies.push((name, value)),
            }
        }
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.cookies.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    fn header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(n, v)| format!("{}={}", n, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

pub struct LoginFlow {
    agent: ureq::Agent,
    auth_base: String,
    api_base: String,
    app_version: String,
    username: String,
    password: String,
}

impl LoginFlow {
    pub fn new(
        agent: ureq::Agent,
        auth_base: impl Into<String>,
        api_base: impl Into<String>,
        app_version: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        LoginFlow {
            agent,
            auth_base: auth_base.into(),
            api_base: api_base.into(),
            app_version: app_version.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn auth_url(&self, location: &str) -> String {
        if location.starts_with('/') {
            format!("{}{}", self.auth_base, location)
        } else {
            location.to_string()
        }
    }

    fn audience() -> String {
        format!("https://digital.panasonic.com/{}/api/v1/", APP_CLIENT_ID)
    }

    /// Kick off the authorization-code flow. The response is always a
    /// redirect: either straight to the app callback (a live provider
    /// session) or into the interactive login pages.
    fn authorize(&self, jar: &mut CookieJar, state: &str, code_challenge: &str) -> Result<String, ApiError> {
        let result = self
            .agent
            .get(&format!("{}/authorize", self.auth_base))
            .query("scope", AUTH_SCOPE)
            .query("audience", &Self::audience())
            .query("protocol", "oauth2")
            .query("response_type", "code")
            .query("code_challenge", code_challenge)
            .query("code_challenge_method", "S256")
            .query("auth0Client", AUTH_0_CLIENT)
            .query("client_id", APP_CLIENT_ID)
            .query("redirect_uri", REDIRECT_URI)
            .query("state", state)
            .call();
        let response = expect_status("authorize", 302, result)?;
        jar.absorb(&response);
        location_header("authorize", &response)
    }

    /// Interactive part of the flow: load the login page, submit credentials,
    /// then re-post the hidden form fields to the callback endpoint.
    fn submit_credentials(
        &self,
        jar: &mut CookieJar,
        state: &str,
        login_location: &str,
    ) -> Result<String, ApiError> {
        let mut request = self.agent.get(&self.auth_url(login_location));
        if let Some(cookie) = jar.header() {
            request = request.set("Cookie", &cookie);
        }
        let response = expect_status("login page", 200, request.call())?;
        jar.absorb(&response);

        let Some(csrf) = jar.get("_csrf").map(|v| v.to_string()) else {
            return Err(ApiError::Authentication(
                "login page did not set a _csrf cookie".to_string(),
            ));
        };

        let form = LoginFormRequest {
            client_id: APP_CLIENT_ID.to_string(),
            redirect_uri: REDIRECT_URI.to_string(),
            tenant: "pdpauthglb-a1".to_string(),
            response_type: "code".to_string(),
            scope: AUTH_SCOPE.to_string(),
            audience: Self::audience(),
            csrf,
            state: state.to_string(),
            intstate: "deprecated".to_string(),
            username: self.username.clone(),
            password: self.password.clone(),
            lang: "en".to_string(),
            connection: "PanasonicID-Authentication".to_string(),
        };
        let mut request = self
            .agent
            .post(&format!("{}/usernamepassword/login", self.auth_base))
            .set("Auth0-Client", AUTH_0_CLIENT);
        if let Some(cookie) = jar.header() {
            request = request.set("Cookie", &cookie);
        }
        let response = expect_status("credential submission", 200, request.send_json(&form))?;
        jar.absorb(&response);
        let html = response
            .into_string()
            .map_err(|e| ApiError::Communication(format!("credential submission: unable to read body: {}", e)))?;

        let fields = utils::parse_hidden_inputs(&html);
        if fields.is_empty() {
            return Err(ApiError::Authentication(
                "credential response contained no hidden form fields, login was likely rejected".to_string(),
            ));
        }
        let form_fields: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let mut request = self.agent.post(&format!("{}/login/callback", self.auth_base));
        if let Some(cookie) = jar.header() {
            request = request.set("Cookie", &cookie);
        }
        let response = expect_status("login callback", 302, request.send_form(&form_fields))?;
        jar.absorb(&response);
        let resume_location = location_header("login callback", &response)?;

        let mut request = self.agent.get(&self.auth_url(&resume_location));
        if let Some(cookie) = jar.header() {
            request = request.set("Cookie", &cookie);
        }
        let response = expect_status("authorize resume", 302, request.call())?;
        jar.absorb(&response);
        location_header("authorize resume", &response)
    }

    fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenResponse, ApiError> {
        let result = self
            .agent
            .post(&format!("{}/oauth/token", self.auth_base))
            .set("Auth0-Client", AUTH_0_CLIENT)
            .send_form(&[
                ("scope", "openid"),
                ("client_id", APP_CLIENT_ID),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", REDIRECT_URI),
                ("code_verifier", code_verifier),
            ]);
        let response = expect_status("token exchange", 200, result)?;
        response
            .into_json::<TokenResponse>()
            .map_err(|e| ApiError::Authentication(format!("token exchange: malformed response: {}", e)))
    }

    /// Register this installation with the vendor API and obtain the client
    /// id that subsequent API calls carry. This is also where a stale
    /// configured app version surfaces, as error code 4106.
    fn register_client(&self, access_token: &str) -> Result<String, ApiError> {
        let request = crate::client::app_headers(
            self.agent.post(&format!("{}/auth/v2/login", self.api_base)),
            &self.app_version,
        )
        .set("x-user-authorization-v2", &format!("Bearer {}", access_token));
        match request.send_string("{}") {
            Ok(response) => response
                .into_json::<RegisterClientResponse>()
                .map(|r| r.client_id)
                .map_err(|e| ApiError::Authentication(format!("client registration: malformed response: {}", e))),
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                let envelope: ErrorEnvelope = serde_json::from_str(&body).unwrap_or_default();
                match envelope.code {
                    Some(code) => Err(ApiError::from_envelope(
                        code,
                        envelope.message.as_deref().unwrap_or(""),
                        status,
                        &self.app_version,
                    )),
                    None => Err(ApiError::Authentication(format!(
                        "client registration: http {}: {}",
                        status, body
                    ))),
                }
            }
            Err(ureq::Error::Transport(t)) => {
                Err(ApiError::Communication(format!("client registration: transport error: {}", t)))
            }
        }
    }
}

impl Authenticator for LoginFlow {
    fn authenticate(&self) -> Result<Token, ApiError> {
        let mut jar = CookieJar::default();
        let state = utils::generate_random_string(STATE_LENGTH);
        let code_verifier = utils::generate_random_string(CODE_VERIFIER_LENGTH);
        let code_challenge = utils::code_challenge(&code_verifier);

        debug!("Starting authorization flow");
        let location = self.authorize(&mut jar, &state, &code_challenge)?;

        // The provider may rewrite the state parameter on its first redirect;
        // from here on the rewritten value is authoritative.
        let state = utils::query_parameter(&location, "state").unwrap_or(state);

        let final_location = if location.starts_with(REDIRECT_URI) {
            debug!("Provider session still valid, skipping credential submission");
            location
        } else {
            self.submit_credentials(&mut jar, &state, &location)?
        };

        if !final_location.starts_with(REDIRECT_URI) {
            return Err(ApiError::Authentication(format!(
                "login flow ended at unexpected location {}",
                final_location
            )));
        }
        if let Some(returned_state) = utils::query_parameter(&final_location, "state") {
            if returned_state != state {
                warn!(
                    "State parameter changed across the login flow (sent {}, received {})",
                    state, returned_state
                );
            }
        }
        let Some(code) = utils::query_parameter(&final_location, "code") else {
            return Err(ApiError::Authentication(
                "final redirect carried no authorization code".to_string(),
            ));
        };

        let token_response = self.exchange_code(&code, &code_verifier)?;
        let client_id = self.register_client(&token_response.access_token)?;
        info!("Login flow completed, token valid for {}s", token_response.expires_in);

        Ok(Token {
            access_token: token_response.access_token,
            refresh_token: token_response.refresh_token,
            client_id,
            expiry: Utc::now().timestamp() + token_response.expires_in,
            scope: token_response.scope,
        })
    }

    fn refresh(&self, token: &Token) -> Result<Token, ApiError> {
        let result = self
            .agent
            .post(&format!("{}/oauth/token", self.auth_base))
            .set("Auth0-Client", AUTH_0_CLIENT)
            .send_form(&[
                ("scope", &token.scope),
                ("client_id", APP_CLIENT_ID),
                ("grant_type", "refresh_token"),
                ("refresh_token", &token.refresh_token),
            ]);
        let response = expect_status("token refresh", 200, result)?;
        let refreshed = response
            .into_json::<TokenResponse>()
            .map_err(|e| ApiError::Authentication(format!("token refresh: malformed response: {}", e)))?;
        debug!("Token refreshed, valid for {}s", refreshed.expires_in);
        Ok(Token {
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token,
            client_id: token.client_id.clone(),
            expiry: Utc::now().timestamp() + refreshed.expires_in,
            scope: refreshed.scope,
        })
    }
}

fn expect_status(step: &str, expected: u16, result: Result<ureq::Response, ureq::Error>) -> Result<ureq::Response, ApiError> {
    match result {
        Ok(response) if response.status() == expected => Ok(response),
        Ok(response) => Err(ApiError::Authentication(format!(
            "{}: expected http {}, got {}",
            step,
            expected,
            response.status()
        ))),
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_else(|_| String::from("<no body>"));
            Err(ApiError::Authentication(format!("{}: http {}: {}", step, status, body)))
        }
        Err(ureq::Error::Transport(t)) => Err(ApiError::Communication(format!("{}: transport error: {}", step, t))),
    }
}

fn location_header(step: &str, response: &ureq::Response) -> Result<String, ApiError> {
    response
        .header("Location")
        .map(|l| l.to_string())
        .ok_or_else(|| ApiError::Authentication(format!("{}: redirect without Location header", step)))
}

/// Read the currently published app version from the vendor's AppBrain page.
/// Used when no version is configured; failures fall back to the built-in
/// default at the call site.
pub fn fetch_app_version(agent: &ureq::Agent, url: &str) -> Result<String, ApiError> {
    let response = match agent.get(url).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(status, _)) => {
            return Err(ApiError::Communication(format!("app version lookup: http {}", status)));
        }
        Err(ureq::Error::Transport(t)) => {
            return Err(ApiError::Communication(format!("app version lookup: transport error: {}", t)));
        }
    };
    let html = response
        .into_string()
        .map_err(|e| ApiError::Communication(format!("app version lookup: unable to read body: {}", e)))?;
    utils::parse_appbrain_app_version(&html)
        .ok_or_else(|| ApiError::Communication("app version lookup: no softwareVersion tag in page".to_string()))
}

/// Owns the token store and decides, per request, whether the stored token is
/// returned as-is, refreshed, or replaced through a full login.
pub struct TokenManager {
    store: Box<dyn TokenStore>,
    authenticator: Box<dyn Authenticator>,
}

impl TokenManager {
    pub fn new(store: Box<dyn TokenStore>, authenticator: Box<dyn Authenticator>) -> Self {
        TokenManager { store, authenticator }
    }

    pub fn obtain_valid_token(&mut self) -> Result<Token, ApiError> {
        let now = Utc::now().timestamp();
        match load_token(self.store.as_ref()) {
            None => {
                info!("No stored token, performing full login");
                self.full_login()
            }
            Some(token) if token.is_expired(now) => {
                info!("Stored token expired, performing full login");
                self.full_login()
            }
            Some(token) if token.should_refresh(now) => match self.authenticator.refresh(&token) {
                Ok(refreshed) => {
                    store_token(self.store.as_mut(), &refreshed);
                    Ok(refreshed)
                }
                Err(e) => {
                    warn!("Token refresh failed ({}), falling back to full login", e);
                    self.full_login()
                }
            },
            Some(token) => Ok(token),
        }
    }

    /// Drop the stored token so the next call performs a full login. Used
    /// when the API rejects a token the expiry bookkeeping considered valid.
    pub fn invalidate(&mut self) {
        clear_token(self.store.as_mut());
    }

    fn full_login(&mut self) -> Result<Token, ApiError> {
        match self.authenticator.authenticate() {
            Ok(token) => {
                store_token(self.store.as_mut(), &token);
                Ok(token)
            }
            Err(e) => {
                // A half-written store must not shadow the failure on the
                // next attempt.
                clear_token(self.store.as_mut());
                Err(e)
            }
        }
    }
}
