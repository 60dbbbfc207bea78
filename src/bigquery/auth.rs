use crate::crux::util::run_command_with_timeout;
use crate::error::ArchiveError;
use crate::logging;
use anyhow::{Context, Result};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
const GCLOUD_TOKEN_LIFETIME: Duration = Duration::from_secs(45 * 60);
const GCLOUD_TIMEOUT: Duration = Duration::from_secs(60);
const STATIC_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 3600);
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Where credentials come from. Exactly one is chosen per client.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    File(PathBuf),
    InlineJson(Value),
    Ambient,
}

impl CredentialSource {
    /// Picks the single credential input, rejecting none or conflicting inputs.
    pub fn from_inputs(
        file: Option<PathBuf>,
        inline: Option<&str>,
        ambient: bool,
    ) -> Result<Self, ArchiveError> {
        match (file, inline) {
            (Some(_), Some(_)) => Err(ArchiveError::Configuration(
                "both a credentials file and inline credentials were supplied".to_string(),
            )),
            (Some(path), None) => Ok(Self::File(path)),
            (None, Some(raw)) => {
                let value: Value = serde_json::from_str(raw).map_err(|err| {
                    ArchiveError::Configuration(format!("inline credentials are not JSON: {err}"))
                })?;
                Ok(Self::InlineJson(value))
            }
            (None, None) if ambient => Ok(Self::Ambient),
            (None, None) => Err(ArchiveError::no_credentials()),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::File(path) => format!("file:{}", path.display()),
            Self::InlineJson(_) => "inline-json".to_string(),
            Self::Ambient => "ambient".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default)]
    pub quota_project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// A Google credential JSON document, discriminated by its `type` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialDocument {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
}

impl CredentialDocument {
    pub fn from_value(value: Value) -> Result<Self, ArchiveError> {
        serde_json::from_value(value).map_err(|err| {
            ArchiveError::Configuration(format!(
                "unsupported credential document (expected service_account or authorized_user): {err}"
            ))
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ArchiveError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            ArchiveError::io(format!("failed to read credentials {}", path.display()), err)
        })?;
        let value: Value = serde_json::from_str(&raw).map_err(|err| {
            ArchiveError::Configuration(format!(
                "credentials {} are not JSON: {err}",
                path.display()
            ))
        })?;
        Self::from_value(value)
    }

    pub fn project_id(&self) -> Option<&str> {
        match self {
            Self::ServiceAccount(key) => key.project_id.as_deref(),
            Self::AuthorizedUser(user) => user.quota_project_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
enum TokenProvider {
    Static(String),
    Document(CredentialDocument),
    Gcloud(PathBuf),
}

#[derive(Debug, Clone, Serialize)]
pub struct JwtClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
}

pub fn service_account_claims(key: &ServiceAccountKey, now_epoch_secs: u64) -> JwtClaims {
    JwtClaims {
        iss: key.client_email.clone(),
        scope: BIGQUERY_SCOPE.to_string(),
        aud: key.token_uri.clone(),
        iat: now_epoch_secs,
        exp: now_epoch_secs + ASSERTION_LIFETIME_SECS,
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

fn env_non_empty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn well_known_adc_path() -> Option<PathBuf> {
    if let Some(dir) = env_non_empty("CLOUDSDK_CONFIG") {
        return Some(PathBuf::from(dir).join("application_default_credentials.json"));
    }
    let home = dirs::home_dir()?;
    Some(home.join(".config/gcloud/application_default_credentials.json"))
}

fn gcloud_bin() -> Option<PathBuf> {
    which::which("gcloud").ok()
}

fn resolve_ambient() -> Result<TokenProvider, ArchiveError> {
    if let Some(token) = env_non_empty("CRUX_ACCESS_TOKEN") {
        logging::debug("ambient credentials: CRUX_ACCESS_TOKEN");
        return Ok(TokenProvider::Static(token));
    }
    if let Some(path) = env_non_empty("GOOGLE_APPLICATION_CREDENTIALS") {
        logging::debug("ambient credentials: GOOGLE_APPLICATION_CREDENTIALS");
        return Ok(TokenProvider::Document(CredentialDocument::from_file(
            Path::new(&path),
        )?));
    }
    if let Some(path) = well_known_adc_path().filter(|p| p.is_file()) {
        logging::debug(&format!("ambient credentials: {}", path.display()));
        return Ok(TokenProvider::Document(CredentialDocument::from_file(&path)?));
    }
    if let Some(bin) = gcloud_bin() {
        logging::debug(&format!("ambient credentials: {}", bin.display()));
        return Ok(TokenProvider::Gcloud(bin));
    }
    Err(ArchiveError::RemoteQuery(
        "no ambient credentials found (CRUX_ACCESS_TOKEN, GOOGLE_APPLICATION_CREDENTIALS, gcloud application-default credentials or gcloud on PATH)"
            .to_string(),
    ))
}

fn run_gcloud(bin: &Path, args: &[&str]) -> Result<String> {
    let out = run_command_with_timeout(Command::new(bin).args(args), GCLOUD_TIMEOUT)
        .with_context(|| format!("failed to run `{} {}`", bin.display(), args.join(" ")))?;
    if !out.status.success() {
        anyhow::bail!(
            "`gcloud {}` failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

fn exchange(http: &Client, uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
    let response = http
        .post(uri)
        .form(form)
        .send()
        .with_context(|| format!("token request to {uri} failed"))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        anyhow::bail!("token endpoint {uri} returned {status}: {}", body.trim());
    }
    Ok(response.json()?)
}

/// Resolves the credential source into bearer tokens, lazily and with caching.
#[derive(Debug)]
pub struct Authenticator {
    source: CredentialSource,
    provider: RefCell<Option<TokenProvider>>,
    cached: RefCell<Option<CachedToken>>,
}

impl Authenticator {
    /// File and inline documents are parsed up front; ambient lookup is
    /// deferred until the first token is needed.
    pub fn new(source: CredentialSource) -> Result<Self, ArchiveError> {
        let provider = match &source {
            CredentialSource::File(path) => {
                Some(TokenProvider::Document(CredentialDocument::from_file(path)?))
            }
            CredentialSource::InlineJson(value) => Some(TokenProvider::Document(
                CredentialDocument::from_value(value.clone())?,
            )),
            CredentialSource::Ambient => None,
        };
        Ok(Self {
            source,
            provider: RefCell::new(provider),
            cached: RefCell::new(None),
        })
    }

    pub fn source(&self) -> &CredentialSource {
        &self.source
    }

    fn provider(&self) -> Result<TokenProvider, ArchiveError> {
        if let Some(provider) = self.provider.borrow().as_ref() {
            return Ok(provider.clone());
        }
        let resolved = resolve_ambient()?;
        *self.provider.borrow_mut() = Some(resolved.clone());
        Ok(resolved)
    }

    /// Project id carried by the credentials, if any.
    pub fn project_hint(&self) -> Result<Option<String>, ArchiveError> {
        match self.provider()? {
            TokenProvider::Document(doc) => Ok(doc.project_id().map(ToOwned::to_owned)),
            TokenProvider::Gcloud(bin) => {
                Ok(run_gcloud(&bin, &["config", "get-value", "project"])
                    .ok()
                    .filter(|p| !p.is_empty() && p != "(unset)"))
            }
            TokenProvider::Static(_) => Ok(None),
        }
    }

    pub fn access_token(&self, http: &Client) -> Result<String, ArchiveError> {
        if let Some(token) = self.cached.borrow().as_ref()
            && token.expires_at > Instant::now() + REFRESH_MARGIN
        {
            return Ok(token.value.clone());
        }

        let (value, lifetime) = self.fetch_token(http).map_err(|err| {
            ArchiveError::RemoteQuery(format!(
                "authentication via {} failed: {err:#}",
                self.source.label()
            ))
        })?;
        *self.cached.borrow_mut() = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    fn fetch_token(&self, http: &Client) -> Result<(String, Duration)> {
        match self.provider()? {
            TokenProvider::Static(token) => Ok((token, STATIC_TOKEN_LIFETIME)),
            TokenProvider::Gcloud(bin) => {
                let token = run_gcloud(&bin, &["auth", "print-access-token"])?;
                if token.is_empty() {
                    anyhow::bail!("gcloud printed an empty access token");
                }
                Ok((token, GCLOUD_TOKEN_LIFETIME))
            }
            TokenProvider::Document(CredentialDocument::ServiceAccount(key)) => {
                let now = crate::crux::util::now_epoch_secs()?;
                let claims = service_account_claims(&key, now);
                let mut header = Header::new(Algorithm::RS256);
                header.kid = key.private_key_id.clone();
                let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
                    .context("service account private_key is not a valid RSA PEM")?;
                let assertion = jsonwebtoken::encode(&header, &claims, &signing_key)
                    .context("failed to sign service account assertion")?;
                let resp = exchange(
                    http,
                    &key.token_uri,
                    &[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)],
                )?;
                Ok((
                    resp.access_token,
                    Duration::from_secs(resp.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS)),
                ))
            }
            TokenProvider::Document(CredentialDocument::AuthorizedUser(user)) => {
                let resp = exchange(
                    http,
                    DEFAULT_TOKEN_URI,
                    &[
                        ("grant_type", "refresh_token"),
                        ("client_id", &user.client_id),
                        ("client_secret", &user.client_secret),
                        ("refresh_token", &user.refresh_token),
                    ],
                )?;
                Ok((
                    resp.access_token,
                    Duration::from_secs(resp.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS)),
                ))
            }
        }
    }
}
