//! Gateway configuration, deserialized from YAML. Every field has a default
//! so a bare `opendx-gateway` starts in the local profile; production
//! deployments point `--config` at a file.

use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use opendx_federation::ArgumentMapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Substitutes a fixed test consumer for the JWT claims.
    #[default]
    Local,
    Production,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    pub profile: Profile,
    pub listen: SocketAddr,
    /// Base URL of the policy decision point; `/decide` is appended.
    pub pdp_url: Url,
    /// Base URL of the consent engine; `/consents` is appended.
    pub ce_url: Url,
    /// Purpose attached to consent requests.
    pub consent_purpose: String,
    pub providers: Vec<ProviderConfig>,
    pub argument_mappings: Vec<ArgumentMapping>,
    pub token: TokenTunables,
    /// Timeout applied to each south-bound HTTP call.
    #[serde(with = "humantime_serde")]
    pub provider_timeout: Duration,
    /// Overall deadline for one consumer request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Embedded SDL used when the store has no active schema.
    pub default_sdl: Option<String>,
    /// SDL file shipped next to the binary, the last fallback.
    pub sdl_file: Option<PathBuf>,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            profile: Profile::default(),
            listen: default_listen(),
            pdp_url: default_url(8081),
            ce_url: default_url(8082),
            consent_purpose: "service_delivery".to_owned(),
            providers: Vec::new(),
            argument_mappings: Vec::new(),
            token: TokenTunables::default(),
            provider_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            default_sdl: None,
            sdl_file: None,
        }
    }
}

impl Configuration {
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_owned(),
            source,
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4000))
}

fn default_url(port: u16) -> Url {
    Url::parse(&format!("http://127.0.0.1:{port}")).expect("default URL is valid")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("could not read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub provider_key: String,
    pub schema_id: String,
    pub provider_url: Url,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    ApiKey(ApiKeyConfig),
    Oauth2ClientCredentials(Oauth2Config),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyConfig {
    #[serde(default = "default_api_key_header")]
    pub header: String,
    pub key: String,
}

fn default_api_key_header() -> String {
    "X-API-Key".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Oauth2Config {
    pub token_url: Url,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub placement: CredentialPlacement,
}

/// Where the client credentials travel on the token request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialPlacement {
    #[default]
    Body,
    Basic,
    Bearer,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenTunables {
    /// Refresh is attempted when `now + refresh_buffer` reaches the expiry.
    #[serde(with = "humantime_serde")]
    pub refresh_buffer: Duration,
    /// A token is usable only while `now + validation_buffer` is before it.
    #[serde(with = "humantime_serde")]
    pub validation_buffer: Duration,
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for TokenTunables {
    fn default() -> Self {
        TokenTunables {
            refresh_buffer: Duration::from_secs(120),
            validation_buffer: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}
