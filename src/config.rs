use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Development,
    Production,
}

/// Which user directory backend to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Durable JSON-lines journal (USER_STORE=file)
    File,
    /// Volatile map (USER_STORE=memory)
    Memory,
    /// External key-value table (USER_STORE=kv)
    KeyValue,
}

/// User directory configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// Journal file path, used by `StoreKind::File`
    pub path: PathBuf,
    /// Store URL, required by `StoreKind::KeyValue`
    pub url: Option<String>,
}

/// S3 destination attached to provisioned workspaces
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationConfig {
    pub bucket: String,
    pub region: String,
    pub prefix: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Upstream embedding API configuration
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub client_id: String,
    pub client_secret: String,
    pub organization_id: String,
    /// Client-credentials token endpoint
    pub token_url: String,
    /// Base URL for workspace and destination calls
    pub api_url: String,
    /// Scoped widget-token endpoint
    pub scoped_token_url: String,
    /// Lifetime assumed when the token endpoint omits `expires_in`
    pub default_token_lifetime_secs: u64,
    pub destination: Option<DestinationConfig>,
}

#[derive(Clone)]
pub struct Config {
    // Environment configuration
    pub environment: Environment,

    // Server configuration
    pub server_host: String,
    pub server_port: u16,

    // Shared application password gating every /api route
    pub app_secret: String,

    // Origins a widget token may be scoped to; the first is the default
    pub allowed_origins: Vec<String>,

    pub upstream: UpstreamConfig,
    pub store: StoreConfig,

    // Cookie configuration (None = host-only cookie, Some = domain cookie)
    pub cookie_domain: Option<String>,

    // HTTP client timeout configuration (in seconds)
    pub http_connect_timeout_secs: u64,
    pub http_request_timeout_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("environment", &self.environment)
            .field("bind_address", &self.bind_address())
            .field("allowed_origins", &self.allowed_origins)
            .field("organization_id", &self.upstream.organization_id)
            .field("store", &self.store.kind)
            .field("destination_configured", &self.upstream.destination.is_some())
            .finish_non_exhaustive()
    }
}

const DEFAULT_TOKEN_URL: &str = "https://api.airbyte.com/v1/applications/token";
const DEFAULT_API_URL: &str = "https://api.airbyte.com/v1";
const DEFAULT_SCOPED_TOKEN_URL: &str = "https://api.airbyte.ai/api/v1/embedded/scoped-token";

fn required(name: &str) -> anyhow::Result<String> {
    env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("{} environment variable is required", name))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.is_empty())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

/// Split a comma-separated origin list, trimming entries and trailing slashes
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/'))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Load configuration from environment variables using std::env::var
    pub fn load() -> anyhow::Result<Self> {
        // Parse environment type
        let environment = match env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        };

        // Required variables
        let app_secret = required("WEBAPP_PASSWORD")?;
        let client_id = required("UPSTREAM_CLIENT_ID")?;
        let client_secret = required("UPSTREAM_CLIENT_SECRET")?;
        let organization_id = required("UPSTREAM_ORGANIZATION_ID")?;

        let allowed_origins = parse_origins(&required("ALLOWED_ORIGINS")?);
        if allowed_origins.is_empty() {
            return Err(anyhow::anyhow!(
                "ALLOWED_ORIGINS must list at least one origin"
            ));
        }
        for origin in &allowed_origins {
            url::Url::parse(origin)
                .map_err(|e| anyhow::anyhow!("Invalid origin in ALLOWED_ORIGINS ({}): {}", origin, e))?;
        }

        // Upstream endpoints, overridable for staging or local fakes
        let token_url =
            optional("UPSTREAM_TOKEN_URL").unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string());
        let api_url = optional("UPSTREAM_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let scoped_token_url = optional("UPSTREAM_SCOPED_TOKEN_URL")
            .unwrap_or_else(|| DEFAULT_SCOPED_TOKEN_URL.to_string());

        let default_token_lifetime_secs = parse_or("UPSTREAM_DEFAULT_TOKEN_LIFETIME_SECS", 600);

        // Destination provisioning is enabled only when every S3 setting is present
        let destination = match (
            optional("DESTINATION_S3_BUCKET"),
            optional("DESTINATION_S3_REGION"),
            optional("DESTINATION_AWS_ACCESS_KEY"),
            optional("DESTINATION_AWS_SECRET_ACCESS_KEY"),
        ) {
            (Some(bucket), Some(region), Some(access_key_id), Some(secret_access_key)) => {
                Some(DestinationConfig {
                    bucket,
                    region,
                    prefix: optional("DESTINATION_S3_PREFIX").unwrap_or_default(),
                    access_key_id,
                    secret_access_key,
                })
            }
            _ => None,
        };

        // User directory backend
        let store_kind = match env::var("USER_STORE")
            .unwrap_or_else(|_| "file".to_string())
            .to_lowercase()
            .as_str()
        {
            "file" => StoreKind::File,
            "memory" => StoreKind::Memory,
            "kv" => StoreKind::KeyValue,
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown USER_STORE '{}' (expected file, memory or kv)",
                    other
                ))
            }
        };
        let store = StoreConfig {
            kind: store_kind,
            path: PathBuf::from(
                optional("USER_STORE_PATH").unwrap_or_else(|| "users.jsonl".to_string()),
            ),
            url: optional("USER_STORE_URL"),
        };

        // Optional variables with defaults
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = parse_or("SERVER_PORT", 3000u16);

        // Cookie domain: if not set or empty, use host-only cookies (no Domain attribute)
        let cookie_domain = optional("COOKIE_DOMAIN");

        let http_connect_timeout_secs = parse_or("HTTP_CONNECT_TIMEOUT_SECS", 10);
        let http_request_timeout_secs = parse_or("HTTP_REQUEST_TIMEOUT_SECS", 30);

        Ok(Config {
            environment,
            server_host,
            server_port,
            app_secret,
            allowed_origins,
            upstream: UpstreamConfig {
                client_id,
                client_secret,
                organization_id,
                token_url,
                api_url,
                scoped_token_url,
                default_token_lifetime_secs,
                destination,
            },
            store,
            cookie_domain,
            http_connect_timeout_secs,
            http_request_timeout_secs,
        })
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Get cookie security flags based on environment
    pub fn cookie_secure_flag(&self) -> &str {
        if self.is_production() {
            "; Secure"
        } else {
            ""
        }
    }

    /// Get cookie domain attribute string (empty if host-only cookie)
    pub fn cookie_domain_attr(&self) -> String {
        match &self.cookie_domain {
            Some(domain) => format!("; Domain={}", domain),
            None => String::new(),
        }
    }

    /// Get bind address for server
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Resolve the origin a widget token is scoped to.
    ///
    /// `None` selects the first configured origin; anything else must be on
    /// the allowlist.
    pub fn resolve_origin(&self, requested: Option<&str>) -> Option<String> {
        match requested.map(|o| o.trim().trim_end_matches('/')) {
            None | Some("") => self.allowed_origins.first().cloned(),
            Some(origin) => self
                .allowed_origins
                .iter()
                .find(|allowed| allowed.as_str() == origin)
                .cloned(),
        }
    }
}
