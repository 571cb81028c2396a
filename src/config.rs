use anyhow::{bail, Context, Result};
use std::{env, net::SocketAddr, path::Path};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityMode {
    /// Treat the presented credential as the user id.
    Bare,
    Supabase { url: String, anon_key: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub identity: IdentityMode,
    /// Reject room joins and sends from connections without a resolved identity.
    pub realtime_require_auth: bool,
    /// Outbound queue depth per real-time connection.
    pub client_buffer: usize,
    pub cors_permissive: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: "sqlite::memory:".to_string(),
            identity: IdentityMode::Bare,
            realtime_require_auth: false,
            client_buffer: 256,
            cors_permissive: true,
        }
    }
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();

        let database_url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => {
                let home = lookup("HOME").unwrap_or_else(|| ".".into());
                let path = Path::new(&home).join(".naattu").join("chat.db");
                format!("sqlite://{}", path.display())
            }
        };

        let identity = match lookup("IDENTITY_MODE").as_deref().unwrap_or("bare") {
            "bare" => IdentityMode::Bare,
            "supabase" => IdentityMode::Supabase {
                url: lookup("SUPABASE_URL").context("SUPABASE_URL is required in supabase mode")?,
                anon_key: lookup("SUPABASE_ANON_KEY")
                    .context("SUPABASE_ANON_KEY is required in supabase mode")?,
            },
            other => bail!("IDENTITY_MODE must be 'bare' or 'supabase', got '{}'", other),
        };

        Ok(Self {
            host: lookup("HTTP_HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "HTTP_PORT", defaults.port)?,
            database_url,
            identity,
            realtime_require_auth: parse_bool_or(
                &lookup,
                "REALTIME_REQUIRE_AUTH",
                defaults.realtime_require_auth,
            )?,
            client_buffer: parse_or(&lookup, "CLIENT_BUFFER", defaults.client_buffer)?,
            cors_permissive: parse_bool_or(&lookup, "CORS_PERMISSIVE", defaults.cors_permissive)?,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got '{}'", key, raw)),
        None => Ok(default),
    }
}

fn parse_bool_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("no") => Ok(false),
        Some(other) => bail!("{} must be true or false, got '{}'", key, other),
    }
}
