use anyhow::{Context, Result, bail};
use clap::Parser;
use std::env;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments, read once at start-up.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Prefix of retrieval URLs handed out to clients.
    pub public_base_url: String,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Image sharing service")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_SHARE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_SHARE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where image bytes are stored (overrides IMAGE_SHARE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides IMAGE_SHARE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public URL prefix for download links (overrides IMAGE_SHARE_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Largest accepted upload in bytes (overrides IMAGE_SHARE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::from_sources(args, |key| match env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading {}", key)),
        })?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values looked up by `lookup` (environment in production).
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<Option<String>>,
    {
        // --- Environment fallback ---
        let env_host = lookup("IMAGE_SHARE_HOST")?.unwrap_or_else(|| "0.0.0.0".into());
        let env_port = match lookup("IMAGE_SHARE_PORT")? {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing IMAGE_SHARE_PORT value `{}`", value))?,
            None => 3000,
        };
        let env_storage =
            lookup("IMAGE_SHARE_STORAGE_DIR")?.unwrap_or_else(|| "./data/images".into());
        let env_db = lookup("IMAGE_SHARE_DATABASE_URL")?
            .unwrap_or_else(|| "sqlite://./data/meta/image_share.db".into());
        let env_public = lookup("IMAGE_SHARE_PUBLIC_BASE_URL")?;
        let env_max_upload = match lookup("IMAGE_SHARE_MAX_UPLOAD_BYTES")? {
            Some(value) => value.parse::<usize>().with_context(|| {
                format!("parsing IMAGE_SHARE_MAX_UPLOAD_BYTES value `{}`", value)
            })?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        // --- Merge ---
        let host = args.host.unwrap_or(env_host);
        let port = args.port.unwrap_or(env_port);
        let public_base_url = match args.public_base_url.or(env_public) {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", public_authority(&host, port)),
        };
        if !(public_base_url.starts_with("http://") || public_base_url.starts_with("https://")) {
            bail!(
                "public base URL `{}` must start with http:// or https://",
                public_base_url
            );
        }

        let max_upload_bytes = args.max_upload_bytes.unwrap_or(env_max_upload);
        if max_upload_bytes == 0 {
            bail!("max upload size must be greater than zero");
        }

        Ok(Self {
            host,
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url,
            max_upload_bytes,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Wildcard bind addresses are not reachable by clients; point links at localhost.
fn public_authority(host: &str, port: u16) -> String {
    match host {
        "0.0.0.0" | "::" => format!("localhost:{}", port),
        other => format!("{}:{}", other, port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(
        vars: &'static [(&'static str, &'static str)],
    ) -> impl Fn(&str) -> Result<Option<String>> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| Ok(map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::from_sources(Args::default(), lookup_from(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.storage_dir, "./data/images");
        assert_eq!(cfg.database_url, "sqlite://./data/meta/image_share.db");
        assert_eq!(cfg.public_base_url, "http://localhost:3000");
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn test_args_override_env() {
        let args = Args {
            port: Some(9000),
            public_base_url: Some("https://img.example.com/".into()),
            ..Args::default()
        };
        let env = lookup_from(&[
            ("IMAGE_SHARE_PORT", "8000"),
            ("IMAGE_SHARE_HOST", "127.0.0.1"),
            ("IMAGE_SHARE_PUBLIC_BASE_URL", "http://ignored"),
        ]);
        let cfg = AppConfig::from_sources(args, env).unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.public_base_url, "https://img.example.com");
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let err = AppConfig::from_sources(
            Args::default(),
            lookup_from(&[("IMAGE_SHARE_PORT", "eighty")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("IMAGE_SHARE_PORT"));
    }

    #[test]
    fn test_public_base_url_must_be_http() {
        let err = AppConfig::from_sources(
            Args::default(),
            lookup_from(&[("IMAGE_SHARE_PUBLIC_BASE_URL", "ftp://files")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn test_zero_upload_limit_is_rejected() {
        let args = Args {
            max_upload_bytes: Some(0),
            ..Args::default()
        };
        assert!(AppConfig::from_sources(args, lookup_from(&[])).is_err());
    }
}
