use anyhow::Context;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Argon2 work factor. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

/// What the session gate does with a request carrying a bad token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureMode {
    Redirect,
    Unauthorized,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub cookie_secure: bool,
    pub failure_mode: AuthFailureMode,
    pub login_path: String,
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    S3(S3Config),
    Disk { upload_dir: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub hashing: HashConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub default_profile_image: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let jwt = JwtConfig {
            secret: get("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: or("JWT_ISSUER", "authdesk"),
            audience: or("JWT_AUDIENCE", "authdesk-users"),
            ttl_minutes: parse_or(&get, "JWT_TTL_MINUTES", 60 * 24)?,
        };
        if jwt.ttl_minutes < 0 {
            anyhow::bail!("JWT_TTL_MINUTES must not be negative");
        }

        let hashing = HashConfig {
            memory_kib: parse_or(&get, "ARGON2_MEMORY_KIB", 19 * 1024)?,
            iterations: parse_or(&get, "ARGON2_ITERATIONS", 2)?,
            parallelism: parse_or(&get, "ARGON2_PARALLELISM", 1)?,
        };

        let failure_mode = match or("AUTH_FAILURE_MODE", "unauthorized").as_str() {
            "redirect" => AuthFailureMode::Redirect,
            "unauthorized" => AuthFailureMode::Unauthorized,
            other => {
                anyhow::bail!("AUTH_FAILURE_MODE must be redirect or unauthorized, got {other}")
            }
        };
        let session = SessionConfig {
            cookie_name: or("SESSION_COOKIE_NAME", "jwt"),
            cookie_secure: parse_or(&get, "SESSION_COOKIE_SECURE", true)?,
            failure_mode,
            login_path: or("LOGIN_PATH", "/auth/login"),
        };

        let storage = match get("MINIO_ENDPOINT") {
            Some(endpoint) => StorageConfig::S3(S3Config {
                public_base_url: or("ASSET_PUBLIC_BASE_URL", &endpoint),
                endpoint,
                bucket: get("MINIO_BUCKET")
                    .context("MINIO_BUCKET must be set with MINIO_ENDPOINT")?,
                access_key: get("MINIO_ACCESS_KEY").context("MINIO_ACCESS_KEY must be set")?,
                secret_key: get("MINIO_SECRET_KEY").context("MINIO_SECRET_KEY must be set")?,
            }),
            None => StorageConfig::Disk {
                upload_dir: or("UPLOAD_DIR", "public/uploads"),
            },
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            jwt,
            hashing,
            session,
            storage,
            default_profile_image: or("DEFAULT_PROFILE_IMAGE", "/uploads/default.jpg"),
        })
    }
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw}: {e}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let cfg = AppConfig::from_lookup(lookup(&[("JWT_SECRET", "s3cret")])).unwrap();
        assert_eq!(cfg.jwt.ttl_minutes, 1440);
        assert_eq!(cfg.jwt.issuer, "authdesk");
        assert_eq!(cfg.session.cookie_name, "jwt");
        assert!(cfg.session.cookie_secure);
        assert_eq!(cfg.session.failure_mode, AuthFailureMode::Unauthorized);
        assert!(cfg.database_url.is_none());
        assert!(matches!(
            cfg.storage,
            StorageConfig::Disk { ref upload_dir } if upload_dir == "public/uploads"
        ));
        assert_eq!(cfg.default_profile_image, "/uploads/default.jpg");
    }

    #[test]
    fn missing_secret_is_an_error() {
        let err = AppConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn minio_endpoint_selects_s3_storage() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "x"),
            ("MINIO_ENDPOINT", "http://minio:9000"),
            ("MINIO_BUCKET", "avatars"),
            ("MINIO_ACCESS_KEY", "ak"),
            ("MINIO_SECRET_KEY", "sk"),
        ]))
        .unwrap();
        match cfg.storage {
            StorageConfig::S3(s3) => {
                assert_eq!(s3.bucket, "avatars");
                assert_eq!(s3.public_base_url, "http://minio:9000");
            }
            other => panic!("expected s3 storage, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_failure_mode_and_bad_numbers() {
        let err = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "x"),
            ("AUTH_FAILURE_MODE", "teapot"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("AUTH_FAILURE_MODE"));

        let err = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "x"),
            ("JWT_TTL_MINUTES", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("JWT_TTL_MINUTES"));
    }
}
