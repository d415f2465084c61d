use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, str::FromStr, time::Duration};

/// Longest validity window handed out for signed video URLs.
pub const MAX_PRESIGN_TTL: Duration = Duration::from_secs(3600);

/// Centralized application configuration.
/// Combines environment variables (optionally from `.env`) and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Directory served under `/assets/`.
    pub assets_root: String,
    /// Origin clients use to reach this server, for asset URLs.
    pub public_base_url: String,
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub jwt_secret: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub process_timeout: Duration,
    pub presign_ttl: Duration,
    pub thumbnail_max_bytes: u64,
    pub video_max_bytes: u64,
    /// Where uploads are spooled while being processed.
    pub scratch_dir: String,
}

// Hand-written so the JWT secret never reaches the logs.
impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("assets_root", &self.assets_root)
            .field("public_base_url", &self.public_base_url)
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_region", &self.s3_region)
            .field("s3_endpoint", &self.s3_endpoint)
            .field("jwt_secret", &"<redacted>")
            .field("ffmpeg_path", &self.ffmpeg_path)
            .field("ffprobe_path", &self.ffprobe_path)
            .field("process_timeout", &self.process_timeout)
            .field("presign_ttl", &self.presign_ttl)
            .field("thumbnail_max_bytes", &self.thumbnail_max_bytes)
            .field("video_max_bytes", &self.video_max_bytes)
            .field("scratch_dir", &self.scratch_dir)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Video and thumbnail upload service")]
pub struct Args {
    /// Host to bind to (overrides TUBELY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides TUBELY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides TUBELY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory for locally stored thumbnails (overrides TUBELY_ASSETS_ROOT)
    #[arg(long)]
    pub assets_root: Option<String>,

    /// S3 bucket for videos (overrides TUBELY_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `name` and parse it, or fall back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {name} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {name}")),
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // A missing .env is fine; a malformed one is not.
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err).context("loading .env"),
        }

        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_env_with(args)?, migrate))
    }

    /// Merge `args` over the process environment.
    pub fn from_env_with(args: Args) -> Result<Self> {
        let port = match args.port {
            Some(port) => port,
            None => env_or("TUBELY_PORT", 8091u16)?,
        };

        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| env_opt("TUBELY_HOST").unwrap_or_else(|| "0.0.0.0".into())),
            port,
            public_base_url: env_opt("TUBELY_PUBLIC_BASE_URL")
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            database_url: args.database_url.unwrap_or_else(|| {
                env_opt("TUBELY_DATABASE_URL").unwrap_or_else(|| "sqlite://./data/tubely.db".into())
            }),
            assets_root: args.assets_root.unwrap_or_else(|| {
                env_opt("TUBELY_ASSETS_ROOT").unwrap_or_else(|| "./assets".into())
            }),
            s3_bucket: match args.s3_bucket.or_else(|| env_opt("TUBELY_S3_BUCKET")) {
                Some(bucket) => bucket,
                None => bail!("TUBELY_S3_BUCKET must be set"),
            },
            s3_region: env_opt("TUBELY_S3_REGION").unwrap_or_else(|| "us-east-1".into()),
            s3_endpoint: env_opt("TUBELY_S3_ENDPOINT"),
            jwt_secret: env_opt("TUBELY_JWT_SECRET").context("TUBELY_JWT_SECRET must be set")?,
            ffmpeg_path: env_opt("TUBELY_FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".into()),
            ffprobe_path: env_opt("TUBELY_FFPROBE_PATH").unwrap_or_else(|| "ffprobe".into()),
            process_timeout: Duration::from_secs(env_or("TUBELY_PROCESS_TIMEOUT_SECS", 120)?),
            presign_ttl: Duration::from_secs(env_or("TUBELY_PRESIGN_TTL_SECS", 300)?),
            thumbnail_max_bytes: env_or("TUBELY_THUMBNAIL_MAX_BYTES", 10 << 20)?,
            video_max_bytes: env_or("TUBELY_VIDEO_MAX_BYTES", 1 << 30)?,
            scratch_dir: env_opt("TUBELY_SCRATCH_DIR")
                .unwrap_or_else(|| env::temp_dir().to_string_lossy().into_owned()),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.presign_ttl.is_zero() || self.presign_ttl > MAX_PRESIGN_TTL {
            bail!(
                "TUBELY_PRESIGN_TTL_SECS must be between 1 and {}",
                MAX_PRESIGN_TTL.as_secs()
            );
        }
        if self.process_timeout.is_zero() {
            bail!("TUBELY_PROCESS_TIMEOUT_SECS must be positive");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
