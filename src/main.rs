use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use video_ingest::{
    auth::JwtVerifier,
    config::AppConfig,
    routes::routes::routes,
    services::{
        ingest_service::{IngestService, UploadLimits},
        media::{FfmpegRemuxer, FfprobeProber, Tool},
        resolver::ReferenceResolver,
        storage_service::{BlobStore, S3BlobStore, ThumbnailStore},
        video_repository::SqliteVideoRepository,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;
    tracing::info!("Starting video-ingest with config: {:?}", cfg);

    // --- Ensure local directories exist ---
    for dir in [&cfg.assets_root, &cfg.scratch_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir).with_context(|| format!("creating {dir}"))?;
            tracing::info!("Created directory at {}", dir);
        }
    }

    // --- Initialize SQLite connection ---
    let connect = SqliteConnectOptions::from_str(&cfg.database_url)
        .with_context(|| format!("parsing database url {}", cfg.database_url))?
        .create_if_missing(true);
    if let Some(parent) = connect.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect)
            .await?,
    );

    // --- Handle migration mode ---
    if migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize pipeline ---
    let blobs: Arc<dyn BlobStore> = Arc::new(
        S3BlobStore::new(
            cfg.s3_bucket.clone(),
            cfg.s3_region.clone(),
            cfg.s3_endpoint.clone(),
        )
        .context("configuring object store")?,
    );
    let ingest = IngestService {
        videos: Arc::new(SqliteVideoRepository::new(db.clone())),
        thumbnails: ThumbnailStore::new(&cfg.assets_root),
        blobs: blobs.clone(),
        remuxer: Arc::new(FfmpegRemuxer::new(Tool::new(
            cfg.ffmpeg_path.clone(),
            cfg.process_timeout,
        ))),
        prober: Arc::new(FfprobeProber::new(Tool::new(
            cfg.ffprobe_path.clone(),
            cfg.process_timeout,
        ))),
        resolver: ReferenceResolver::new(blobs, &cfg.public_base_url, cfg.presign_ttl),
        limits: UploadLimits {
            thumbnail_max_bytes: cfg.thumbnail_max_bytes,
            video_max_bytes: cfg.video_max_bytes,
        },
        scratch_dir: cfg.scratch_dir.clone().into(),
    };
    let state = AppState {
        ingest,
        verifier: Arc::new(JwtVerifier::new(&cfg.jwt_secret)),
        db,
    };

    // --- Build router ---
    let app: Router = routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run SQLite migrations from the embedded SQL file.
async fn run_migrations(db: &sqlx::SqlitePool) -> Result<()> {
    let statements = include_str!("../migrations/0001_init.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}
