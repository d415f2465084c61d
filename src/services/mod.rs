pub mod ingest_service;
pub mod intake;
pub mod keys;
pub mod media;
pub mod process;
pub mod resolver;
pub mod storage_service;
pub mod video_repository;
