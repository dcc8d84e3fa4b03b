pub mod archive_service;
pub mod asset_service;
pub mod cleanup_service;
pub mod file_service;
pub mod system_service;
pub mod upload_service;
