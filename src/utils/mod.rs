pub mod file_utils;
pub mod lock_utils;
pub mod validation_utils;
