pub mod file_format;
pub mod log_setup;
pub mod parallel;

pub use file_format::{FileExtensionError, FileFormat, SerdeFormatError, load_file, save_file};

pub const EPSILON: f64 = 1e-6;

pub fn is_debug() -> bool {
    cfg!(debug_assertions)
}
