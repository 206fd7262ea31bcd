//! HTTP handlers.

pub mod health;
pub mod references;
pub mod status;
pub mod uploads;

pub use health::health_check;
pub use references::change_reference;
pub use status::file_status;
pub use uploads::{discard_session, upload_file};
