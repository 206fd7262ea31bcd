//! Repository trait definitions.

pub mod cleanup;
pub mod files;
pub mod references;
pub mod sessions;

pub use cleanup::CleanupRepo;
pub use files::FileRepo;
pub use references::ReferenceRepo;
pub use sessions::SessionRepo;
