//! Convenience re-exports

pub use crate::backend::BundledUpdateBackend;
pub use crate::builder::{RootMetadataBuilder, UpdateBundleBuilder, sign_root};
pub use crate::bundle::{PayloadReader, UpdateBundleAccessor};
pub use crate::config::{BundleAccessorConfig, ServiceConfig};
pub use crate::manifest::ManifestAccessor;
pub use crate::memory_backend::{BackendHook, InMemoryBackend};
pub use crate::openable::{BlobStoreOpenableReader, MemoryOpenableReader, OpenableReader};
pub use crate::service::{BundledUpdateService, BundledUpdateStatus, UpdateResult, UpdateState};
