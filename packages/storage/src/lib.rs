pub mod files;

pub use files::keys::{run_prefix, sanitize_path, storage_key_for, storage_location_for};
pub use files::store::{BlobRead, RunStore, StorageError};
pub use object_store;
pub use object_store::path::Path;
