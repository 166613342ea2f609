//! Kernel: infrastructure traits and their production implementations.

pub mod identity;
pub mod pg_store;
pub mod server_kernel;
pub mod storage;
pub mod sweeper;
pub mod test_dependencies;
pub mod traits;

pub use identity::PgIdentityProvider;
pub use pg_store::PgStore;
pub use server_kernel::{ServerKernel, Settings};
pub use storage::{
    ArtifactStore, FsArtifactStore, PublicUrlResolver, ResolvedUrl, SignedUrlResolver,
    StorageResolver,
};
pub use traits::{IdentityProvider, Store};
