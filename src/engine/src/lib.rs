//! skiff engine: a rootless OCI image store and Dockerfile builder.
//!
//! The pieces, bottom-up: a content-addressed [`store::blob::BlobStore`]
//! and [`store::fsspec::FsSpecStore`], the whiteout-aware [`tar`]
//! codec, the [`image`] store with deterministic layer commits, the
//! [`bundle`] store and runtime-spec builder, and the Dockerfile
//! [`build`] engine with its instruction cache. Container execution is
//! delegated through [`runtime::ContainerRuntime`].

pub mod build;
pub mod bundle;
pub mod digest;
pub mod image;
pub mod lock;
pub mod oci;
pub mod runtime;
pub mod store;
pub mod tar;

pub use build::{BuildCache, BuildEngine, BuildOptions, Dockerfile, ImageBuilder};
pub use bundle::{Bundle, BundleStore, LockedBundle, SpecBuilder};
pub use digest::Digest;
pub use image::{
    Image, ImageImporter, ImageName, ImageStore, LockedImageStore, NoImporter, TaggedImage,
};
pub use lock::{LockFile, LockGuard};
pub use oci::{ImageConfig, ImageManifest};
pub use runtime::{CommandRuntime, ContainerRuntime};
pub use store::Store;

/// Engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
