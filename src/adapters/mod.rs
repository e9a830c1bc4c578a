// Adapters: concrete implementations of the collaborator ports, plus the run report.

pub mod layer_files;
pub mod memory;
pub mod portal;
pub mod report;
pub mod zip_packager;

pub use layer_files::FileLayerSource;
pub use memory::InMemoryCatalog;
pub use portal::{Credentials, PortalClient};
pub use zip_packager::ZipTilePackager;
