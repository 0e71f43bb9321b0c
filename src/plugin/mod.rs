//! Plugin hot-deploy: archives in the plugins directory are exploded next to
//! themselves and re-exploded whenever the archive is newer than its directory.

pub mod archive;
pub mod cleanup;
pub mod descriptor;
pub mod error;
pub mod extractor;
pub mod load_order;
pub mod manager;
pub mod monitor;
pub mod registry;
pub mod synchronizer;

pub use manager::PluginManager;
pub use registry::PluginListener;
