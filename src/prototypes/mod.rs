//! Class prototypes: the read-only store consulted per request and the offline builder that
//! produces its snapshot file.

pub mod build;
pub mod store;

pub use build::{build_prototypes, write_snapshot, BuildOptions};
pub use store::{Prototype, PrototypeSnapshot, PrototypeStore};
