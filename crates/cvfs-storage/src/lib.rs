//! cvfs-storage: OpenDAL storage abstraction + reference remote backend
//!
//! [`OpendalRemote`] implements the chunk store and directory service traits
//! from `cvfs-core` on top of any OpenDAL operator (S3, local fs, memory).

pub mod backend;
pub mod health;
pub mod operator;

pub use backend::{map_opendal, OpendalRemote};
pub use health::check_health;
pub use operator::{build_from_core_config, build_operator, memory_operator, S3Credentials};
