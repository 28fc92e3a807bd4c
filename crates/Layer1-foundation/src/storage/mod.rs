//! Storage - config file lookup
//!
//! - `store.rs` - `ConfigStore` for `<config_dir>/hive/` and `./.hive/`

mod store;

pub use store::{ConfigStore, PROJECT_DIR, STORE_DIR};
