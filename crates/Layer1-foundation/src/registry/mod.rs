//! Registry - static catalogues
//!
//! - `shell/` - shell types, invocation conventions, dialects

pub mod shell;

pub use shell::{Dialect, ShellType};
