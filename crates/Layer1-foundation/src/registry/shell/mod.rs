//! Shell Registry - catalogue of supported shells
//!
//! Names, well-known install locations, invocation arguments and dialects for
//! bash, zsh, sh, fish, PowerShell, pwsh and cmd. Locating an executable on the
//! host is done by the execution layer.

mod types;

pub use types::{Dialect, ShellType};
