//! Shell resolution and command translation

mod locator;
mod translator;

pub use locator::{ResolvedShell, ShellInfo, ShellLocator};
pub use translator::ShellTranslator;
