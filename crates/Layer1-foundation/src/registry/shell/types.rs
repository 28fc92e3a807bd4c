//! Shell Types - logical shells and their invocation conventions

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Dialect
// ============================================================================

/// Command-line dialect spoken by a family of shells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// bash, zsh, sh, fish
    Posix,
    /// Windows PowerShell and PowerShell 7
    PowerShell,
    /// cmd.exe
    Cmd,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Posix => "posix",
            Dialect::PowerShell => "powershell",
            Dialect::Cmd => "cmd",
        }
    }

    /// Whether verbs in this dialect are matched case-sensitively
    pub fn case_sensitive(&self) -> bool {
        matches!(self, Dialect::Posix)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Shell Type
// ============================================================================

/// Logical shell type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellType {
    /// Bash (Linux default)
    Bash,
    /// Zsh (macOS default)
    Zsh,
    /// POSIX sh
    Sh,
    Fish,
    /// Windows PowerShell 5.x
    PowerShell,
    /// PowerShell 7+
    Pwsh,
    /// cmd.exe
    Cmd,
}

impl ShellType {
    /// Default shell of the current OS
    pub fn default_for_os() -> Self {
        #[cfg(target_os = "windows")]
        {
            Self::PowerShell
        }
        #[cfg(target_os = "macos")]
        {
            Self::Zsh
        }
        #[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
        {
            Self::Bash
        }
    }

    /// Fallback order used when the preferred shell is unavailable
    pub fn fallback_order() -> &'static [ShellType] {
        #[cfg(windows)]
        {
            &[Self::PowerShell, Self::Pwsh, Self::Cmd, Self::Bash]
        }
        #[cfg(not(windows))]
        {
            &[Self::Bash, Self::Zsh, Self::Sh, Self::Pwsh]
        }
    }

    /// Position in the fallback order (unlisted shells sort last)
    pub fn fallback_rank(&self) -> usize {
        Self::fallback_order()
            .iter()
            .position(|s| s == self)
            .unwrap_or(usize::MAX)
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            ShellType::Bash | ShellType::Zsh | ShellType::Sh | ShellType::Fish => Dialect::Posix,
            ShellType::PowerShell | ShellType::Pwsh => Dialect::PowerShell,
            ShellType::Cmd => Dialect::Cmd,
        }
    }

    /// Executable names looked up on PATH
    pub fn executable_names(&self) -> &'static [&'static str] {
        match self {
            ShellType::Bash => &["bash"],
            ShellType::Zsh => &["zsh"],
            ShellType::Sh => &["sh"],
            ShellType::Fish => &["fish"],
            ShellType::PowerShell => &["powershell", "powershell.exe"],
            ShellType::Pwsh => &["pwsh", "pwsh.exe"],
            ShellType::Cmd => &["cmd", "cmd.exe"],
        }
    }

    /// Well-known absolute locations, checked before PATH
    pub fn candidate_paths(&self) -> &'static [&'static str] {
        #[cfg(windows)]
        {
            match self {
                ShellType::Bash => &[
                    r"C:\Program Files\Git\bin\bash.exe",
                    r"C:\Program Files (x86)\Git\bin\bash.exe",
                ],
                ShellType::PowerShell => {
                    &[r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe"]
                }
                ShellType::Pwsh => &[r"C:\Program Files\PowerShell\7\pwsh.exe"],
                ShellType::Cmd => &[r"C:\Windows\System32\cmd.exe"],
                _ => &[],
            }
        }
        #[cfg(not(windows))]
        {
            match self {
                ShellType::Bash => &[
                    "/bin/bash",
                    "/usr/bin/bash",
                    "/usr/local/bin/bash",
                    "/opt/homebrew/bin/bash",
                ],
                ShellType::Zsh => &[
                    "/bin/zsh",
                    "/usr/bin/zsh",
                    "/usr/local/bin/zsh",
                    "/opt/homebrew/bin/zsh",
                ],
                ShellType::Sh => &["/bin/sh", "/usr/bin/sh"],
                ShellType::Fish => &[
                    "/usr/bin/fish",
                    "/usr/local/bin/fish",
                    "/opt/homebrew/bin/fish",
                ],
                ShellType::Pwsh => &[
                    "/usr/bin/pwsh",
                    "/usr/local/bin/pwsh",
                    "/opt/homebrew/bin/pwsh",
                ],
                ShellType::PowerShell | ShellType::Cmd => &[],
            }
        }
    }

    /// Arguments that run a single command string
    pub fn exec_args(&self) -> &'static [&'static str] {
        match self.dialect() {
            Dialect::Posix => &["-c"],
            Dialect::PowerShell => &["-NoProfile", "-NonInteractive", "-Command"],
            Dialect::Cmd => &["/C"],
        }
    }

    /// Arguments for a long-lived shell that reads commands from stdin
    pub fn session_args(&self) -> &'static [&'static str] {
        match self {
            ShellType::Bash => &["--noprofile", "--norc", "-s"],
            ShellType::Zsh => &["-f", "-s"],
            ShellType::Sh | ShellType::Fish => &[],
            ShellType::PowerShell | ShellType::Pwsh => &["-NoProfile", "-NoLogo", "-Command", "-"],
            ShellType::Cmd => &["/Q", "/K"],
        }
    }

    /// Arguments that print the shell version (None = no reliable probe)
    pub fn version_args(&self) -> Option<&'static [&'static str]> {
        match self {
            ShellType::Bash | ShellType::Zsh | ShellType::Fish => Some(&["--version"]),
            ShellType::Sh => None,
            ShellType::PowerShell | ShellType::Pwsh => Some(&[
                "-NoProfile",
                "-Command",
                "$PSVersionTable.PSVersion.ToString()",
            ]),
            ShellType::Cmd => Some(&["/C", "ver"]),
        }
    }

    /// Native pipe operator
    pub fn pipe_operator(&self) -> &'static str {
        "|"
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShellType::Bash => "bash",
            ShellType::Zsh => "zsh",
            ShellType::Sh => "sh",
            ShellType::Fish => "fish",
            ShellType::PowerShell => "powershell",
            ShellType::Pwsh => "pwsh",
            ShellType::Cmd => "cmd",
        }
    }

    /// Parse a shell name, tolerating `.exe` suffixes and full paths
    pub fn from_name(s: &str) -> Option<Self> {
        let name = s
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(s)
            .to_lowercase();
        let name = name.strip_suffix(".exe").unwrap_or(&name);

        match name {
            "bash" => Some(Self::Bash),
            "zsh" => Some(Self::Zsh),
            "sh" => Some(Self::Sh),
            "fish" => Some(Self::Fish),
            "powershell" => Some(Self::PowerShell),
            "pwsh" => Some(Self::Pwsh),
            "cmd" => Some(Self::Cmd),
            _ => None,
        }
    }

    /// All shell types
    pub fn all() -> Vec<Self> {
        vec![
            Self::Bash,
            Self::Zsh,
            Self::Sh,
            Self::Fish,
            Self::PowerShell,
            Self::Pwsh,
            Self::Cmd,
        ]
    }
}

impl Default for ShellType {
    fn default() -> Self {
        Self::default_for_os()
    }
}

impl std::fmt::Display for ShellType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShellType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| Error::InvalidInput(format!("Unknown shell type: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!(ShellType::from_name("BASH"), Some(ShellType::Bash));
        assert_eq!(ShellType::from_name("pwsh.exe"), Some(ShellType::Pwsh));
        assert_eq!(ShellType::from_name("/usr/bin/zsh"), Some(ShellType::Zsh));
        assert_eq!(
            ShellType::from_name(r"C:\Windows\System32\cmd.exe"),
            Some(ShellType::Cmd)
        );
        assert!("nushell".parse::<ShellType>().is_err());
    }

    #[test]
    fn test_dialects() {
        assert_eq!(ShellType::Sh.dialect(), Dialect::Posix);
        assert_eq!(ShellType::Pwsh.dialect(), Dialect::PowerShell);
        assert_eq!(ShellType::Cmd.dialect(), Dialect::Cmd);
        assert!(Dialect::Posix.case_sensitive());
        assert!(!Dialect::Cmd.case_sensitive());
    }

    #[test]
    fn test_fallback_order_contains_default() {
        let order = ShellType::fallback_order();
        assert!(order.contains(&ShellType::default_for_os()));
        assert_eq!(order[0].fallback_rank(), 0);
        assert_eq!(ShellType::Fish.fallback_rank(), usize::MAX);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&ShellType::PowerShell).unwrap();
        assert_eq!(json, "\"powershell\"");
        let parsed: ShellType = serde_json::from_str("\"pwsh\"").unwrap();
        assert_eq!(parsed, ShellType::Pwsh);
    }
}
