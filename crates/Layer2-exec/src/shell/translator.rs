//! Shell translator - best-effort verb rewriting between shell dialects
//!
//! A fixed table of equivalent phrases is applied at word boundaries only, so
//! `dir_list.txt` never becomes `ls_list.txt`. This is an aid for simple
//! commands; it does not parse quoting or pipelines and is not invertible.

use hive_foundation::{Dialect, ShellType};

/// One row of equivalent phrases: (posix, powershell, cmd)
type Row = (Option<&'static str>, Option<&'static str>, Option<&'static str>);

const VERBS: &[Row] = &[
    // listing
    (Some("ls -1"), Some("Get-ChildItem -Name"), Some("dir /b")),
    (Some("ls -la"), Some("Get-ChildItem -Force"), Some("dir /a")),
    (Some("ls"), Some("Get-ChildItem"), Some("dir")),
    (Some("pwd"), Some("Get-Location"), None),
    // files
    (Some("cat"), Some("Get-Content"), Some("type")),
    (Some("cp -r"), Some("Copy-Item -Recurse"), Some("xcopy /e /i")),
    (Some("cp"), Some("Copy-Item"), Some("copy")),
    (Some("mv"), Some("Move-Item"), Some("move")),
    (Some("rm -rf"), Some("Remove-Item -Recurse -Force"), Some("rmdir /s /q")),
    (Some("rm"), Some("Remove-Item"), Some("del")),
    (Some("mkdir -p"), Some("New-Item -ItemType Directory -Force"), Some("mkdir")),
    (Some("touch"), Some("New-Item -ItemType File"), Some("type nul >")),
    (Some("grep"), Some("Select-String"), Some("findstr")),
    // redirection
    (Some("/dev/null"), Some("$null"), Some("nul")),
    // processes
    (Some("ps"), Some("Get-Process"), Some("tasklist")),
    (Some("kill -9"), Some("Stop-Process -Force -Id"), Some("taskkill /F /PID")),
    (Some("kill"), Some("Stop-Process -Id"), Some("taskkill /PID")),
    // misc
    (Some("which"), Some("Get-Command"), Some("where")),
    (Some("env"), Some("Get-ChildItem Env:"), Some("set")),
    (Some("clear"), Some("Clear-Host"), Some("cls")),
    (Some("echo"), Some("Write-Output"), Some("echo")),
];

fn phrase(row: &Row, dialect: Dialect) -> Option<&'static str> {
    match dialect {
        Dialect::Posix => row.0,
        Dialect::PowerShell => row.1,
        Dialect::Cmd => row.2,
    }
}

fn is_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, ';' | '&' | '|' | '(' | ')')
}

/// Stateless command translator
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellTranslator;

impl ShellTranslator {
    pub fn new() -> Self {
        Self
    }

    /// Translate between two shells (same dialect returns the input)
    pub fn translate(&self, command: &str, from: ShellType, to: ShellType) -> String {
        self.translate_dialect(command, from.dialect(), to.dialect())
    }

    pub fn translate_dialect(&self, command: &str, from: Dialect, to: Dialect) -> String {
        if from == to {
            return command.to_string();
        }

        // Longest source phrase first; stable sort keeps table order on ties
        let mut pairs: Vec<(&str, &str)> = VERBS
            .iter()
            .filter_map(|row| Some((phrase(row, from)?, phrase(row, to)?)))
            .collect();
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let ignore_case = !from.case_sensitive();
        let mut out = String::with_capacity(command.len());
        let mut at_boundary = true;
        let mut rest = command;

        while let Some(c) = rest.chars().next() {
            if at_boundary {
                if let Some((source, target)) = pairs
                    .iter()
                    .find(|(source, _)| matches_at(rest, source, ignore_case))
                {
                    out.push_str(target);
                    rest = &rest[source.len()..];
                    at_boundary = false;
                    continue;
                }
            }

            out.push(c);
            at_boundary = is_boundary(c);
            rest = &rest[c.len_utf8()..];
        }

        out
    }
}

/// `phrase` is a prefix of `text` and ends on a boundary
fn matches_at(text: &str, phrase: &str, ignore_case: bool) -> bool {
    let Some(head) = text.as_bytes().get(..phrase.len()) else {
        return false;
    };

    let equal = if ignore_case {
        head.eq_ignore_ascii_case(phrase.as_bytes())
    } else {
        head == phrase.as_bytes()
    };
    if !equal {
        return false;
    }

    // phrases are ASCII, so a match always ends on a char boundary
    text[phrase.len()..]
        .chars()
        .next()
        .map_or(true, is_boundary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translate(cmd: &str, from: ShellType, to: ShellType) -> String {
        ShellTranslator::new().translate(cmd, from, to)
    }

    #[test]
    fn test_cmd_to_bash_longest_first() {
        let out = translate("dir /b", ShellType::Cmd, ShellType::Bash);
        assert_eq!(out, "ls -1");

        assert_eq!(translate("dir", ShellType::Cmd, ShellType::Bash), "ls");
    }

    #[test]
    fn test_word_boundaries_protect_filenames() {
        assert_eq!(
            translate("type dir_list.txt", ShellType::Cmd, ShellType::Sh),
            "cat dir_list.txt"
        );
        assert_eq!(
            translate("cat catalog.txt", ShellType::Bash, ShellType::Cmd),
            "type catalog.txt"
        );
        assert_eq!(translate("lsblk", ShellType::Bash, ShellType::Cmd), "lsblk");
    }

    #[test]
    fn test_separators_are_boundaries() {
        assert_eq!(
            translate("rm -rf build && ls", ShellType::Bash, ShellType::Cmd),
            "rmdir /s /q build && dir"
        );
        assert_eq!(
            translate("(cat a.txt)|grep x", ShellType::Zsh, ShellType::PowerShell),
            "(Get-Content a.txt)|Select-String x"
        );
    }

    #[test]
    fn test_case_sensitivity_by_dialect() {
        assert_eq!(translate("DIR /B", ShellType::Cmd, ShellType::Bash), "ls -1");
        assert_eq!(
            translate("get-childitem", ShellType::Pwsh, ShellType::Bash),
            "ls"
        );
        // POSIX is case-sensitive
        assert_eq!(translate("LS", ShellType::Bash, ShellType::Cmd), "LS");
    }

    #[test]
    fn test_same_dialect_is_identity() {
        assert_eq!(translate("ls -la", ShellType::Bash, ShellType::Zsh), "ls -la");
        assert_eq!(
            translate("Get-ChildItem", ShellType::PowerShell, ShellType::Pwsh),
            "Get-ChildItem"
        );
    }

    #[test]
    fn test_not_invertible() {
        let forward = translate("mkdir -p a/b", ShellType::Bash, ShellType::Cmd);
        assert_eq!(forward, "mkdir a/b");
        let back = translate(&forward, ShellType::Cmd, ShellType::Bash);
        assert_eq!(back, "mkdir -p a/b");

        let forward = translate("DIR /B", ShellType::Cmd, ShellType::Bash);
        assert_eq!(forward, "ls -1");
        assert_ne!(translate(&forward, ShellType::Bash, ShellType::Cmd), "DIR /B");
    }

    #[test]
    fn test_unicode_passthrough() {
        assert_eq!(
            translate("cat héllo.txt > /dev/null", ShellType::Bash, ShellType::PowerShell),
            "Get-Content héllo.txt > $null"
        );
    }
}
