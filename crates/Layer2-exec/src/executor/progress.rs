//! Progress extraction from command output lines

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Progress parsed from one output line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    /// 0-100
    pub percent: Option<f64>,
    pub current: Option<u64>,
    pub total: Option<u64>,
    /// The line it was parsed from, escape sequences removed
    pub message: String,
}

struct Patterns {
    percent: Regex,
    step: Regex,
    fraction: Regex,
    bar: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        percent: Regex::new(r"(\d{1,3}(?:\.\d+)?)\s?%").expect("percent pattern is valid"),
        step: Regex::new(r"(?i)\b(?:step|stage|phase|building|compiling|downloading|installing)\s+(\d+)\s*(?:of|/)\s*(\d+)")
            .expect("step pattern is valid"),
        fraction: Regex::new(r"(?:^|[\s\[(])(\d+)\s*/\s*(\d+)(?:$|[\s\])])").expect("fraction pattern is valid"),
        bar: Regex::new(r"\[([#=>\-\.\s]+)\]").expect("bar pattern is valid"),
    })
}

fn ratio(current: u64, total: u64) -> f64 {
    (current as f64 / total as f64 * 100.0).min(100.0)
}

/// Parse a single line; None when no progress pattern applies
pub fn parse_progress(line: &str) -> Option<Progress> {
    let clean = String::from_utf8_lossy(&strip_ansi_escapes::strip(line)).into_owned();
    let clean = clean.trim();
    if clean.is_empty() {
        return None;
    }

    let p = patterns();
    let mut progress = Progress {
        percent: None,
        current: None,
        total: None,
        message: clean.to_string(),
    };

    if let Some(caps) = p.step.captures(clean) {
        let (current, total) = (caps[1].parse::<u64>().ok()?, caps[2].parse::<u64>().ok()?);
        if total > 0 && current <= total {
            progress.current = Some(current);
            progress.total = Some(total);
            progress.percent = Some(ratio(current, total));
        }
    } else if let Some(caps) = p.fraction.captures(clean) {
        let (current, total) = (caps[1].parse::<u64>().ok()?, caps[2].parse::<u64>().ok()?);
        if total > 0 && current <= total {
            progress.current = Some(current);
            progress.total = Some(total);
            progress.percent = Some(ratio(current, total));
        }
    }

    // An explicit percentage is more precise than a derived one
    if let Some(caps) = p.percent.captures(clean) {
        if let Ok(value) = caps[1].parse::<f64>() {
            if value <= 100.0 {
                progress.percent = Some(value);
            }
        }
    }

    if progress.percent.is_none() {
        if let Some(caps) = p.bar.captures(clean) {
            let bar = &caps[1];
            let width = bar.chars().count();
            let filled = bar.chars().filter(|c| matches!(c, '#' | '=' | '>')).count();
            if width >= 4 && filled > 0 {
                progress.percent = Some(ratio(filled as u64, width as u64));
            }
        }
    }

    progress.percent.map(|_| progress)
}

/// Splits a chunk stream into lines (`\n` or `\r`), keeping partial tails
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    partial: String,
}

impl LineSplitter {
    pub fn push(&mut self, text: &str) -> Vec<String> {
        let mut lines = Vec::new();
        for c in text.chars() {
            if c == '\n' || c == '\r' {
                if !self.partial.is_empty() {
                    lines.push(std::mem::take(&mut self.partial));
                }
            } else {
                self.partial.push(c);
            }
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        (!self.partial.is_empty()).then(|| std::mem::take(&mut self.partial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        let p = parse_progress("Downloading... 45%").unwrap();
        assert_eq!(p.percent, Some(45.0));
        assert_eq!(p.message, "Downloading... 45%");

        let p = parse_progress("progress 12.5 %").unwrap();
        assert_eq!(p.percent, Some(12.5));
    }

    #[test]
    fn test_step_phrases_and_fractions() {
        let p = parse_progress("Step 3 of 4: linking").unwrap();
        assert_eq!((p.current, p.total), (Some(3), Some(4)));
        assert_eq!(p.percent, Some(75.0));

        let p = parse_progress("[2/8] Compiling serde").unwrap();
        assert_eq!((p.current, p.total), (Some(2), Some(8)));
        assert_eq!(p.percent, Some(25.0));

        // dates and impossible ratios are not progress
        assert!(parse_progress("released 2024/01/05").is_none());
        assert!(parse_progress("9/3 done").is_none());
    }

    #[test]
    fn test_bracket_bar() {
        let p = parse_progress("[#####-----]").unwrap();
        assert_eq!(p.percent, Some(50.0));
        assert!(parse_progress("[----------]").is_none());
    }

    #[test]
    fn test_ansi_is_stripped() {
        let p = parse_progress("\x1b[32m80%\x1b[0m complete").unwrap();
        assert_eq!(p.percent, Some(80.0));
        assert_eq!(p.message, "80% complete");
    }

    #[test]
    fn test_plain_line_is_not_progress() {
        assert!(parse_progress("hello world").is_none());
        assert!(parse_progress("   ").is_none());
    }

    #[test]
    fn test_line_splitter() {
        let mut splitter = LineSplitter::default();
        assert_eq!(splitter.push("10%\r20"), vec!["10%".to_string()]);
        assert_eq!(splitter.push("%\nrest"), vec!["20%".to_string()]);
        assert_eq!(splitter.finish().as_deref(), Some("rest"));
        assert!(splitter.finish().is_none());
    }
}
