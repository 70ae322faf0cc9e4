//! Git command helpers
//!
//! Building git invocations from the configured command stem, and reading
//! git's progress output.

use crate::process::ProcessSpec;
use branchwork_foundation::EngineConfig;
use regex::Regex;
use std::sync::OnceLock;

/// Environment every git invocation gets
const GIT_ENV: [(&str, &str); 2] = [("GIT_TERMINAL_PROMPT", "0"), ("LC_ALL", "C")];

/// Git process with `args`, using the configured git command
pub fn command<I, S>(config: &EngineConfig, args: I) -> ProcessSpec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut stem = config.git_command_stem().into_iter();
    let program = stem.next().unwrap_or_else(|| "git".to_string());
    let mut spec = ProcessSpec::new(program).args(stem).args(args);
    for (key, value) in GIT_ENV {
        spec = spec.env(key, value);
    }
    spec
}

fn fraction_regex() -> Option<&'static Regex> {
    static FRACTION: OnceLock<Option<Regex>> = OnceLock::new();
    FRACTION
        .get_or_init(|| Regex::new(r"\((\d+)/(\d+)\)").ok())
        .as_ref()
}

/// Progress state parsed from one chunk of git's stderr
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitProgress {
    /// Last meaningful line
    pub text: String,
    /// `(done, total)` if the line carries a fraction like `(12/40)`
    pub fraction: Option<(u64, u64)>,
}

impl GitProgress {
    pub fn percent(&self) -> Option<u8> {
        let (done, total) = self.fraction?;
        if total == 0 {
            return None;
        }
        Some(((done.min(total) * 100) / total) as u8)
    }
}

/// Parse the latest progress line out of git's stderr.
///
/// Git rewrites progress lines in place with `\r`; only the last state of the
/// last non-empty line matters.
pub fn parse_progress(stderr: &str) -> Option<GitProgress> {
    let text = stderr
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()?
        .to_string();

    let fraction = fraction_regex()
        .and_then(|re| re.captures(&text))
        .and_then(|caps| {
            let done = caps.get(1)?.as_str().parse().ok()?;
            let total = caps.get(2)?.as_str().parse().ok()?;
            Some((done, total))
        });

    Some(GitProgress { text, fraction })
}

/// Stderr with progress lines collapsed to their final state
pub fn scrollback(stderr: &str) -> String {
    stderr
        .split('\n')
        .filter_map(|line| line.rsplit('\r').find(|part| !part.trim().is_empty()))
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Abbreviated hash and summary of a commit, read from `git commit` output
/// (`[main 1a2b3c4] Summary`)
pub fn parse_commit_summary(stdout: &str) -> Option<(String, String)> {
    let line = stdout.lines().find(|line| line.starts_with('['))?;
    let close = line.find(']')?;
    let header = &line[1..close];
    let hash = header.split_whitespace().last()?.to_string();
    let summary = line[close + 1..].trim().to_string();
    Some((hash, summary))
}
