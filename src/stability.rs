use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};

/* ============================= TYPES ============================= */

/// One sample: key (pod, policy, interface...) to observed value.
///
/// `BTreeMap` keeps keys sorted, which fixes the column order of every line
/// written from the same key set.
pub type Sample = BTreeMap<String, String>;

/// A parsed stability log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StabilityLogLine {
    pub timestamp: String,
    pub pairs: Vec<(String, String)>,
}

/// A value that differs from the previous line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StabilityChange {
    /// 1-based line number where the new value appears.
    pub line: usize,
    /// 0-based field index of the value column.
    pub column: usize,
    pub key: String,
    pub before: String,
    pub after: String,
}

impl fmt::Display for StabilityChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "change detected at line {} column {} ({}): from {} to {}",
            self.line, self.column, self.key, self.before, self.after
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilityVerdict {
    Stable,
    Changed(StabilityChange),
}

impl StabilityVerdict {
    pub fn changed(&self) -> bool {
        matches!(self, StabilityVerdict::Changed(_))
    }

    pub fn change(&self) -> Option<&StabilityChange> {
        match self {
            StabilityVerdict::Changed(c) => Some(c),
            StabilityVerdict::Stable => None,
        }
    }

    /// `Ok(())` when stable, otherwise an error describing the change.
    pub fn into_result(self) -> Result<()> {
        match self {
            StabilityVerdict::Stable => Ok(()),
            StabilityVerdict::Changed(c) => Err(anyhow::anyhow!("{c}")),
        }
    }
}

/* ============================= RECORDER ============================= */

/// Format a sample as a log line (without trailing newline).
pub fn format_line(timestamp: &str, sample: &Sample) -> Result<String> {
    let mut line = String::from(timestamp);

    for (key, value) in sample {
        for field in [key, value] {
            if field.contains(',') || field.contains('\n') || field.contains('\r') {
                anyhow::bail!("field {field:?} cannot be written to a stability log");
            }
        }
        line.push(',');
        line.push_str(key);
        line.push(',');
        line.push_str(value);
    }

    Ok(line)
}

/// Append one timestamped sample to `path`.
///
/// The file is opened, written and closed on every call.
pub fn write_sample(path: &Path, sample: &Sample) -> Result<()> {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let line = format_line(&timestamp, sample)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open stability log {}", path.display()))?;

    writeln!(file, "{line}")
        .with_context(|| format!("Failed to write stability log {}", path.display()))?;

    Ok(())
}

/// Log file name for a sampler kind and optional namespace.
pub fn log_path(output_dir: &Path, kind: &str, namespace: Option<&str>) -> PathBuf {
    match namespace {
        Some(ns) => output_dir.join(format!("stability_{kind}_{ns}.log")),
        None => output_dir.join(format!("stability_{kind}.log")),
    }
}

/// Move an existing log to `<name>.prev` so the next write starts a new file.
///
/// Returns the `.prev` path when a log was moved. An older `.prev` is replaced.
pub fn rotate_log(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut prev = path.as_os_str().to_owned();
    prev.push(".prev");
    let prev = PathBuf::from(prev);

    fs::rename(path, &prev)
        .with_context(|| format!("Failed to rotate stability log {}", path.display()))?;
    Ok(Some(prev))
}

/* ============================= VERIFIER ============================= */

/// Split a line into its timestamp and key/value pairs.
pub fn parse_line(line: &str) -> Result<StabilityLogLine> {
    let fields: Vec<&str> = line.split(',').collect();

    if fields.len() % 2 == 0 {
        anyhow::bail!(
            "expected a timestamp followed by key,value pairs but found {} fields",
            fields.len()
        );
    }

    let pairs = fields[1..]
        .chunks_exact(2)
        .map(|kv| (kv[0].to_string(), kv[1].to_string()))
        .collect();

    Ok(StabilityLogLine {
        timestamp: fields[0].to_string(),
        pairs,
    })
}

/// Compare each line's values against the previous line.
///
/// Stops at the first changed value. Lines with a different key layout than
/// their predecessor are an error, not a change.
pub fn verify_lines<I, S>(lines: I) -> Result<StabilityVerdict>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut previous: Option<StabilityLogLine> = None;

    for (idx, raw) in lines.into_iter().enumerate() {
        let line_no = idx + 1;
        let raw = raw.as_ref().trim_end_matches('\r');
        if raw.trim().is_empty() {
            continue;
        }

        let current = parse_line(raw).with_context(|| format!("malformed line {line_no}"))?;

        if let Some(prev) = &previous {
            if prev.pairs.len() != current.pairs.len() {
                anyhow::bail!(
                    "line {line_no} has {} key,value pairs, previous line has {}",
                    current.pairs.len(),
                    prev.pairs.len()
                );
            }

            for (i, ((prev_key, prev_val), (key, val))) in
                prev.pairs.iter().zip(&current.pairs).enumerate()
            {
                if prev_key != key {
                    anyhow::bail!(
                        "line {line_no} has key {key:?} where previous line has {prev_key:?}"
                    );
                }

                if prev_val != val {
                    return Ok(StabilityVerdict::Changed(StabilityChange {
                        line: line_no,
                        column: 2 + 2 * i,
                        key: key.clone(),
                        before: prev_val.clone(),
                        after: val.clone(),
                    }));
                }
            }
        }

        previous = Some(current);
    }

    Ok(StabilityVerdict::Stable)
}

/// Read a stability log and report the first value change, if any.
pub fn verify_log(path: &Path) -> Result<StabilityVerdict> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open stability log {}", path.display()))?;

    let lines = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to read stability log {}", path.display()))?;

    verify_lines(lines).with_context(|| format!("Invalid stability log {}", path.display()))
}

/* ============================= TESTS ============================= */
