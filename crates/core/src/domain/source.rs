// Migration & Seeder Module Parsing
// Modules are plain .sql files. Optional header directives:
//   -- partitions: name[, name...]   restrict the module to those partitions
// Migration bodies may carry an `-- up` / `-- down` section split.

use crate::error::{AppError, Result};

/// A schema migration discovered from the source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationModule {
    /// Token before the first `_` of the filename; lexical order is
    /// application order, so authors zero-pad.
    pub version: String,
    /// File stem, e.g. `001_init`.
    pub name: String,
    /// Restriction list; `None` applies everywhere.
    pub partitions: Option<Vec<String>>,
    pub up: String,
    pub down: Option<String>,
}

impl MigrationModule {
    pub fn parse(file_name: &str, content: &str) -> Result<Self> {
        let stem = sql_stem(file_name)?;
        let version = stem.split('_').next().unwrap_or(stem).to_string();
        let (partitions, body) = take_partitions_header(content);
        let (up, down) = split_up_down(&body);

        if up.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Migration {file_name} has an empty up script"
            )));
        }

        Ok(Self {
            version,
            name: stem.to_string(),
            partitions,
            up,
            down,
        })
    }

    pub fn applies_to(&self, partition: &str) -> bool {
        match &self.partitions {
            Some(list) => list.iter().any(|p| p == partition),
            None => true,
        }
    }
}

/// A data seeder discovered from the source directory. Keyed by name; no
/// ordering dependency beyond discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeederModule {
    /// File stem, e.g. `001_demo_accounts`.
    pub name: String,
    pub partitions: Option<Vec<String>>,
    pub sql: String,
}

impl SeederModule {
    pub fn parse(file_name: &str, content: &str) -> Result<Self> {
        let stem = sql_stem(file_name)?;
        let (partitions, body) = take_partitions_header(content);

        if body.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Seeder {file_name} has an empty script"
            )));
        }

        Ok(Self {
            name: stem.to_string(),
            partitions,
            sql: body,
        })
    }

    pub fn applies_to(&self, partition: &str) -> bool {
        match &self.partitions {
            Some(list) => list.iter().any(|p| p == partition),
            None => true,
        }
    }
}

fn sql_stem<'a>(file_name: &'a str) -> Result<&'a str> {
    file_name
        .strip_suffix(".sql")
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| {
            AppError::Validation(format!("Module file name must end in .sql: {file_name}"))
        })
}

/// Pull a leading `-- partitions:` directive off the script, if present.
fn take_partitions_header(content: &str) -> (Option<Vec<String>>, String) {
    let mut partitions = None;
    let mut body_lines = Vec::new();
    let mut in_header = true;

    for line in content.lines() {
        let trimmed = line.trim();
        if in_header {
            if trimmed.is_empty() {
                continue;
            }
            if let Some(rest) = strip_directive(trimmed, "partitions:") {
                partitions = Some(
                    rest.split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect(),
                );
                continue;
            }
            in_header = false;
        }
        body_lines.push(line);
    }

    (partitions, body_lines.join("\n"))
}

fn strip_directive<'a>(line: &'a str, directive: &str) -> Option<&'a str> {
    let rest = line.strip_prefix("--")?.trim_start();
    if rest.to_ascii_lowercase().starts_with(directive) {
        Some(rest[directive.len()..].trim())
    } else {
        None
    }
}

/// Split a migration body into up and down scripts. `-- up` is optional
/// when there is no `-- down` section.
fn split_up_down(body: &str) -> (String, Option<String>) {
    let mut up_lines = Vec::new();
    let mut down_lines = Vec::new();
    let mut in_down = false;

    for line in body.lines() {
        let trimmed = line.trim().to_ascii_lowercase();
        if trimmed == "-- up" {
            continue;
        }
        if trimmed == "-- down" {
            in_down = true;
            continue;
        }
        if in_down {
            down_lines.push(line);
        } else {
            up_lines.push(line);
        }
    }

    let down = if in_down {
        Some(down_lines.join("\n"))
    } else {
        None
    };
    (up_lines.join("\n"), down)
}

/// Split a script into executable statements: comment lines stripped,
/// statements separated by `;`.
pub fn split_statements(script: &str) -> Vec<String> {
    script
        .split(';')
        .map(|statement| {
            statement
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|statement| !statement.is_empty())
        .collect()
}
