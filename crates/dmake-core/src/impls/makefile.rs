//! Makefile subset parser.
//!
//! Accepted syntax, line by line:
//! - `target: dep dep ...` starts a rule (must begin in column 1);
//! - lines starting with a tab are commands of the current rule;
//! - blank lines and lines whose first non-blank character is `#` are skipped.

use crate::domain::Rule;
use crate::ports::{Parser, SyntaxError};

#[derive(Debug, Clone, Copy, Default)]
pub struct MakefileParser;

impl MakefileParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for MakefileParser {
    fn parse(&self, source: &str, file: Option<&str>) -> Result<Vec<Rule>, SyntaxError> {
        let mut rules: Vec<Rule> = Vec::new();

        for (index, raw) in source.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim_end();
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if line.starts_with('\t') {
                let Some(rule) = rules.last_mut() else {
                    return Err(SyntaxError::new(file, line_no, 1, "command outside of a rule"));
                };
                rule.commands.push(trimmed.to_string());
                continue;
            }

            if line.starts_with(char::is_whitespace) {
                let column = line.len() - trimmed.len() + 1;
                return Err(SyntaxError::new(
                    file,
                    line_no,
                    column,
                    "rules must start at the beginning of a line and commands with a tab",
                ));
            }

            rules.push(parse_header(line, line_no, file)?);
        }

        Ok(rules)
    }
}

fn parse_header(line: &str, line_no: usize, file: Option<&str>) -> Result<Rule, SyntaxError> {
    let Some(colon) = line.find(':') else {
        return Err(SyntaxError::new(file, line_no, line.len() + 1, "expected `:` after target"));
    };

    let target = line[..colon].trim_end();
    if target.is_empty() {
        return Err(SyntaxError::new(file, line_no, 1, "missing target name"));
    }
    if let Some(space) = target.find(char::is_whitespace) {
        return Err(SyntaxError::new(file, line_no, space + 1, "only one target per rule"));
    }

    let dependencies = line[colon + 1..].split_whitespace().map(str::to_string).collect();
    Ok(Rule::new(target, dependencies, Vec::new(), line_no))
}
