//! Pure-function structural validator for style documents. No I/O: takes the
//! raw file content, returns a report. `styles.rs` owns reading/writing files.

use serde::Serialize;
use std::fmt;

/// Canonical section order. `S002`/`S001`/`S004` are all checked against this list.
pub const REQUIRED_SECTIONS: &[&str] = &["examples", "greeting", "body", "closing", "do", "dont"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintError {
    pub rule: &'static str,
    pub line: Option<usize>,
    pub message: String,
    pub fixable: bool,
}

impl fmt::Display for LintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "[{}] line {}: {}", self.rule, line, self.message),
            None => write!(f, "[{}] {}", self.rule, self.message),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<LintError>,
    pub fixed: Option<String>,
}

impl ValidationReport {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

struct Frontmatter {
    name: Option<String>,
    description: Option<String>,
    unknown_keys: Vec<String>,
}

/// Split the document into frontmatter (delimited by `---` lines) and body.
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let mut lines = content.lines();
    if lines.next()?.trim() != "---" {
        return None;
    }
    let rest = &content[content.find('\n').map(|i| i + 1).unwrap_or(content.len())..];
    let end = rest.lines().position(|l| l.trim() == "---")?;
    let mut offset = 0;
    for line in rest.lines().take(end) {
        offset += line.len() + 1;
    }
    let fm_block = &rest[..offset];
    let after_offset = rest
        .lines()
        .take(end + 1)
        .map(|l| l.len() + 1)
        .sum::<usize>();
    let body = &rest[after_offset.min(rest.len())..];
    Some((fm_block, body))
}

fn parse_frontmatter(block: &str) -> Frontmatter {
    let mut name = None;
    let mut description = None;
    let mut unknown_keys = Vec::new();
    for line in block.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            let value = value.trim().trim_matches('"').to_string();
            match key {
                "name" => name = Some(value),
                "description" => description = Some(value),
                other => unknown_keys.push(other.to_string()),
            }
        }
    }
    Frontmatter {
        name,
        description,
        unknown_keys,
    }
}

/// Find `<tag>...</tag>` blocks in document order, returning (tag, start_line, inner content).
fn find_sections(body: &str) -> Vec<(String, usize, String)> {
    let mut out = Vec::new();
    let lines: Vec<&str> = body.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim();
        if let Some(tag) = trimmed
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .filter(|s| !s.starts_with('/'))
        {
            let close = format!("</{}>", tag);
            let mut j = i + 1;
            let mut inner_lines = Vec::new();
            while j < lines.len() && lines[j].trim() != close {
                inner_lines.push(lines[j]);
                j += 1;
            }
            if j < lines.len() {
                out.push((tag.to_string(), i + 1, inner_lines.join("\n")));
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }
    out
}

/// Validate `content` against the style document rule table. Does not mutate input.
pub fn lint(content: &str) -> ValidationReport {
    let mut errors = Vec::new();

    let (fm_block, body) = match split_frontmatter(content) {
        Some(parts) => parts,
        None => {
            errors.push(LintError {
                rule: "F001",
                line: Some(1),
                message: "Frontmatter block present and valid".to_string(),
                fixable: false,
            });
            return ValidationReport { errors, fixed: None };
        }
    };

    let fm = parse_frontmatter(fm_block);

    match &fm.name {
        Some(n) if (3..=50).contains(&n.len()) => {}
        Some(n) => errors.push(LintError {
            rule: "F002",
            line: None,
            message: format!("name '{}' must be 3..50 characters", n),
            fixable: false,
        }),
        None => errors.push(LintError {
            rule: "F002",
            line: None,
            message: "name field is missing".to_string(),
            fixable: false,
        }),
    }

    match &fm.description {
        Some(d) if (30..=200).contains(&d.len()) && d.starts_with("When to use:") => {}
        Some(d) if !(30..=200).contains(&d.len()) => errors.push(LintError {
            rule: "F003",
            line: None,
            message: "description must be 30..200 characters".to_string(),
            fixable: false,
        }),
        Some(_) => errors.push(LintError {
            rule: "F003",
            line: None,
            message: "description must start with 'When to use:'".to_string(),
            fixable: false,
        }),
        None => errors.push(LintError {
            rule: "F003",
            line: None,
            message: "description field is missing".to_string(),
            fixable: false,
        }),
    }

    if !fm.unknown_keys.is_empty() {
        errors.push(LintError {
            rule: "F004",
            line: None,
            message: format!("unknown frontmatter keys: {}", fm.unknown_keys.join(", ")),
            fixable: false,
        });
    }

    let sections = find_sections(body);
    let present: Vec<&str> = sections.iter().map(|(tag, _, _)| tag.as_str()).collect();

    for required in REQUIRED_SECTIONS {
        if !present.contains(required) {
            errors.push(LintError {
                rule: "S001",
                line: None,
                message: format!("Missing section: {}", required),
                fixable: false,
            });
        }
    }

    for (tag, line, _) in &sections {
        if !REQUIRED_SECTIONS.contains(&tag.as_str()) {
            errors.push(LintError {
                rule: "S004",
                line: Some(*line),
                message: format!("unknown section: {}", tag),
                fixable: false,
            });
        }
    }

    let mut seen = std::collections::HashSet::new();
    for (tag, line, _) in &sections {
        if !seen.insert(tag.clone()) {
            errors.push(LintError {
                rule: "S003",
                line: Some(*line),
                message: format!("duplicate section: {}", tag),
                fixable: false,
            });
        }
    }

    let known_present: Vec<&(String, usize, String)> = sections
        .iter()
        .filter(|(tag, _, _)| REQUIRED_SECTIONS.contains(&tag.as_str()))
        .collect();
    let order: Vec<&str> = known_present.iter().map(|(t, _, _)| t.as_str()).collect();
    let expected_order: Vec<&str> = REQUIRED_SECTIONS
        .iter()
        .filter(|s| order.contains(s))
        .copied()
        .collect();
    if order != expected_order {
        errors.push(LintError {
            rule: "S002",
            line: None,
            message: "sections are not in canonical order (examples, greeting, body, closing, do, dont)".to_string(),
            fixable: false,
        });
    }

    for (tag, line, inner) in &sections {
        match tag.as_str() {
            "examples" => {
                let has_example = inner.lines().any(|l| !l.trim().is_empty() && l.trim() != "---");
                if !has_example {
                    errors.push(LintError {
                        rule: "C001",
                        line: Some(*line),
                        message: "examples section must contain at least one example".to_string(),
                        fixable: false,
                    });
                }
            }
            "do" | "dont" => {
                let bullets: Vec<&str> = inner.lines().filter(|l| !l.trim().is_empty()).collect();
                if bullets.is_empty() {
                    errors.push(LintError {
                        rule: "C002",
                        line: Some(*line),
                        message: format!("{} section must contain at least one bullet", tag),
                        fixable: false,
                    });
                }
                for (offset, bullet_line) in bullets.iter().enumerate() {
                    if !bullet_line.starts_with("- ") {
                        errors.push(LintError {
                            rule: "C003",
                            line: Some(*line + offset),
                            message: "bullet lines must start with '- '".to_string(),
                            fixable: true,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    for (idx, line) in content.lines().enumerate() {
        if line != line.trim_end() {
            errors.push(LintError {
                rule: "W001",
                line: Some(idx + 1),
                message: "trailing whitespace".to_string(),
                fixable: true,
            });
        }
    }

    if !content.ends_with('\n') || content.ends_with("\n\n") {
        errors.push(LintError {
            rule: "W002",
            line: None,
            message: "file must end with exactly one trailing newline".to_string(),
            fixable: true,
        });
    }

    ValidationReport { errors, fixed: None }
}

/// Apply only the narrowly-scoped whitespace/newline fixes (`W001`/`W002`/`C003`'s
/// dash-spacing form). Never touches structure or semantic content. Returns the
/// input unchanged if a non-fixable violation is present — callers should check
/// `lint(content)` for structural errors before calling this.
pub fn autofix(content: &str) -> String {
    let mut out = String::new();
    for line in content.lines() {
        let trimmed = line.trim_end();
        let fixed_line = if let Some(rest) = trimmed.strip_prefix('-') {
            if rest.starts_with(' ') || rest.is_empty() {
                trimmed.to_string()
            } else {
                format!("- {}", rest.trim_start())
            }
        } else {
            trimmed.to_string()
        };
        out.push_str(&fixed_line);
        out.push('\n');
    }
    while out.ends_with("\n\n") {
        out.pop();
    }
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Runs `autofix` only when no non-`W*`/dash-spacing violation exists; returns
/// `None` when a structural rule failed and nothing was fixed.
pub fn validate_with_fix(content: &str) -> ValidationReport {
    let report = lint(content);
    if report.ok() {
        return report;
    }
    let has_unfixable = report.errors.iter().any(|e| !e.fixable);
    if has_unfixable {
        return report;
    }
    let fixed = autofix(content);
    let refixed = lint(&fixed);
    ValidationReport {
        errors: report.errors,
        fixed: if refixed.ok() { Some(fixed) } else { None },
    }
}
