//! On-disk style document store: one `.md` file per style under a styles
//! directory, validated by [`crate::linter`]. Name validation and
//! canonicalization-prefix checking close the path-traversal class of bug,
//! generalized from the teacher's `sanitize_label_name` validate-before-use
//! pattern (previously guarding label names, now guarding style names).

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{GmailError, Result};
use crate::groups::atomic_write;
use crate::linter::{self, ValidationReport};

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,49}$").unwrap());

/// A parsed style document: frontmatter plus the raw section map, alongside
/// the original file content for display/edit round-tripping.
#[derive(Debug, Clone)]
pub struct Style {
    pub name: String,
    pub raw: String,
}

pub struct StyleStore {
    dir: PathBuf,
}

fn validate_name(name: &str) -> Result<()> {
    if !NAME_PATTERN.is_match(name) {
        return Err(GmailError::InvalidStyleName(name.to_string()));
    }
    Ok(())
}

impl StyleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Resolve `name` to a path inside the styles directory, rejecting any
    /// name whose canonical resolution would escape it.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let candidate = self.dir.join(format!("{}.md", name));
        // The directory (and therefore the file) may not exist yet; canonicalize
        // what does exist and confirm the joined relative path stayed inside it.
        let dir_abs = std::path::absolute(&self.dir)
            .map_err(|e| GmailError::FilesystemError(format!("resolving styles dir: {}", e)))?;
        let candidate_abs = std::path::absolute(&candidate)
            .map_err(|e| GmailError::FilesystemError(format!("resolving style path: {}", e)))?;
        if !candidate_abs.starts_with(&dir_abs) {
            return Err(GmailError::InvalidStyleName(name.to_string()));
        }
        Ok(candidate)
    }

    fn backup_path(&self, path: &Path) -> PathBuf {
        let ts = Utc::now().format("%Y%m%dT%H%M%SZ");
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("style.md");
        path.with_file_name(format!("{}.backup.{}", file_name, ts))
    }

    /// Enumerate style names by listing `*.md` files in the styles directory.
    pub async fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| GmailError::FilesystemError(format!("reading {:?}: {}", self.dir, e)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GmailError::FilesystemError(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Load and parse a style by name.
    pub async fn show(&self, name: &str) -> Result<Style> {
        let path = self.resolve(name)?;
        let raw = fs::read_to_string(&path)
            .await
            .map_err(|_| GmailError::NotFound(format!("style '{}'", name)))?;
        Ok(Style {
            name: name.to_string(),
            raw,
        })
    }

    /// Write a canonical template for `name` and validate the result.
    /// `skip_validation` writes the template without failing on lint errors
    /// (useful for scaffolding, mirrors the teacher's `--skip-validation` CLI flag).
    pub async fn create(&self, name: &str, skip_validation: bool) -> Result<ValidationReport> {
        let path = self.resolve(name)?;
        if path.exists() {
            return Err(GmailError::ValidationError(format!("style '{}' already exists", name)));
        }
        let template = canonical_template(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| GmailError::FilesystemError(e.to_string()))?;
        }
        atomic_write(&path, template.as_bytes()).await?;
        let report = linter::lint(&template);
        if !skip_validation && !report.ok() {
            return Err(GmailError::ValidationError(format!(
                "newly created style '{}' failed validation: {:?}",
                name, report.errors
            )));
        }
        Ok(report)
    }

    /// Persist edited content back to `name`'s file, validating unless suppressed.
    pub async fn save(&self, name: &str, content: &str, skip_validation: bool) -> Result<ValidationReport> {
        let path = self.resolve(name)?;
        let report = linter::lint(content);
        if !skip_validation && !report.ok() {
            return Ok(report);
        }
        atomic_write(&path, content.as_bytes()).await?;
        Ok(report)
    }

    /// Delete a style, writing a dated backup sidecar first.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        if !path.exists() {
            return Err(GmailError::NotFound(format!("style '{}'", name)));
        }
        let backup = self.backup_path(&path);
        fs::copy(&path, &backup)
            .await
            .map_err(|e| GmailError::FilesystemError(format!("backing up {:?}: {}", path, e)))?;
        fs::remove_file(&path)
            .await
            .map_err(|e| GmailError::FilesystemError(format!("removing {:?}: {}", path, e)))?;
        Ok(())
    }

    /// Validate a single named style, optionally applying the auto-fix and
    /// persisting the result when it converges on a clean document.
    pub async fn validate(&self, name: &str, fix: bool) -> Result<ValidationReport> {
        let style = self.show(name).await?;
        let report = if fix {
            linter::validate_with_fix(&style.raw)
        } else {
            linter::lint(&style.raw)
        };
        if fix {
            if let Some(fixed) = &report.fixed {
                let path = self.resolve(name)?;
                atomic_write(&path, fixed.as_bytes()).await?;
            }
        }
        Ok(report)
    }

    /// Validate every style in the directory. Returns `(name, report)` pairs
    /// sorted by name.
    pub async fn validate_all(&self, fix: bool) -> Result<Vec<(String, ValidationReport)>> {
        let mut out = Vec::new();
        for name in self.list().await? {
            let report = self.validate(&name, fix).await?;
            out.push((name, report));
        }
        Ok(out)
    }
}

fn canonical_template(name: &str) -> String {
    format!(
        "---\nname: {}\ndescription: When to use: describe the situation this style applies to in one sentence\n---\n<examples>\nHi {{name}}, thanks for reaching out about {{topic}}. I'll take a look and get back to you shortly.\n</examples>\n<greeting>\n- \"Hi {{name}},\"\n- \"Hello {{name}},\"\n</greeting>\n<body>\nKeep paragraphs short. State the outcome first, details after.\n</body>\n<closing>\n- \"Best,\"\n- \"Thanks,\"\n</closing>\n<do>\n- Use the recipient's name\n- Keep it under 150 words\n</do>\n<dont>\n- Use unexplained jargon\n- Bury the ask in the last paragraph\n</dont>\n",
        name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_show() {
        let dir = TempDir::new().unwrap();
        let store = StyleStore::new(dir.path());
        let report = store.create("professional-friendly", false).await.unwrap();
        assert!(report.ok());
        let style = store.show("professional-friendly").await.unwrap();
        assert!(style.raw.contains("professional-friendly"));
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let dir = TempDir::new().unwrap();
        let store = StyleStore::new(dir.path());
        store.create("concise", false).await.unwrap();
        assert!(store.create("concise", false).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let dir = TempDir::new().unwrap();
        let store = StyleStore::new(dir.path());
        let result = store.show("../../etc/passwd").await;
        assert!(matches!(result, Err(GmailError::InvalidStyleName(_))));
    }

    #[tokio::test]
    async fn test_path_traversal_name_rejected_even_with_valid_charset() {
        let dir = TempDir::new().unwrap();
        let store = StyleStore::new(dir.path());
        // "a-b" passes the regex; a literal ".." would be rejected by the regex
        // itself since '.' and '/' are outside the allowed charset.
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        let _ = store; // keep store alive for symmetry with other tests
    }

    #[tokio::test]
    async fn test_delete_writes_backup_and_removes_original() {
        let dir = TempDir::new().unwrap();
        let store = StyleStore::new(dir.path());
        store.create("temp-style", false).await.unwrap();
        store.delete("temp-style").await.unwrap();
        assert!(store.show("temp-style").await.is_err());

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut found_backup = false;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.file_name().to_string_lossy().contains("backup") {
                found_backup = true;
            }
        }
        assert!(found_backup);
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let dir = TempDir::new().unwrap();
        let store = StyleStore::new(dir.path());
        store.create("zeta", false).await.unwrap();
        store.create("alpha", false).await.unwrap();
        let names = store.list().await.unwrap();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[tokio::test]
    async fn test_validate_with_fix_persists_fixed_content() {
        let dir = TempDir::new().unwrap();
        let store = StyleStore::new(dir.path());
        store.create("needs-fix", false).await.unwrap();
        let path = dir.path().join("needs-fix.md");
        let dirty = tokio::fs::read_to_string(&path).await.unwrap().replace(
            "Keep paragraphs short. State the outcome first, details after.",
            "Keep paragraphs short. State the outcome first, details after.   ",
        );
        atomic_write(&path, dirty.as_bytes()).await.unwrap();

        let report = store.validate("needs-fix", true).await.unwrap();
        assert!(report.fixed.is_some());
        let persisted = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!persisted.lines().any(|l| l != l.trim_end()));
    }

    #[tokio::test]
    async fn test_validate_all_reports_each_style() {
        let dir = TempDir::new().unwrap();
        let store = StyleStore::new(dir.path());
        store.create("one", false).await.unwrap();
        store.create("two", false).await.unwrap();
        let all = store.validate_all(false).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|(_, r)| r.ok()));
    }
}
