//! Named alias → ordered set of addresses, persisted as a single JSON document
//! (`email-groups.json`), generalized from the teacher's `ExclusionManager`
//! single-JSON-document persistence idiom with two additions the workflow/style
//! stores share: atomic write (temp file + rename) and a timestamped backup
//! sidecar written before every destructive operation.

use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{GmailError, Result};
use crate::models::{dedup_addresses, Address};

const GROUP_NAME_PATTERN_MAX_LEN: usize = 64;

fn is_valid_group_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= GROUP_NAME_PATTERN_MAX_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A per-group validation verdict.
#[derive(Debug, Clone)]
pub struct GroupValidation {
    pub name: String,
    pub malformed_addresses: Vec<String>,
    pub duplicate_addresses: Vec<String>,
}

impl GroupValidation {
    pub fn ok(&self) -> bool {
        self.malformed_addresses.is_empty() && self.duplicate_addresses.is_empty()
    }
}

/// On-disk persistence for named address groups.
///
/// Backed by a single JSON document mapping group name to an ordered list of
/// address strings. Every mutating operation re-reads the document, applies
/// the change, and writes it back atomically.
pub struct GroupStore {
    path: PathBuf,
}

impl GroupStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_raw(&self) -> Result<HashMap<String, Vec<String>>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| GmailError::FilesystemError(format!("reading {:?}: {}", self.path, e)))?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&content).map_err(GmailError::from)
    }

    async fn write_raw(&self, data: &HashMap<String, Vec<String>>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| GmailError::FilesystemError(format!("creating {:?}: {}", parent, e)))?;
        }
        let content = serde_json::to_string_pretty(data)?;
        atomic_write(&self.path, content.as_bytes()).await
    }

    async fn backup(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let ts = Utc::now().format("%Y%m%dT%H%M%SZ");
        let backup_path = self.path.with_extension(format!("json.backup.{}", ts));
        fs::copy(&self.path, &backup_path)
            .await
            .map_err(|e| GmailError::FilesystemError(format!("backing up {:?}: {}", self.path, e)))?;
        Ok(())
    }

    /// List all group names.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.read_raw().await?.into_keys().collect();
        names.sort();
        Ok(names)
    }

    /// Fetch a group's ordered member list, parsed into [`Address`] values.
    pub async fn get(&self, name: &str) -> Result<Vec<Address>> {
        let raw = self.read_raw().await?;
        let members = raw
            .get(name)
            .ok_or_else(|| GmailError::UnknownGroup(name.to_string()))?;
        members.iter().map(|s| Address::parse(s)).collect()
    }

    /// Create a new group. Fails if the name is invalid or the group already exists.
    pub async fn create(&self, name: &str, members: &[Address]) -> Result<()> {
        if !is_valid_group_name(name) {
            return Err(GmailError::ValidationError(format!(
                "group name '{}' must match [A-Za-z0-9_-]{{1,64}}",
                name
            )));
        }
        let mut raw = self.read_raw().await?;
        if raw.contains_key(name) {
            return Err(GmailError::ValidationError(format!("group '{}' already exists", name)));
        }
        raw.insert(name.to_string(), members.iter().map(|a| a.to_string()).collect());
        self.write_raw(&raw).await
    }

    /// Add a member, preserving order. Rejects duplicates (case-sensitive local,
    /// case-insensitive domain) with [`GmailError::DuplicateMember`].
    pub async fn add_member(&self, name: &str, addr: &Address) -> Result<()> {
        let mut raw = self.read_raw().await?;
        let members = raw
            .get_mut(name)
            .ok_or_else(|| GmailError::UnknownGroup(name.to_string()))?;
        let key = addr.dedup_key();
        let already_present = members
            .iter()
            .filter_map(|m| Address::parse(m).ok())
            .any(|existing| existing.dedup_key() == key);
        if already_present {
            return Err(GmailError::DuplicateMember {
                group: name.to_string(),
                address: addr.email(),
            });
        }
        members.push(addr.to_string());
        self.write_raw(&raw).await
    }

    /// Remove a member by address. `force` is accepted for CLI symmetry but the
    /// store itself performs no confirmation; the caller gates that.
    pub async fn remove_member(&self, name: &str, addr: &Address) -> Result<()> {
        let mut raw = self.read_raw().await?;
        let members = raw
            .get_mut(name)
            .ok_or_else(|| GmailError::UnknownGroup(name.to_string()))?;
        let key = addr.dedup_key();
        let before = members.len();
        members.retain(|m| {
            Address::parse(m)
                .map(|existing| existing.dedup_key() != key)
                .unwrap_or(true)
        });
        if members.len() == before {
            return Err(GmailError::NotFound(format!(
                "{} is not a member of {}",
                addr.email(),
                name
            )));
        }
        self.write_raw(&raw).await
    }

    /// Delete a whole group, writing a timestamped backup of the store first.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let mut raw = self.read_raw().await?;
        if !raw.contains_key(name) {
            return Err(GmailError::UnknownGroup(name.to_string()));
        }
        self.backup().await?;
        raw.remove(name);
        self.write_raw(&raw).await
    }

    /// Validate one group (or all groups when `name` is `None`) for address
    /// well-formedness and intra-group duplicates. Cross-group duplicates are
    /// allowed by design.
    pub async fn validate(&self, name: Option<&str>) -> Result<Vec<GroupValidation>> {
        let raw = self.read_raw().await?;
        let names: Vec<String> = match name {
            Some(n) => {
                if !raw.contains_key(n) {
                    return Err(GmailError::UnknownGroup(n.to_string()));
                }
                vec![n.to_string()]
            }
            None => raw.keys().cloned().collect(),
        };

        let mut reports = Vec::new();
        for group_name in names {
            let members = &raw[&group_name];
            let mut malformed = Vec::new();
            let mut seen = std::collections::HashSet::new();
            let mut duplicates = Vec::new();
            for raw_addr in members {
                match Address::parse(raw_addr) {
                    Ok(addr) => {
                        if !seen.insert(addr.dedup_key()) {
                            duplicates.push(raw_addr.clone());
                        }
                    }
                    Err(_) => malformed.push(raw_addr.clone()),
                }
            }
            reports.push(GroupValidation {
                name: group_name,
                malformed_addresses: malformed,
                duplicate_addresses: duplicates,
            });
        }
        Ok(reports)
    }

    /// Expand a list of recipient tokens: `#group` resolves via [`Self::get`],
    /// everything else is parsed as a literal [`Address`]. The result is
    /// de-duplicated preserving first occurrence across the whole combined list.
    pub async fn expand(&self, tokens: &[String]) -> Result<Vec<Address>> {
        let mut all = Vec::new();
        for token in tokens {
            if let Some(group_name) = token.strip_prefix('#') {
                all.extend(self.get(group_name).await?);
            } else {
                all.push(Address::parse(token)?);
            }
        }
        Ok(dedup_addresses(all))
    }
}

/// Write `data` to `path` atomically: write to a sibling temp file, then rename
/// into place. A crash mid-write leaves only the (ignored) temp file; readers
/// never observe a partially written target.
pub async fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| GmailError::FilesystemError(format!("{:?} has no parent directory", path)))?;
    let tmp_name = format!(".{}.tmp.{}", path.file_name().and_then(|n| n.to_str()).unwrap_or("store"), uuid::Uuid::new_v4());
    let tmp_path = parent.join(tmp_name);

    fs::write(&tmp_path, data)
        .await
        .map_err(|e| GmailError::FilesystemError(format!("writing temp file {:?}: {}", tmp_path, e)))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        let _ = fs::set_permissions(&tmp_path, perms).await;
    }

    fs::rename(&tmp_path, path)
        .await
        .map_err(|e| GmailError::FilesystemError(format!("renaming {:?} to {:?}: {}", tmp_path, path, e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_group() {
        let dir = TempDir::new().unwrap();
        let store = GroupStore::new(dir.path().join("email-groups.json"));
        store.create("team", &[addr("a@x.com"), addr("b@x.com")]).await.unwrap();

        let members = store.get("team").await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].email(), "a@x.com");
    }

    #[tokio::test]
    async fn test_create_duplicate_name_fails() {
        let dir = TempDir::new().unwrap();
        let store = GroupStore::new(dir.path().join("email-groups.json"));
        store.create("team", &[addr("a@x.com")]).await.unwrap();
        let result = store.create("team", &[addr("b@x.com")]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invalid_group_name_rejected() {
        let dir = TempDir::new().unwrap();
        let store = GroupStore::new(dir.path().join("email-groups.json"));
        let result = store.create("bad name!", &[]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_add_member_preserves_order() {
        let dir = TempDir::new().unwrap();
        let store = GroupStore::new(dir.path().join("email-groups.json"));
        store.create("team", &[addr("a@x.com")]).await.unwrap();
        store.add_member("team", &addr("b@x.com")).await.unwrap();
        let members = store.get("team").await.unwrap();
        assert_eq!(members[0].email(), "a@x.com");
        assert_eq!(members[1].email(), "b@x.com");
    }

    #[tokio::test]
    async fn test_add_duplicate_member_rejected() {
        let dir = TempDir::new().unwrap();
        let store = GroupStore::new(dir.path().join("email-groups.json"));
        store.create("team", &[addr("a@x.com")]).await.unwrap();
        let result = store.add_member("team", &addr("A@x.com")).await;
        assert!(matches!(result, Err(GmailError::DuplicateMember { .. })));
    }

    #[tokio::test]
    async fn test_remove_member() {
        let dir = TempDir::new().unwrap();
        let store = GroupStore::new(dir.path().join("email-groups.json"));
        store.create("team", &[addr("a@x.com"), addr("b@x.com")]).await.unwrap();
        store.remove_member("team", &addr("a@x.com")).await.unwrap();
        let members = store.get("team").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].email(), "b@x.com");
    }

    #[tokio::test]
    async fn test_delete_writes_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("email-groups.json");
        let store = GroupStore::new(&path);
        store.create("team", &[addr("a@x.com")]).await.unwrap();
        store.delete("team").await.unwrap();

        assert!(store.get("team").await.is_err());

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
    async fn test_validate_detects_malformed_and_duplicates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("email-groups.json");
        let store = GroupStore::new(&path);
        // Bypass validation in create() by writing raw JSON directly.
        let mut raw = HashMap::new();
        raw.insert(
            "team".to_string(),
            vec!["a@x.com".to_string(), "a@x.com".to_string(), "not-an-address".to_string()],
        );
        store.write_raw(&raw).await.unwrap();

        let reports = store.validate(Some("team")).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].ok());
        assert_eq!(reports[0].malformed_addresses.len(), 1);
        assert_eq!(reports[0].duplicate_addresses.len(), 1);
    }

    #[tokio::test]
    async fn test_expand_resolves_groups_and_literals_with_dedup() {
        let dir = TempDir::new().unwrap();
        let store = GroupStore::new(dir.path().join("email-groups.json"));
        store.create("team", &[addr("a@x.com"), addr("b@x.com")]).await.unwrap();
        store.create("ops", &[addr("c@y.com")]).await.unwrap();

        let expanded = store
            .expand(&["#team".to_string(), "#ops".to_string(), "a@x.com".to_string()])
            .await
            .unwrap();
        let emails: Vec<String> = expanded.iter().map(|a| a.email()).collect();
        assert_eq!(emails, vec!["a@x.com", "b@x.com", "c@y.com"]);
    }

    #[tokio::test]
    async fn test_expand_unknown_group_fails() {
        let dir = TempDir::new().unwrap();
        let store = GroupStore::new(dir.path().join("email-groups.json"));
        let result = store.expand(&["#nonexistent".to_string()]).await;
        assert!(matches!(result, Err(GmailError::UnknownGroup(_))));
    }

    #[tokio::test]
    async fn test_atomic_write_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.json");
        atomic_write(&path, b"{\"hello\":true}").await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "{\"hello\":true}");
    }
}
