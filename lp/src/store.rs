//! JSON files holding the account and identity lists
//!
//! A missing file reads as an empty list. Writes go through a sibling temp
//! file and a rename.

use std::fs;
use std::path::Path;

use eyre::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::domain::{Account, IdentityRecord};

fn load_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        debug!(path = %path.display(), "load_list: no file, empty list");
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content).context(format!("Failed to parse {}", path.display()))
}

fn save_list<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).context(format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(items).context("Failed to serialize list")?;
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    fs::write(&tmp, json).context(format!("Failed to write {}", path.display()))?;
    fs::rename(&tmp, path).context(format!("Failed to replace {}", path.display()))?;
    Ok(())
}

pub fn load_accounts(path: &Path) -> Result<Vec<Account>> {
    let accounts: Vec<Account> = load_list(path)?;
    info!(path = %path.display(), count = accounts.len(), "Loaded accounts");
    Ok(accounts)
}

pub fn save_accounts(path: &Path, accounts: &[Account]) -> Result<()> {
    debug!(path = %path.display(), count = accounts.len(), "save_accounts: called");
    save_list(path, accounts)
}

pub fn load_identities(path: &Path) -> Result<Vec<IdentityRecord>> {
    let records: Vec<IdentityRecord> = load_list(path)?;
    info!(path = %path.display(), count = records.len(), "Loaded identities");
    Ok(records)
}

pub fn save_identities(path: &Path, records: &[IdentityRecord]) -> Result<()> {
    debug!(path = %path.display(), count = records.len(), "save_identities: called");
    save_list(path, records)
}

/// Add a record for every connection not already listed; returns how many were added
pub fn merge_connections(records: &mut Vec<IdentityRecord>, connections: &[String]) -> usize {
    let before = records.len();
    for connection in connections {
        if records.iter().any(|r| &r.connection == connection || &r.id == connection) {
            continue;
        }
        records.push(IdentityRecord {
            id: connection.clone(),
            connection: connection.clone(),
            ..Default::default()
        });
    }
    records.len() - before
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let temp = tempdir().unwrap();
        assert!(load_accounts(&temp.path().join("nope.json")).unwrap().is_empty());
        assert!(load_identities(&temp.path().join("nope.json")).unwrap().is_empty());
    }

    #[test]
    fn test_accounts_persist() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("data").join("accounts.json");
        let mut alice = Account::new("alice").with_identities(["vpn-de"]);
        alice.logins = 3;
        save_accounts(&path, &[alice.clone(), Account::new("bob")]).unwrap();

        let loaded = load_accounts(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], alice);
        assert!(loaded[1].identities.is_empty());
    }

    #[test]
    fn test_minimal_account_json() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("accounts.json");
        fs::write(&path, r#"[{"name": "carol"}]"#).unwrap();

        let loaded = load_accounts(&path).unwrap();
        assert_eq!(loaded[0].name, "carol");
        assert!(!loaded[0].done);
        assert_eq!(loaded[0].attempts, 0);
    }

    #[test]
    fn test_corrupt_file_errors() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("identities.json");
        fs::write(&path, "{not json").unwrap();
        assert!(load_identities(&path).is_err());
    }

    #[test]
    fn test_merge_connections_skips_known() {
        let mut records = vec![IdentityRecord {
            id: "de".to_string(),
            connection: "VPN DE".to_string(),
            ..Default::default()
        }];
        let added = merge_connections(&mut records, &["VPN DE".to_string(), "VPN NL".to_string()]);
        assert_eq!(added, 1);
        assert_eq!(records[1].id, "VPN NL");

        let temp = tempdir().unwrap();
        let path = temp.path().join("identities.json");
        save_identities(&path, &records).unwrap();
        assert_eq!(load_identities(&path).unwrap(), records);
    }
}
