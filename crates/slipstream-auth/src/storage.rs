//! Accounts-file I/O.
//!
//! Reads and writes the enrollment CLI's `accounts.json` with restrictive
//! permissions (0o600). The proxy only mutates `lastUsed`, rate-limit
//! display flags, and invalidation markers; everything else round-trips
//! verbatim.

use std::path::{Path, PathBuf};

use crate::types::AccountsFile;

/// Default accounts file name under the data directory.
const ACCOUNTS_FILE_NAME: &str = "accounts.json";

/// Accounts file path under the given data directory.
#[must_use]
pub fn accounts_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(ACCOUNTS_FILE_NAME)
}

/// Load the accounts file.
///
/// Returns `None` when the file is missing or unparseable; a missing file
/// at startup is not fatal (requests fail with `NoAccounts` until accounts
/// are added).
#[must_use]
pub fn load_accounts(path: &Path) -> Option<AccountsFile> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("failed to read accounts file: {e}");
            return None;
        }
    };

    match serde_json::from_str::<AccountsFile>(&data) {
        Ok(file) => Some(file),
        Err(e) => {
            tracing::warn!("failed to parse accounts file: {e}");
            None
        }
    }
}

/// Persist the accounts file, creating parent directories as needed.
pub fn save_accounts(path: &Path, file: &AccountsFile) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(file)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, &json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        let _ = std::fs::set_permissions(path, perms);
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StoredAccount;

    fn sample_file() -> AccountsFile {
        AccountsFile {
            accounts: vec![StoredAccount {
                email: "a@x.com".into(),
                refresh_token: "1//rt".into(),
                project_id: Some("proj-1".into()),
                added_at: 1_700_000_000_000,
                last_used: None,
                is_rate_limited: None,
                rate_limit_reset_time: None,
                invalid: None,
                invalid_reason: None,
            }],
            settings: crate::types::Settings::new(),
            active_index: 0,
        }
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = accounts_file_path(dir.path());
        save_accounts(&path, &sample_file()).unwrap();

        let loaded = load_accounts(&path).unwrap();
        assert_eq!(loaded.accounts.len(), 1);
        assert_eq!(loaded.accounts[0].email, "a@x.com");
        assert_eq!(loaded.accounts[0].project_id.as_deref(), Some("proj-1"));
    }

    #[test]
    fn missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_accounts(&accounts_file_path(dir.path())).is_none());
    }

    #[test]
    fn invalid_json_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = accounts_file_path(dir.path());
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_accounts(&path).is_none());
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("accounts.json");
        save_accounts(&path, &sample_file()).unwrap();
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn file_permissions_are_restrictive() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = accounts_file_path(dir.path());
        save_accounts(&path, &sample_file()).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
