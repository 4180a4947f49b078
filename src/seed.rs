//! Household provisioning from a TOML seed file.
//!
//! ```toml
//! [[users]]
//! username = "Max"
//! email = "max@example.org"
//! role = "child"
//!
//! [[chores]]
//! name = "walk dog morning"
//! points = 5
//! default_owner = "Max"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ChoreError, Result};
use crate::ledger::{LedgerStore, NewChore, NewUser, Role};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub users: Vec<SeedUser>,
    pub chores: Vec<SeedChore>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedUser {
    pub username: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub credential_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedChore {
    pub name: String,
    pub points: i64,
    /// Username of the default owner.
    #[serde(default)]
    pub default_owner: Option<String>,
}

/// What [`apply_seed`] inserted and what it left alone.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub users_created: usize,
    pub users_skipped: usize,
    pub chores_created: usize,
    pub chores_skipped: usize,
}

impl SeedFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ChoreError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ChoreError::Config(format!("invalid seed file: {e}")))
    }
}

/// Insert every user and chore that does not exist yet. Existing rows, matched
/// by username or chore name, are skipped rather than updated.
pub fn apply_seed(store: &LedgerStore, seed: &SeedFile) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    for user in &seed.users {
        if store.user_by_username(&user.username)?.is_some() {
            warn!(username = %user.username, "user already exists, skipping");
            report.users_skipped += 1;
            continue;
        }
        store.create_user(&NewUser {
            username: user.username.clone(),
            credential_hash: user.credential_hash.clone(),
            email: user.email.clone(),
            role: user.role,
        })?;
        report.users_created += 1;
    }

    for chore in &seed.chores {
        if store.chore_by_name(&chore.name)?.is_some() {
            warn!(chore = %chore.name, "chore already exists, skipping");
            report.chores_skipped += 1;
            continue;
        }
        let default_user_id = match &chore.default_owner {
            Some(username) => Some(
                store
                    .user_by_username(username)?
                    .ok_or_else(|| {
                        ChoreError::NotFound(format!(
                            "default owner '{username}' of chore '{}'",
                            chore.name
                        ))
                    })?
                    .id,
            ),
            None => None,
        };
        store.create_chore(&NewChore {
            name: chore.name.clone(),
            points: chore.points,
            default_user_id,
        })?;
        report.chores_created += 1;
    }

    info!(?report, "seed applied");
    Ok(report)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    const HOUSEHOLD: &str = r#"
        [[users]]
        username = "WitweBolte"
        email = "bolte@example.org"
        role = "parent"

        [[users]]
        username = "Max"
        email = "max@example.org"
        role = "child"

        [[users]]
        username = "Moritz"
        email = "moritz@example.org"
        role = "child"

        [[chores]]
        name = "walk dog morning"
        points = 5
        default_owner = "Max"

        [[chores]]
        name = "walk dog evening"
        points = 5
        default_owner = "Moritz"

        [[chores]]
        name = "Cat litter cleanup"
        points = 1
    "#;

    #[test]
    fn seeds_household() {
        let store = LedgerStore::open_in_memory().unwrap();
        let seed = SeedFile::from_toml_str(HOUSEHOLD).unwrap();
        let report = apply_seed(&store, &seed).unwrap();
        assert_eq!(report.users_created, 3);
        assert_eq!(report.chores_created, 3);

        let max = store.user_by_username("Max").unwrap().unwrap();
        let walk = store.chore_by_name("walk dog morning").unwrap().unwrap();
        assert_eq!(walk.default_user_id, Some(max.id));
        let litter = store.chore_by_name("Cat litter cleanup").unwrap().unwrap();
        assert_eq!(litter.default_user_id, None);
    }

    #[test]
    fn reapplying_skips_existing_rows() {
        let store = LedgerStore::open_in_memory().unwrap();
        let seed = SeedFile::from_toml_str(HOUSEHOLD).unwrap();
        apply_seed(&store, &seed).unwrap();
        let again = apply_seed(&store, &seed).unwrap();
        assert_eq!(
            again,
            SeedReport {
                users_created: 0,
                users_skipped: 3,
                chores_created: 0,
                chores_skipped: 3,
            }
        );
        assert_eq!(store.users().unwrap().len(), 3);
    }

    #[test]
    fn unknown_owner_is_not_found() {
        let store = LedgerStore::open_in_memory().unwrap();
        let seed = SeedFile::from_toml_str(
            r#"
            [[chores]]
            name = "Dishes"
            points = 5
            default_owner = "Alice"
            "#,
        )
        .unwrap();
        assert!(matches!(
            apply_seed(&store, &seed),
            Err(ChoreError::NotFound(_))
        ));
    }

    #[test]
    fn bad_role_is_config_error() {
        let err = SeedFile::from_toml_str(
            r#"
            [[users]]
            username = "x"
            email = "x@example.org"
            role = "grandparent"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ChoreError::Config(_)));
    }
}
