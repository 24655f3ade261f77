//! Read-only cache of registered users.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::feed::{Snapshot, TaskStoreAdapter};
use crate::model::User;

#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: BTreeMap<String, User>,
}

impl UserDirectory {
    pub fn from_users(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|user| (user.uid.clone(), user))
                .collect(),
        }
    }

    /// Load the current user list.
    pub fn load(adapter: &TaskStoreAdapter) -> Result<Self> {
        Ok(Self::from_users(adapter.fetch_users()?.items))
    }

    /// Replace the cache with a newer snapshot.
    pub fn apply(&mut self, snapshot: &Snapshot<User>) {
        *self = Self::from_users(snapshot.items.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn get(&self, uid: &str) -> Option<&User> {
        self.users.get(uid)
    }

    pub fn find_by_email(&self, email: &str) -> Option<&User> {
        let email = email.trim();
        self.users
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
    }

    /// Look a user up by uid or email.
    pub fn resolve(&self, key: &str) -> Result<&User> {
        let key = key.trim();
        self.get(key)
            .or_else(|| self.find_by_email(key))
            .ok_or_else(|| Error::UserNotFound(key.to_string()))
    }

    /// Display label for a uid, or the uid itself when unknown.
    pub fn label_for<'a>(&'a self, uid: &'a str) -> &'a str {
        self.get(uid).map(User::label).unwrap_or(uid)
    }

    /// Case-insensitive match on display name, email, role or uid, ordered by
    /// label. An empty query returns everyone.
    pub fn search(&self, query: &str) -> Vec<&User> {
        let needle = query.trim().to_lowercase();
        let mut matches: Vec<&User> = self
            .users
            .values()
            .filter(|user| {
                needle.is_empty()
                    || user.display_name.to_lowercase().contains(&needle)
                    || user.email.to_lowercase().contains(&needle)
                    || user.role.as_str().contains(&needle)
                    || user.uid.to_lowercase().contains(&needle)
            })
            .collect();
        matches.sort_by(|a, b| {
            a.label()
                .to_lowercase()
                .cmp(&b.label().to_lowercase())
                .then_with(|| a.uid.cmp(&b.uid))
        });
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    fn user(uid: &str, name: &str, email: &str, role: Role) -> User {
        User {
            uid: uid.to_string(),
            email: email.to_string(),
            display_name: name.to_string(),
            role,
            created_at: None,
        }
    }

    fn directory() -> UserDirectory {
        UserDirectory::from_users(vec![
            user("u1", "Grace", "grace@example.com", Role::Admin),
            user("u2", "ada", "ada@example.com", Role::User),
            user("u3", "", "nameless@example.com", Role::User),
        ])
    }

    #[test]
    fn resolve_by_uid_or_email() {
        let dir = directory();
        assert_eq!(dir.resolve("u2").unwrap().display_name, "ada");
        assert_eq!(dir.resolve("GRACE@example.com").unwrap().uid, "u1");
        assert!(matches!(dir.resolve("nobody"), Err(Error::UserNotFound(_))));
    }

    #[test]
    fn search_filters_and_orders_by_label() {
        let dir = directory();
        let all: Vec<&str> = dir.search("").iter().map(|u| u.uid.as_str()).collect();
        assert_eq!(all, vec!["u2", "u1", "u3"]);

        let admins: Vec<&str> = dir.search("admin").iter().map(|u| u.uid.as_str()).collect();
        assert_eq!(admins, vec!["u1"]);
    }

    #[test]
    fn label_falls_back() {
        let dir = directory();
        assert_eq!(dir.label_for("u3"), "nameless@example.com");
        assert_eq!(dir.label_for("ghost"), "ghost");
    }
}
