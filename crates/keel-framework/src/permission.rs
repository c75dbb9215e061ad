//! User permission levels and the check commands run before their handler.
//!
//! Permission lookups go through the work queue like any other side effect,
//! so a [`PermissionStore`] never sees two lookups at once.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use keel_core::{Policy, Promise, Rejection, WorkQueue};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// How much a user may do, from least to most privileged.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Updates from the user are ignored without a reply.
    Ignored,
    /// The user is told they lack permission.
    Banned,
    /// Default level.
    #[default]
    User,
    /// Trusted user.
    User2,
    /// Bot administrator.
    Admin,
    /// Bot owner.
    Root,
}

impl Permission {
    /// Numeric level as stored by the bot's database.
    pub fn level(self) -> i32 {
        match self {
            Self::Ignored => -2,
            Self::Banned => -1,
            Self::User => 0,
            Self::User2 => 1,
            Self::Admin => 255,
            Self::Root => 256,
        }
    }

    /// Parses a numeric level.
    pub fn from_level(level: i32) -> Option<Self> {
        Some(match level {
            -2 => Self::Ignored,
            -1 => Self::Banned,
            0 => Self::User,
            1 => Self::User2,
            255 => Self::Admin,
            256 => Self::Root,
            _ => return None,
        })
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ignored => "ignored",
            Self::Banned => "banned",
            Self::User => "user",
            Self::User2 => "user_2",
            Self::Admin => "admin",
            Self::Root => "root",
        };
        f.write_str(name)
    }
}

/// Source of user permission levels.
///
/// Lookups run on the dispatch loop thread.
pub trait PermissionStore: Send + Sync {
    /// The permission level of `user`.
    fn permission(&self, user: i64) -> Result<Permission, Rejection>;
}

/// A [`PermissionStore`] backed by a map, with a fallback level.
#[derive(Debug, Default)]
pub struct MemoryPermissions {
    levels: RwLock<HashMap<i64, Permission>>,
    fallback: Permission,
}

impl MemoryPermissions {
    /// Creates a store where unknown users get `fallback`.
    pub fn new(fallback: Permission) -> Self {
        Self {
            levels: RwLock::new(HashMap::new()),
            fallback,
        }
    }

    /// Sets the level of `user`.
    pub fn set(&self, user: i64, permission: Permission) {
        self.levels.write().insert(user, permission);
    }

    /// Sets the level of `user` (builder pattern).
    pub fn with(self, user: i64, permission: Permission) -> Self {
        self.set(user, permission);
        self
    }
}

impl PermissionStore for MemoryPermissions {
    fn permission(&self, user: i64) -> Result<Permission, Rejection> {
        Ok(self
            .levels
            .read()
            .get(&user)
            .copied()
            .unwrap_or(self.fallback))
    }
}

/// Result of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the command may run.
    pub allowed: bool,
    /// Whether the user should be told they were denied.
    pub reply: bool,
}

impl Verdict {
    const ALLOW: Self = Self {
        allowed: true,
        reply: false,
    };

    fn deny(reply: bool) -> Self {
        Self {
            allowed: false,
            reply,
        }
    }
}

/// Checks that `user` holds at least `required`.
///
/// No requirement always allows. Without a store, or for an anonymous sender,
/// the user counts as [`Permission::User`]. Otherwise the level is looked up
/// through `queue` and the calling thread waits for it, up to `timeout`. A
/// failed lookup denies. Denied users above [`Permission::Ignored`] get told.
pub fn check_permission(
    queue: &WorkQueue,
    store: Option<&Arc<dyn PermissionStore>>,
    user: Option<i64>,
    required: Option<Permission>,
    timeout: Option<Duration>,
) -> Verdict {
    let Some(required) = required else {
        return Verdict::ALLOW;
    };
    let (Some(store), Some(user)) = (store, user) else {
        return judge(Permission::default(), required);
    };

    let store = Arc::clone(store);
    let lookup = Promise::with_timeout(Policy::Manual, timeout, move |settle| {
        Ok(settle.complete(store.permission(user))?)
    });
    if let Err(e) = queue.enqueue(&lookup) {
        warn!(user, error = %e, "Permission lookup not queued");
        return Verdict::deny(false);
    }
    if !lookup.wait() {
        error!(user, "Permission lookup timed out");
        return Verdict::deny(true);
    }

    match lookup.result() {
        Some(Ok(level)) => {
            debug!(user, %level, %required, "Permission lookup");
            judge(level, required)
        }
        Some(Err(e)) => {
            error!(user, error = %e, "Permission lookup failed");
            Verdict::deny(true)
        }
        None => Verdict::deny(true),
    }
}

fn judge(level: Permission, required: Permission) -> Verdict {
    if level >= required {
        Verdict::ALLOW
    } else {
        Verdict::deny(level > Permission::Ignored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::Dispatcher;
    use std::thread;

    struct BrokenStore;

    impl PermissionStore for BrokenStore {
        fn permission(&self, _user: i64) -> Result<Permission, Rejection> {
            Err(Rejection::msg("database is locked"))
        }
    }

    fn with_loop<R>(f: impl FnOnce(&WorkQueue) -> R) -> R {
        let dispatcher = Arc::new(Dispatcher::new());
        let driver = {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.run())
        };
        let result = f(&dispatcher.queue());
        dispatcher.stop();
        driver.join().unwrap();
        result
    }

    #[test]
    fn test_levels_are_ordered() {
        let all = [
            Permission::Ignored,
            Permission::Banned,
            Permission::User,
            Permission::User2,
            Permission::Admin,
            Permission::Root,
        ];
        assert!(all.windows(2).all(|w| w[0] < w[1]));
        assert!(all.windows(2).all(|w| w[0].level() < w[1].level()));
        for p in all {
            assert_eq!(Permission::from_level(p.level()), Some(p));
        }
        assert_eq!(Permission::from_level(7), None);
    }

    #[test]
    fn test_check_permission() {
        let store: Arc<dyn PermissionStore> = Arc::new(
            MemoryPermissions::new(Permission::User)
                .with(1, Permission::Admin)
                .with(2, Permission::Banned)
                .with(3, Permission::Ignored),
        );

        let verdicts = with_loop(|queue| {
            let check = |user, required| {
                check_permission(queue, Some(&store), Some(user), required, None)
            };
            [
                check(1, Some(Permission::Admin)),
                check(4, Some(Permission::Admin)),
                check(2, Some(Permission::User)),
                check(3, Some(Permission::User)),
                check(3, None),
                check(4, Some(Permission::User)),
            ]
        });

        let allow = Verdict::ALLOW;
        assert_eq!(
            verdicts,
            [
                allow,
                Verdict::deny(true),
                Verdict::deny(true),
                Verdict::deny(false),
                allow,
                allow,
            ]
        );
    }

    #[test]
    fn test_check_permission_without_store() {
        let queue = Dispatcher::new().queue();
        assert!(check_permission(&queue, None, Some(1), Some(Permission::User), None).allowed);
        assert_eq!(
            check_permission(&queue, None, Some(1), Some(Permission::Admin), None),
            Verdict::deny(true)
        );
    }

    #[test]
    fn test_store_failure_denies() {
        let store: Arc<dyn PermissionStore> = Arc::new(BrokenStore);
        let verdict = with_loop(|queue| {
            check_permission(queue, Some(&store), Some(1), Some(Permission::User), None)
        });
        assert_eq!(verdict, Verdict::deny(true));
    }

    #[test]
    fn test_lookup_timeout_denies() {
        let dispatcher = Dispatcher::new();
        let store: Arc<dyn PermissionStore> = Arc::new(MemoryPermissions::default());
        let verdict = check_permission(
            &dispatcher.queue(),
            Some(&store),
            Some(1),
            Some(Permission::User),
            Some(Duration::from_millis(10)),
        );
        assert_eq!(verdict, Verdict::deny(true));
        assert_eq!(dispatcher.stats().pending, 1);
    }
}
