//! Resource staleness checks
//!
//! Compares the on-disk modification times of a deployment's tracked
//! resources against the stored ones and decides what the engine has to do.
//! Accepted timestamps are written back into the [`TrackedApplication`], so
//! a check must never run concurrently for the same application.

use crate::config::FILE_MODIFICATION_RESOLUTION_MS;
use crate::fsutil::{last_modified, now_millis};
use berth_types::{has_archive_extension, TrackedApplication, SENTINEL_MTIME};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Why a deployment has to leave the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndeployCause {
    /// A redeploy resource changed; rediscovery deploys the unit again
    Modified,
    /// A redeploy resource disappeared for good
    Missing,
}

/// Outcome of a staleness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Unchanged,

    /// A reload resource changed; reload once
    Reload,

    /// The archive behind a descriptor changed; swap the expanded content
    /// and keep the descriptor in force
    RedeployInPlace { archive: PathBuf },

    /// Undeploy, then delete `stale` (the resources tracked after `trigger`)
    Undeploy {
        trigger: PathBuf,
        cause: UndeployCause,
        stale: Vec<PathBuf>,
    },
}

/// Staleness checker
#[derive(Debug, Clone)]
pub struct ResourceWatcher {
    auto_deploy: bool,
    recheck_delay: Duration,
}

impl ResourceWatcher {
    pub fn new(auto_deploy: bool, recheck_delay: Duration) -> Self {
        Self {
            auto_deploy,
            recheck_delay,
        }
    }

    /// Check `app` against the file system.
    ///
    /// With `skip_skew` unset and auto-deploy enabled, a modification time
    /// within [`FILE_MODIFICATION_RESOLUTION_MS`] of now is not trusted yet.
    pub fn check(&self, app: &mut TrackedApplication, skip_skew: bool) -> Verdict {
        self.check_at(app, skip_skew, now_millis())
    }

    pub(crate) fn check_at(
        &self,
        app: &mut TrackedApplication,
        skip_skew: bool,
        now: u64,
    ) -> Verdict {
        let settled_before = now.saturating_sub(FILE_MODIFICATION_RESOLUTION_MS);
        let accept = |modified: u64| !self.auto_deploy || modified < settled_before || skip_skew;

        let resources: Vec<(PathBuf, u64)> = app
            .redeploy_resources
            .iter()
            .map(|(path, modified)| (path.to_path_buf(), modified))
            .collect();

        for (index, (resource, stored)) in resources.iter().enumerate() {
            if resource.exists() || *stored == SENTINEL_MTIME {
                let current = last_modified(resource);
                if current == *stored || !accept(current) {
                    continue;
                }

                if resource.is_dir() {
                    app.redeploy_resources.insert(resource.clone(), current);
                } else if app.has_descriptor && is_archive(resource) {
                    info!(
                        app = %app.name(),
                        archive = %resource.display(),
                        "Archive changed under a descriptor, swapping content in place"
                    );
                    app.redeploy_resources.insert(resource.clone(), current);
                    app.touch();
                    return Verdict::RedeployInPlace {
                        archive: resource.clone(),
                    };
                } else {
                    info!(
                        app = %app.name(),
                        resource = %resource.display(),
                        "Redeploy resource changed"
                    );
                    return Verdict::Undeploy {
                        trigger: resource.clone(),
                        cause: UndeployCause::Modified,
                        stale: app.redeploy_resources.paths_after(index),
                    };
                }
            } else {
                // Editors may delete and recreate a file on save
                if !self.recheck_delay.is_zero() {
                    std::thread::sleep(self.recheck_delay);
                }
                if resource.exists() {
                    debug!(resource = %resource.display(), "Resource reappeared");
                    continue;
                }

                info!(
                    app = %app.name(),
                    resource = %resource.display(),
                    "Redeploy resource removed"
                );
                let mut stale = app.redeploy_resources.paths_after(index);
                stale.extend(app.reload_resources.paths());
                return Verdict::Undeploy {
                    trigger: resource.clone(),
                    cause: UndeployCause::Missing,
                    stale,
                };
            }
        }

        let reload_resources: Vec<(PathBuf, u64)> = app
            .reload_resources
            .iter()
            .map(|(path, modified)| (path.to_path_buf(), modified))
            .collect();

        let mut reload = false;
        for (resource, stored) in reload_resources {
            let current = last_modified(&resource);
            if reload || (current != stored && accept(current)) {
                if !reload {
                    info!(
                        app = %app.name(),
                        resource = %resource.display(),
                        "Reload resource changed"
                    );
                    reload = true;
                }
                app.reload_resources.insert(resource, current);
            }
        }
        app.touch();

        if reload {
            Verdict::Reload
        } else {
            Verdict::Unchanged
        }
    }
}

fn is_archive(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(has_archive_extension)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::set_modified_millis;
    use berth_types::UnitIdentity;
    use std::fs;

    const T0: u64 = 1_600_000_000_000;
    const NOW: u64 = T0 + 60_000;

    fn watcher() -> ResourceWatcher {
        ResourceWatcher::new(true, Duration::ZERO)
    }

    fn file(dir: &Path, name: &str, modified: u64) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, name).unwrap();
        set_modified_millis(&path, modified).unwrap();
        path
    }

    fn tracked(has_descriptor: bool) -> TrackedApplication {
        TrackedApplication::new(UnitIdentity::from_file_name("shop.war", true), has_descriptor)
    }

    #[test]
    fn test_unchanged_when_nothing_moves() {
        let dir = tempfile::tempdir().unwrap();
        let war = file(dir.path(), "shop.war", T0);
        let mut app = tracked(false);
        app.redeploy_resources.insert(war, T0);
        app.redeploy_resources.insert(dir.path().join("shop.toml"), SENTINEL_MTIME);

        assert_eq!(watcher().check_at(&mut app, false, NOW), Verdict::Unchanged);
        assert_eq!(watcher().check_at(&mut app, true, NOW), Verdict::Unchanged);
    }

    #[test]
    fn test_modified_archive_undeploys() {
        let dir = tempfile::tempdir().unwrap();
        let war = file(dir.path(), "shop.war", T0 + 5_000);
        let expanded = dir.path().join("shop");
        let mut app = tracked(false);
        app.redeploy_resources.insert(war.clone(), T0);
        app.redeploy_resources.insert(expanded.clone(), SENTINEL_MTIME);

        match watcher().check_at(&mut app, false, NOW) {
            Verdict::Undeploy {
                trigger,
                cause,
                stale,
            } => {
                assert_eq!(trigger, war);
                assert_eq!(cause, UndeployCause::Modified);
                assert_eq!(stale, vec![expanded]);
            }
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[test]
    fn test_resource_recreated_during_recheck_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let war = file(dir.path(), "shop.war", T0);
        let mut app = tracked(false);
        app.redeploy_resources.insert(war.clone(), T0);
        fs::remove_file(&war).unwrap();

        let recreate = {
            let war = war.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                fs::write(&war, b"shop.war").unwrap();
                set_modified_millis(&war, T0).unwrap();
            })
        };

        let watcher = ResourceWatcher::new(true, Duration::from_millis(500));
        assert_eq!(watcher.check_at(&mut app, false, NOW), Verdict::Unchanged);
        recreate.join().unwrap();
        assert_eq!(app.redeploy_resources.get(&war), Some(T0));
    }

    #[test]
    fn test_skew_window_defers_change() {
        let dir = tempfile::tempdir().unwrap();
        let war = file(dir.path(), "shop.war", NOW - 200);
        let mut app = tracked(false);
        app.redeploy_resources.insert(war, T0);

        assert_eq!(watcher().check_at(&mut app, false, NOW), Verdict::Unchanged);
        assert!(matches!(
            watcher().check_at(&mut app, true, NOW),
            Verdict::Undeploy { .. }
        ));
    }

    #[test]
    fn test_skew_window_ignored_without_auto_deploy() {
        let dir = tempfile::tempdir().unwrap();
        let war = file(dir.path(), "shop.war", NOW - 200);
        let mut app = tracked(false);
        app.redeploy_resources.insert(war, T0);

        let watcher = ResourceWatcher::new(false, Duration::ZERO);
        assert!(matches!(
            watcher.check_at(&mut app, false, NOW),
            Verdict::Undeploy { .. }
        ));
    }

    #[test]
    fn test_changed_directory_only_refreshes() {
        let dir = tempfile::tempdir().unwrap();
        let expanded = dir.path().join("shop");
        fs::create_dir(&expanded).unwrap();
        let mut app = tracked(false);
        app.redeploy_resources.insert(expanded.clone(), 1);

        assert_eq!(watcher().check_at(&mut app, true, NOW), Verdict::Unchanged);
        assert_eq!(
            app.redeploy_resources.get(&expanded),
            Some(last_modified(&expanded))
        );
    }

    #[test]
    fn test_archive_under_descriptor_swaps_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let war = file(dir.path(), "shop.war", T0 + 5_000);
        let mut app = tracked(true);
        app.redeploy_resources.insert(war.clone(), T0);

        assert_eq!(
            watcher().check_at(&mut app, false, NOW),
            Verdict::RedeployInPlace {
                archive: war.clone()
            }
        );
        assert_eq!(app.redeploy_resources.get(&war), Some(T0 + 5_000));
    }

    #[test]
    fn test_sentinel_appearance_undeploys() {
        let dir = tempfile::tempdir().unwrap();
        let war = file(dir.path(), "shop.war", T0);
        let mut app = tracked(false);
        app.redeploy_resources.insert(war, T0);
        app.redeploy_resources.insert(dir.path().join("shop.toml"), SENTINEL_MTIME);

        let descriptor = file(dir.path(), "shop.toml", T0 + 1_000);
        match watcher().check_at(&mut app, false, NOW) {
            Verdict::Undeploy { trigger, stale, .. } => {
                assert_eq!(trigger, descriptor);
                assert!(stale.is_empty());
            }
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[test]
    fn test_missing_resource_removes_reload_resources_too() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = tracked(false);
        app.redeploy_resources.insert(dir.path().join("shop.war"), T0);
        app.redeploy_resources.insert(dir.path().join("shop"), T0);
        app.reload_resources
            .insert(dir.path().join("shop/WEB-INF/web.xml"), SENTINEL_MTIME);

        match watcher().check_at(&mut app, false, NOW) {
            Verdict::Undeploy { cause, stale, .. } => {
                assert_eq!(cause, UndeployCause::Missing);
                assert_eq!(
                    stale,
                    vec![
                        dir.path().join("shop"),
                        dir.path().join("shop/WEB-INF/web.xml")
                    ]
                );
            }
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[test]
    fn test_reloads_are_batched() {
        let dir = tempfile::tempdir().unwrap();
        let war = file(dir.path(), "shop.war", T0);
        let first = file(dir.path(), "a.conf", T0 + 2_000);
        let second = file(dir.path(), "b.conf", T0 + 3_000);
        let mut app = tracked(false);
        app.redeploy_resources.insert(war, T0);
        app.reload_resources.insert(first.clone(), T0);
        app.reload_resources.insert(second.clone(), T0);

        assert_eq!(watcher().check_at(&mut app, false, NOW), Verdict::Reload);
        assert_eq!(app.reload_resources.get(&first), Some(T0 + 2_000));
        assert_eq!(app.reload_resources.get(&second), Some(T0 + 3_000));
        assert_eq!(watcher().check_at(&mut app, false, NOW), Verdict::Unchanged);
    }
}
