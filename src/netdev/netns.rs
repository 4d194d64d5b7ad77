//! Pinned-thread network namespace switching.
//!
//! A namespace switch is thread-local kernel state: `setns(2)` rebinds the
//! calling OS thread, and nothing else that runs on that thread afterwards
//! is safe unless it expects the new namespace. Every namespaced operation
//! therefore runs on its own short-lived, dedicated thread: switch in,
//! operate, switch back, exit. The thread is never returned to any pool, so
//! even a failed switch-back cannot leak a foreign namespace into unrelated
//! work.

use std::fs::File;
use std::path::Path;
use std::thread;

use nix::sched::{setns, CloneFlags};
use tracing::warn;

use crate::constants::SELF_NETNS_PATH;
use crate::error::{Error, Result};

/// Runs `f` on a dedicated thread inside the network namespace at `path`.
///
/// The closure receives the file descriptor of the root namespace the
/// calling thread was in, for operations that need to reference it from
/// inside the target namespace (moving a device back out).
///
/// Must be called from a thread currently in the root network namespace;
/// the mover and the production [`LinkOps`](crate::netdev::LinkOps)
/// implementation uphold this by construction.
pub fn with_netns<T, F>(path: &Path, f: F) -> Result<T>
where
    T: Send,
    F: FnOnce(&File) -> Result<T> + Send,
{
    let target = File::open(path).map_err(|e| Error::NamespaceSwitchFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    thread::scope(|scope| {
        let handle = scope.spawn(move || -> Result<T> {
            let root_ns = File::open(SELF_NETNS_PATH).map_err(|e| Error::NamespaceSwitchFailed {
                path: SELF_NETNS_PATH.into(),
                reason: format!("failed to open root namespace: {e}"),
            })?;

            setns(&target, CloneFlags::CLONE_NEWNET).map_err(|e| {
                Error::NamespaceSwitchFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            })?;

            let out = f(&root_ns);

            // The thread exits right after, so a failed switch-back cannot
            // pollute other work; still worth a loud log.
            if let Err(e) = setns(&root_ns, CloneFlags::CLONE_NEWNET) {
                warn!(namespace = %path.display(), error = %e, "Failed to switch back out of namespace");
            }

            out
        });

        handle
            .join()
            .map_err(|_| Error::Internal("namespace worker thread panicked".to_string()))?
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_namespace_path_is_switch_failure() {
        let err = with_netns(Path::new("/proc/self/ns/does-not-exist"), |_| Ok(()))
            .expect_err("open must fail");
        assert!(matches!(err, Error::NamespaceSwitchFailed { .. }));
    }
}
