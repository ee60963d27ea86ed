//! Environment probe
//!
//! One-time check whether symbolic links can be created next to the build
//! output. Build backends prefer symlinking shared outputs over copying them;
//! when the probe fails they are told to take the copying path instead. The
//! probe never fails its caller.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};
use uuid::Uuid;

/// Returns true when symlinks can be created inside `dir`
pub fn probe_symlinks(dir: &Path) -> bool {
    debug!(dir = %dir.display(), "probe_symlinks: called");
    match try_symlink(dir) {
        Ok(()) => {
            debug!("probe_symlinks: symlinks supported");
            true
        }
        Err(e) => {
            warn!(
                dir = %dir.display(),
                error = %e,
                "Could not create symlinks in the build directory, falling back to copying build outputs (slower)"
            );
            false
        }
    }
}

fn try_symlink(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;

    let id = Uuid::now_v7();
    let target = dir.join(format!(".probe-{}", id));
    let link = dir.join(format!(".probe-{}-link", id));

    fs::write(&target, b"probe")?;
    let linked = symlink(&target, &link);

    let _ = fs::remove_file(&link);
    let _ = fs::remove_file(&target);
    linked
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
