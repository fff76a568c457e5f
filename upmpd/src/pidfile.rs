//! Single-instance guard (spec.md §7 *fatal*: "pidfile held by another live
//! pid"). Mirrors the original `Pidfile` helper: open-or-create the file,
//! refuse to start if the pid it names is still alive, otherwise take it
//! over and write our own pid.

use std::fs;
use std::path::PathBuf;

#[cfg(unix)]
fn pid_is_alive(pid: i32) -> bool {
    // kill(pid, 0) with no signal sent just probes for existence/permission;
    // EPERM (process exists, owned by someone else) also counts as alive.
    unsafe { libc::kill(pid, 0) == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM) }
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: i32) -> bool {
    false
}

pub struct Pidfile {
    path: PathBuf,
}

impl Pidfile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Pidfile { path: path.into() }
    }

    /// Returns `Ok(())` if the pidfile was free (absent, unparseable, or
    /// naming a dead pid) and has now been written with our pid; `Err`
    /// with the live pid if another instance holds it.
    pub fn acquire(&self) -> Result<(), String> {
        if let Ok(existing) = fs::read_to_string(&self.path) {
            if let Ok(pid) = existing.trim().parse::<i32>() {
                if pid != std::process::id() as i32 && pid_is_alive(pid) {
                    return Err(format!("pidfile {} names live pid {pid}", self.path.display()));
                }
            }
        }
        self.write_pid()
    }

    pub fn write_pid(&self) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        fs::write(&self.path, format!("{}\n", std::process::id())).map_err(|e| format!("cannot write {}: {e}", self.path.display()))
    }

    pub fn release(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = Pidfile::new(dir.path().join("upmpd.pid"));
        assert!(pidfile.acquire().is_ok());
        let written = fs::read_to_string(dir.path().join("upmpd.pid")).unwrap();
        assert_eq!(written.trim(), std::process::id().to_string());
    }

    #[test]
    fn acquire_takes_over_a_stale_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upmpd.pid");
        // A pid this high is exceedingly unlikely to be a live process.
        fs::write(&path, "999999999\n").unwrap();
        let pidfile = Pidfile::new(&path);
        assert!(pidfile.acquire().is_ok());
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), std::process::id().to_string());
    }

    #[test]
    fn release_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = Pidfile::new(dir.path().join("upmpd.pid"));
        pidfile.acquire().unwrap();
        pidfile.release();
        assert!(!dir.path().join("upmpd.pid").exists());
    }
}
