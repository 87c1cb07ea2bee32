use crate::error::LaunchError;
use dirs::home_dir;
use log::{debug, trace};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

pub const PROXY_BINARY: &str = "websocat";
const SYSTEM_INSTALL_DIRS: [&str; 2] = ["/usr/local/bin", "/usr/bin"];
const USER_INSTALL_DIRS: [&str; 2] = [".local/bin", "bin"];

#[derive(Debug, Clone)]
pub struct SearchEnv {
    pub search_path: Option<OsString>,
    pub cwd: PathBuf,
    pub home: Option<PathBuf>,
    pub system_dirs: Vec<PathBuf>,
    pub windows: bool,
}

impl SearchEnv {
    pub fn current() -> Self {
        Self {
            search_path: env::var_os("PATH"),
            cwd: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            home: home_dir(),
            system_dirs: SYSTEM_INSTALL_DIRS.iter().map(PathBuf::from).collect(),
            windows: cfg!(windows),
        }
    }

    pub fn binary_name(&self) -> String {
        if self.windows {
            format!("{PROXY_BINARY}.exe")
        } else {
            PROXY_BINARY.to_string()
        }
    }

    pub fn candidate_paths(&self) -> Vec<PathBuf> {
        let name = self.binary_name();
        let mut candidates: Vec<PathBuf> =
            self.system_dirs.iter().map(|dir| dir.join(&name)).collect();
        if let Some(home) = &self.home {
            candidates.extend(USER_INSTALL_DIRS.iter().map(|dir| home.join(dir).join(&name)));
        }
        candidates
    }
}

pub fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

pub fn locate(search: &SearchEnv) -> Result<PathBuf, LaunchError> {
    let name = search.binary_name();
    match which::which_in(&name, search.search_path.as_ref(), &search.cwd) {
        Ok(path) => {
            debug!("found {name} on the search path at {}", path.display());
            return Ok(path);
        }
        Err(err) => trace!("{name} not on the search path: {err}"),
    }

    let candidates = search.candidate_paths();
    for candidate in &candidates {
        if is_executable(candidate) {
            debug!("found {name} at {}", candidate.display());
            return Ok(candidate.clone());
        }
        trace!("no executable at {}", candidate.display());
    }

    let searched: Vec<String> = candidates
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    Err(LaunchError::NotFound(format!(
        "{name} is not on PATH or in any of: {}",
        searched.join(", ")
    )))
}

pub fn locate_explicit(path: &Path) -> Result<PathBuf, LaunchError> {
    if is_executable(path) {
        return Ok(path.to_path_buf());
    }
    Err(LaunchError::NotFound(format!(
        "configured proxy binary {} is not an executable file",
        path.display()
    )))
}
