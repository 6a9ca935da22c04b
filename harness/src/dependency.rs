//! Resolution of the auxiliary executables a test item declares.

use model::TestItem;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct DependencyChecker {
    /// Overrides `PATH` when set.
    search_path: Option<OsString>,
    #[cfg(test)]
    panic_with: Option<String>,
}

impl DependencyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    /// Make every lookup panic with `message`.
    #[cfg(test)]
    pub(crate) fn panicking(mut self, message: impl Into<String>) -> Self {
        self.panic_with = Some(message.into());
        self
    }

    /// True when every dependency resolves. Stops at the first miss.
    pub async fn check(&self, item: &TestItem) -> bool {
        if item.dependencies.is_empty() {
            return true;
        }
        self.first_missing(item).await.is_none()
    }

    /// The first dependency that does not resolve, if any.
    pub async fn first_missing(&self, item: &TestItem) -> Option<String> {
        #[cfg(test)]
        {
            if let Some(message) = &self.panic_with {
                panic!("{}", message);
            }
        }
        for dependency in &item.dependencies {
            if !self.command_exists(dependency).await {
                debug!("Dependency {} of {} not found", dependency, item.id);
                return Some(dependency.clone());
            }
        }
        None
    }

    pub async fn command_exists(&self, name: &str) -> bool {
        let name = name.to_string();
        let search_path = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"));

        // Filesystem probing can block on slow mounts; keep it off the runtime.
        tokio::task::spawn_blocking(move || resolve(&name, search_path.as_deref()).is_some())
            .await
            .unwrap_or(false)
    }
}

/// Locate `name` the way `which`/`where` would.
pub fn resolve(name: &str, search_path: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
        let candidate = PathBuf::from(name);
        return is_executable(&candidate).then_some(candidate);
    }

    let search_path = search_path?;
    std::env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .flat_map(|dir| candidates(&dir, name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(not(windows))]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(name)]
}

#[cfg(windows)]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    let mut out = vec![dir.join(name)];
    let extensions = std::env::var("PATHEXT").unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".into());
    for ext in extensions.split(';').filter(|ext| !ext.is_empty()) {
        out.push(dir.join(format!("{}{}", name, ext)));
    }
    out
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
