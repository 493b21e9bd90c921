//! Filesystem locations for jackplug.
//!
//! The application directory is derived from the running executable; the
//! user plugin directory follows XDG conventions for cross-platform
//! consistency.

use std::path::PathBuf;

/// Get the directory of the running executable.
///
/// This is the "application directory" answered to plugins through the
/// broker. Falls back to the current directory if the executable path
/// cannot be resolved.
pub fn app_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the user plugin directory.
///
/// Returns `$XDG_CONFIG_HOME/jackplug/plugins` if set, otherwise
/// `~/.config/jackplug/plugins`.
///
/// # Examples
///
/// ```
/// use jackplug_paths::user_plugins_dir;
///
/// let dir = user_plugins_dir();
/// assert!(dir.ends_with("jackplug/plugins"));
/// ```
pub fn user_plugins_dir() -> PathBuf {
    config_dir().join("plugins")
}

/// Get the jackplug config directory.
///
/// Returns `$XDG_CONFIG_HOME/jackplug` if set, otherwise `~/.config/jackplug`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join("jackplug")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config/jackplug")
    } else {
        PathBuf::from(".config/jackplug")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_dir_is_absolute() {
        // current_exe resolves inside the test harness
        assert!(app_dir().is_absolute());
    }

    #[test]
    fn test_config_dir_ends_with_jackplug() {
        assert!(config_dir().ends_with("jackplug"));
    }

    #[test]
    fn test_user_plugins_dir_nests_under_config() {
        assert!(user_plugins_dir().starts_with(config_dir()));
    }
}
