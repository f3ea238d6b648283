use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Errors for resolving the application home directory
#[derive(Debug, thiserror::Error)]
pub enum HomeDirError {
    #[error("HOME environment variable is not set")]
    HomeMissing,
    #[error("APPDATA environment variable is not set")]
    AppDataMissing,
    #[error("home_dir must be an absolute path (after ~ expansion): {0}")]
    AbsoluteRequired(String),
    #[error("failed to create home_dir {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Platform locations a home directory may be derived from.
#[derive(Debug, Clone, Default)]
struct PlatformDirs {
    /// Target of `~` expansion.
    user_home: Option<PathBuf>,
    /// Parent of the default home directory.
    default_base: Option<PathBuf>,
}

impl PlatformDirs {
    #[cfg(target_os = "windows")]
    fn from_env() -> Self {
        let var = |name: &str| env::var_os(name).map(PathBuf::from);
        Self {
            user_home: var("USERPROFILE").or_else(|| var("HOME")),
            default_base: var("APPDATA"),
        }
    }

    #[cfg(not(target_os = "windows"))]
    fn from_env() -> Self {
        let home = env::var_os("HOME").map(PathBuf::from);
        Self {
            user_home: home.clone(),
            default_base: home,
        }
    }

    fn missing_base() -> HomeDirError {
        if cfg!(target_os = "windows") {
            HomeDirError::AppDataMissing
        } else {
            HomeDirError::HomeMissing
        }
    }
}

/// Resolve the directory the application keeps its state in (logs, caches).
///
/// - `config_home` given: a leading `~` expands to the user's home; the
///   result must be absolute.
/// - otherwise: `$HOME/<default_subdir>` on Unix, `%APPDATA%\<default_subdir>`
///   on Windows.
///
/// With `create`, the directory is created if missing.
pub fn resolve_home_dir(
    config_home: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    resolve_with(&PlatformDirs::from_env(), config_home, default_subdir, create)
}

fn resolve_with(
    dirs: &PlatformDirs,
    config_home: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    let path = match config_home {
        Some(raw) => {
            let expanded = expand_tilde(&raw, dirs.user_home.as_deref())?;
            if !expanded.is_absolute() {
                return Err(HomeDirError::AbsoluteRequired(raw));
            }
            expanded
        }
        None => dirs
            .default_base
            .as_ref()
            .ok_or_else(PlatformDirs::missing_base)?
            .join(default_subdir),
    };

    if create {
        fs::create_dir_all(&path).map_err(|source| HomeDirError::Create {
            path: path.to_string_lossy().into_owned(),
            source,
        })?;
    }
    Ok(path)
}

fn expand_tilde(raw: &str, user_home: Option<&Path>) -> Result<PathBuf, HomeDirError> {
    let Some(rest) = raw.strip_prefix('~') else {
        return Ok(PathBuf::from(raw));
    };
    let home = user_home.ok_or(HomeDirError::HomeMissing)?;
    let rest = rest.trim_start_matches(['/', '\\']);
    if rest.is_empty() {
        Ok(home.to_path_buf())
    } else {
        Ok(home.join(rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn dirs_at(base: &Path) -> PlatformDirs {
        PlatformDirs {
            user_home: Some(base.to_path_buf()),
            default_base: Some(base.to_path_buf()),
        }
    }

    #[test]
    fn tilde_expands_to_user_home() {
        let tmp = tempdir().unwrap();
        let result = resolve_with(&dirs_at(tmp.path()), Some("~/myapp".into()), ".scopekit", false)
            .unwrap();
        assert!(result.is_absolute());
        assert_eq!(result, tmp.path().join("myapp"));

        let bare = resolve_with(&dirs_at(tmp.path()), Some("~".into()), ".scopekit", false).unwrap();
        assert_eq!(bare, tmp.path());
    }

    #[test]
    fn default_uses_platform_base() {
        let tmp = tempdir().unwrap();
        let result = resolve_with(&dirs_at(tmp.path()), None, ".scopekit", false).unwrap();
        assert_eq!(result, tmp.path().join(".scopekit"));
        assert!(!result.exists());
    }

    #[test]
    fn absolute_path_is_kept() {
        let tmp = tempdir().unwrap();
        let abs = tmp.path().join("custom_dir");
        let result = resolve_with(
            &PlatformDirs::default(),
            Some(abs.to_string_lossy().to_string()),
            ".scopekit",
            false,
        )
        .unwrap();
        assert_eq!(result, abs);
    }

    #[test]
    fn relative_path_is_rejected() {
        let err = resolve_with(
            &PlatformDirs::default(),
            Some("relative/path".into()),
            ".scopekit",
            false,
        )
        .unwrap_err();
        assert!(matches!(err, HomeDirError::AbsoluteRequired(ref p) if p == "relative/path"));
    }

    #[test]
    fn create_flag_makes_directory() {
        let tmp = tempdir().unwrap();
        let result = resolve_with(&dirs_at(tmp.path()), None, ".scopekit", true).unwrap();
        assert!(result.is_dir());
    }

    #[test]
    fn missing_platform_dirs_are_reported() {
        let err = resolve_with(&PlatformDirs::default(), None, ".scopekit", false).unwrap_err();
        assert!(matches!(
            err,
            HomeDirError::HomeMissing | HomeDirError::AppDataMissing
        ));

        let err = resolve_with(&PlatformDirs::default(), Some("~/x".into()), ".scopekit", false)
            .unwrap_err();
        assert!(matches!(err, HomeDirError::HomeMissing));
    }
}
