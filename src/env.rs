use std::path::Path;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Development,
    Production,
}

impl Profile {
    /// Anything other than `production` runs with development settings.
    pub fn from_rocket_profile(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("production") | Some("release") => Profile::Production,
            _ => Profile::Development,
        }
    }

    /// Later files override earlier ones.
    pub fn env_files(&self) -> [&'static str; 3] {
        let profile_file = match self {
            Profile::Development => "config/dev.env",
            Profile::Production => "config/prod.env",
        };
        ["config/common.env", profile_file, ".secrets.env"]
    }
}

#[derive(Debug)]
pub struct LoadedEnvironment {
    pub profile: Profile,
    pub files: Vec<&'static str>,
}

pub fn load_environment() -> Result<LoadedEnvironment, AppError> {
    let profile = Profile::from_rocket_profile(dotenvy::var("ROCKET_PROFILE").ok().as_deref());
    load_environment_from(Path::new("."), profile)
}

/// Loads the profile's env files found under `base`. Missing files are skipped.
pub fn load_environment_from(base: &Path, profile: Profile) -> Result<LoadedEnvironment, AppError> {
    let mut files = Vec::new();

    for file in profile.env_files() {
        let path = base.join(file);
        if !path.exists() {
            continue;
        }

        dotenvy::from_path_override(&path)
            .map_err(|e| AppError::Configuration(format!("Could not load {}: {}", file, e)))?;
        files.push(file);
    }

    Ok(LoadedEnvironment { profile, files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::random_hex;
    use serial_test::serial;

    #[test]
    fn profile_selects_env_file() {
        assert_eq!(Profile::from_rocket_profile(None), Profile::Development);
        assert_eq!(
            Profile::from_rocket_profile(Some("production")),
            Profile::Production
        );
        assert_eq!(Profile::Production.env_files()[1], "config/prod.env");
        assert_eq!(Profile::Development.env_files()[2], ".secrets.env");
    }

    #[test]
    #[serial]
    fn reports_only_the_files_it_loaded() {
        let base = std::env::temp_dir().join(format!("swing-tracker-env-{}", random_hex(8)));
        std::fs::create_dir_all(base.join("config")).unwrap();
        std::fs::write(base.join("config/common.env"), "SWING_ENV_CHECK=common\n").unwrap();
        std::fs::write(base.join("config/prod.env"), "SWING_ENV_CHECK=prod\n").unwrap();

        temp_env::with_var_unset("SWING_ENV_CHECK", || {
            let loaded = load_environment_from(&base, Profile::Production).unwrap();
            assert_eq!(loaded.profile, Profile::Production);
            assert_eq!(loaded.files, vec!["config/common.env", "config/prod.env"]);
            assert_eq!(std::env::var("SWING_ENV_CHECK").unwrap(), "prod");

            let loaded = load_environment_from(&base, Profile::Development).unwrap();
            assert_eq!(loaded.files, vec!["config/common.env"]);
            assert_eq!(std::env::var("SWING_ENV_CHECK").unwrap(), "common");
        });

        let _ = std::fs::remove_dir_all(&base);
    }
}
