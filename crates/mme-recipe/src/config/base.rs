use super::{logger::LoggerConfig, planner::PlannerConfig, planner::RecipeLogLevel};
use alloc::sync::Arc;
use std::{io, path::Path};

/// Static mutex holding the global configuration, initialized as `None`.
static MME_RECIPE_GLOBAL_CONFIG: spin::Mutex<Option<Arc<GlobalConfig>>> = spin::Mutex::new(None);

/// The global configuration of the planner, combining the planner knobs and the recipe logger.
#[derive(Default, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GlobalConfig {
    /// Planner knobs.
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Where and how much of every recipe is logged.
    #[serde(default)]
    pub logger: LoggerConfig<RecipeLogLevel>,
}

impl GlobalConfig {
    /// Retrieves the current global configuration, loading it from the current directory if not set.
    ///
    /// If no configuration is set, it attempts to load one from `mme-recipe.toml` or
    /// `MmeRecipe.toml` in the current directory or its parents. If no file is found, a default
    /// configuration is used. Environment overrides are applied on top.
    pub fn get() -> Arc<Self> {
        let mut state = MME_RECIPE_GLOBAL_CONFIG.lock();
        match state.as_ref() {
            Some(config) => config.clone(),
            None => {
                let config = Arc::new(Self::from_current_dir().override_from_env());
                *state = Some(config.clone());
                config
            }
        }
    }

    /// Save the current configuration to the provided file path.
    pub fn save_default<P: AsRef<Path>>(path: P) -> io::Result<()> {
        let config = Self::get();
        config.save(path)
    }

    /// Writes this configuration as TOML.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let content = toml::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, content)
    }

    /// Sets the global configuration to the provided value.
    ///
    /// # Panics
    /// Panics if the configuration has already been set or read, as it cannot be overridden.
    ///
    /// # Warning
    /// This method must be called at the start of the program, before any calls to `get`.
    pub fn set(config: Self) {
        let mut state = MME_RECIPE_GLOBAL_CONFIG.lock();
        if state.is_some() {
            panic!("Cannot set the global configuration multiple times.");
        }
        *state = Some(Arc::new(config));
    }

    /// Overrides configuration fields based on environment variables.
    pub fn override_from_env(mut self) -> Self {
        if let Ok(val) = std::env::var("MME_RECIPE_DEBUG_LOG") {
            self.logger.level = RecipeLogLevel::Full;

            match val.as_str() {
                "stdout" => self.logger.stdout = true,
                "stderr" => self.logger.stderr = true,
                "1" | "true" => self.logger.file = Some("/tmp/mme-recipe.log".into()),
                "0" | "false" => self.logger.level = RecipeLogLevel::Disabled,
                file_path => self.logger.file = Some(file_path.into()),
            }
        }

        if let Ok(val) = std::env::var("MME_RECIPE_SB_REUSE") {
            match val.as_str() {
                "0" | "false" => self.planner.sb_reuse = false,
                "1" | "true" => self.planner.sb_reuse = true,
                _ => {}
            }
        }

        if let Ok(val) = std::env::var("MME_RECIPE_PIPELINE_HINT") {
            match val.as_str() {
                "0" | "false" => self.planner.pipeline_level_hint = false,
                "1" | "true" => self.planner.pipeline_level_hint = true,
                _ => {}
            }
        }

        self
    }

    /// Loads a configuration from a TOML file.
    pub fn from_file_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    // Traverses up the directory tree until a valid configuration file is found or the root is
    // reached.
    fn from_current_dir() -> Self {
        let Ok(mut dir) = std::env::current_dir() else {
            return Self::default();
        };

        loop {
            for name in ["mme-recipe.toml", "MmeRecipe.toml"] {
                match Self::from_file_path(dir.join(name)) {
                    Ok(config) => return config,
                    Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                        log::warn!("Ignoring malformed {}: {err}", dir.join(name).display());
                    }
                    Err(_) => {}
                }
            }

            if !dir.pop() {
                break;
            }
        }

        Self::default()
    }
}
