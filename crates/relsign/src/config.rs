#![forbid(unsafe_code)]

use std::fmt;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pattern::Pattern;

/// How the signing service is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignMode {
    /// Local simulated signer; only exercises extract/repack.
    #[default]
    Test,
    /// Production signing through an external program.
    Real,
}

impl fmt::Display for SignMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Test => "test",
            Self::Real => "real",
        })
    }
}

/// Opaque profile identifiers handed to the signing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profiles {
    /// Authenticode profile for Windows executables inside zip archives.
    pub windows: String,
    /// Hardened-runtime profile for macOS binaries inside darwin tarballs.
    pub macos: String,
    pub notarization: String,
    pub detached_signature: String,
}

impl Default for Profiles {
    fn default() -> Self {
        Self {
            windows: "Microsoft400".to_string(),
            macos: "MacDeveloperHarden".to_string(),
            notarization: "MacNotarize".to_string(),
            detached_signature: "LinuxSign".to_string(),
        }
    }
}

impl Profiles {
    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("windows", &self.windows),
            ("macos", &self.macos),
            ("notarization", &self.notarization),
            ("detached_signature", &self.detached_signature),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyProfile { name });
            }
        }
        Ok(())
    }
}

/// Uncompiled naming rules, as written in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleSet {
    pub zip_archive: String,
    pub tar_gz_archive: String,
    pub macos_archive: String,
    pub windows_entry_suffix: String,
    pub macos_entries: Vec<String>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            zip_archive: "go*.zip".to_string(),
            tar_gz_archive: "go*.tar.gz".to_string(),
            macos_archive: "go*darwin*.tar.gz".to_string(),
            windows_entry_suffix: ".exe".to_string(),
            macos_entries: vec!["go/bin/*".to_string(), "pkg/tool/*/*".to_string()],
        }
    }
}

/// Naming rules with every pattern compiled and validated.
#[derive(Debug, Clone)]
pub struct SelectionRules {
    pub(crate) zip_archive: Pattern,
    pub(crate) tar_gz_archive: Pattern,
    pub(crate) macos_archive: Pattern,
    pub(crate) windows_entry_suffix: String,
    pub(crate) macos_entries: Vec<Pattern>,
}

impl SelectionRules {
    pub fn compile(rules: &RuleSet) -> Result<Self, ConfigError> {
        if rules.windows_entry_suffix.is_empty() {
            return Err(ConfigError::EmptyRule {
                name: "windows_entry_suffix",
            });
        }

        let macos_entries = rules
            .macos_entries
            .iter()
            .map(|pattern| Pattern::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            zip_archive: Pattern::new(&rules.zip_archive)?,
            tar_gz_archive: Pattern::new(&rules.tar_gz_archive)?,
            macos_archive: Pattern::new(&rules.macos_archive)?,
            windows_entry_suffix: rules.windows_entry_suffix.clone(),
            macos_entries,
        })
    }

    pub fn standard() -> Result<Self, ConfigError> {
        Self::compile(&RuleSet::default())
    }
}

/// Optional TOML configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub profiles: Profiles,
    pub rules: RuleSet,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Everything a [`Pipeline`](crate::Pipeline) needs to know about a run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub destination_dir: PathBuf,
    pub binlog_dir: PathBuf,
    pub mode: SignMode,
    pub max_parallel: NonZeroUsize,
    pub keep_staging: bool,
    pub profiles: Profiles,
    pub rules: SelectionRules,
}

impl RunConfig {
    pub fn new(
        destination_dir: impl Into<PathBuf>,
        binlog_dir: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            destination_dir: destination_dir.into(),
            binlog_dir: binlog_dir.into(),
            mode: SignMode::default(),
            max_parallel: std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            keep_staging: false,
            profiles: Profiles::default(),
            rules: SelectionRules::standard()?,
        })
    }

    /// Applies profiles and rules from a config file.
    pub fn with_file(mut self, file: &ConfigFile) -> Result<Self, ConfigError> {
        file.profiles.validate()?;
        self.profiles = file.profiles.clone();
        self.rules = SelectionRules::compile(&file.rules)?;
        Ok(self)
    }

    pub fn with_mode(mut self, mode: SignMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: NonZeroUsize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn with_keep_staging(mut self, keep: bool) -> Self {
        self.keep_staging = keep;
        self
    }

    pub fn with_profiles(mut self, profiles: Profiles) -> Result<Self, ConfigError> {
        profiles.validate()?;
        self.profiles = profiles;
        Ok(self)
    }
}
