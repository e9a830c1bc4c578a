use crate::domain::model::{PackageSpec, SharingPolicy, WEB_MERCATOR_WKID};
use crate::utils::error::{PublishError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub portal: PortalConfig,
    #[serde(default)]
    pub sharing: SharingConfig,
    pub project: ProjectConfig,
    pub output: OutputConfig,
    pub monitoring: Option<MonitoringConfig>,
    #[serde(default)]
    pub packages: Vec<PackageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Account whose content is replaced; defaults to `username`.
    pub owner: Option<String>,
    pub folder_id: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub publish_poll_interval_ms: Option<u64>,
    pub publish_max_polls: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharingConfig {
    #[serde(default = "default_true")]
    pub org: bool,
    #[serde(default)]
    pub everyone: bool,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default = "default_true")]
    pub share_package: bool,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            org: true,
            everyone: false,
            groups: Vec::new(),
            share_package: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub map_name: Option<String>,
    pub layer_root: String,
    pub layer_extension: Option<String>,
    pub spatial_reference_layer: String,
    pub spatial_reference_wkid: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub directory: String,
    pub report: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    pub name: String,
    pub description: Option<String>,
    pub layers: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl PublishConfig {
    /// Loads and parses a TOML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from TOML text, after environment substitution.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| PublishError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` references (e.g. `${AGOL_PASSWORD}`) with environment values.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").map_err(|e| {
            PublishError::ConfigError {
                message: format!("invalid substitution pattern: {}", e),
            }
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            // Unset variables stay as-is and are rejected by validation.
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_url("portal.url", &self.portal.url)?;
        validation::validate_substituted("portal.username", &self.portal.username)?;
        validation::validate_substituted("portal.password", &self.portal.password)?;
        validation::validate_non_empty_string("portal.username", &self.portal.username)?;
        validation::validate_non_empty_string("portal.password", &self.portal.password)?;
        if let Some(owner) = &self.portal.owner {
            validation::validate_non_empty_string("portal.owner", owner)?;
        }
        if let Some(timeout) = self.portal.timeout_seconds {
            validation::validate_positive_number("portal.timeout_seconds", timeout, 1)?;
        }
        if let Some(polls) = self.portal.publish_max_polls {
            validation::validate_positive_number("portal.publish_max_polls", u64::from(polls), 1)?;
        }

        for group in &self.sharing.groups {
            validation::validate_non_empty_string("sharing.groups", group)?;
        }

        validation::validate_path("project.layer_root", &self.project.layer_root)?;
        validation::validate_path(
            "project.spatial_reference_layer",
            &self.project.spatial_reference_layer,
        )?;
        validation::validate_path("output.directory", &self.output.directory)?;
        if let Some(report) = &self.output.report {
            validation::validate_path("output.report", report)?;
        }

        if self.packages.is_empty() {
            return Err(PublishError::MissingConfigError {
                field: "packages".to_string(),
            });
        }
        for package in &self.packages {
            validation::validate_non_empty_string("packages.name", &package.name)?;
            if package.name.contains(['/', '\\']) {
                return Err(PublishError::InvalidConfigValueError {
                    field: "packages.name".to_string(),
                    value: package.name.clone(),
                    reason: "package names are used as file names and cannot contain path separators"
                        .to_string(),
                });
            }
            if package.layers.is_empty() {
                return Err(PublishError::InvalidConfigValueError {
                    field: format!("packages.{}.layers", package.name),
                    value: "[]".to_string(),
                    reason: "a package needs at least one layer".to_string(),
                });
            }
        }
        validation::validate_unique_names(self.packages.iter().map(|p| p.name.as_str()))?;

        Ok(())
    }

    /// The configured packages, in file order.
    pub fn package_specs(&self) -> Vec<PackageSpec> {
        self.packages
            .iter()
            .map(|p| {
                let spec = PackageSpec::new(p.name.clone(), p.layers.clone());
                match &p.description {
                    Some(description) => spec.with_description(description.clone()),
                    None => spec,
                }
            })
            .collect()
    }

    /// Restricts the batch to `names`, keeping file order. Unknown names are an error.
    pub fn select_packages(&self, names: &[String]) -> Result<Vec<PackageSpec>> {
        let specs = self.package_specs();
        if names.is_empty() {
            return Ok(specs);
        }

        if let Some(unknown) = names.iter().find(|n| !specs.iter().any(|s| s.name() == n.as_str())) {
            return Err(PublishError::InvalidConfigValueError {
                field: "--only".to_string(),
                value: unknown.clone(),
                reason: "no package with this name is configured".to_string(),
            });
        }
        Ok(specs
            .into_iter()
            .filter(|s| names.iter().any(|n| n == s.name()))
            .collect())
    }

    pub fn sharing_policy(&self) -> SharingPolicy {
        SharingPolicy {
            org: self.sharing.org,
            everyone: self.sharing.everyone,
            groups: self.sharing.groups.iter().cloned().collect::<BTreeSet<_>>(),
            share_package: self.sharing.share_package,
        }
    }

    pub fn owner(&self) -> &str {
        self.portal.owner.as_deref().unwrap_or(&self.portal.username)
    }

    pub fn map_name(&self) -> &str {
        self.project.map_name.as_deref().unwrap_or("collector_map")
    }

    pub fn layer_extension(&self) -> &str {
        self.project.layer_extension.as_deref().unwrap_or("lyr")
    }

    pub fn spatial_reference_wkid(&self) -> u32 {
        self.project.spatial_reference_wkid.unwrap_or(WEB_MERCATOR_WKID)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.output.directory)
    }

    pub fn report_path(&self) -> Option<PathBuf> {
        self.output.report.as_ref().map(PathBuf::from)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.portal.timeout_seconds.unwrap_or(120))
    }

    pub fn publish_poll_interval(&self) -> Duration {
        Duration::from_millis(self.portal.publish_poll_interval_ms.unwrap_or(2000))
    }

    pub fn publish_max_polls(&self) -> u32 {
        self.portal.publish_max_polls.unwrap_or(150)
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }
}

impl Validate for PublishConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
