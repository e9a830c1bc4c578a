use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Layer '{layer}' could not be resolved: {reason}")]
    LayerResolution { layer: String, reason: String },

    #[error("Spatial reference mismatch: expected WKID {expected}, found {found}")]
    SpatialReference { expected: u32, found: String },

    #[error("Tile package build failed for '{package}': {reason}")]
    PackageBuild { package: String, reason: String },

    #[error("Remote lookup failed for '{title}': {message}")]
    Resolve { title: String, message: String },

    #[error("Failed to delete item {item_id} ('{title}'): {message}")]
    Delete {
        item_id: String,
        title: String,
        message: String,
    },

    #[error("Upload of '{title}' failed: {message}")]
    Upload { title: String, message: String },

    #[error("Publishing hosted layer from item {item_id} failed: {message}")]
    Publish { item_id: String, message: String },

    #[error("Sharing item {item_id} failed: {message}")]
    Share { item_id: String, message: String },

    #[error("Portal returned error {code}: {message}")]
    Portal { code: i64, message: String },

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV report error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Package name '{name}' is configured more than once")]
    DuplicatePackageError { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authoring,
    Packaging,
    Remote,
    Sharing,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Content is valid, something cosmetic went wrong (sharing).
    Low,
    /// Transient remote failure, retrying the whole cycle is safe.
    Medium,
    /// Bad input for one package.
    High,
    /// Nothing can run.
    Critical,
}

impl PublishError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::LayerResolution { .. } | Self::SpatialReference { .. } => ErrorCategory::Authoring,
            Self::PackageBuild { .. } | Self::ZipError(_) => ErrorCategory::Packaging,
            Self::Resolve { .. }
            | Self::Delete { .. }
            | Self::Upload { .. }
            | Self::Publish { .. }
            | Self::Portal { .. }
            | Self::HttpError(_) => ErrorCategory::Remote,
            Self::Share { .. } => ErrorCategory::Sharing,
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. }
            | Self::DuplicatePackageError { .. }
            | Self::UrlError(_) => ErrorCategory::Configuration,
            Self::CsvError(_) | Self::IoError(_) | Self::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Sharing => ErrorSeverity::Low,
            ErrorCategory::Remote => ErrorSeverity::Medium,
            ErrorCategory::Authoring | ErrorCategory::Packaging | ErrorCategory::System => {
                ErrorSeverity::High
            }
            ErrorCategory::Configuration => ErrorSeverity::Critical,
        }
    }

    /// Whether this error ends the current package cycle before publish.
    pub fn is_fatal_for_cycle(&self) -> bool {
        !matches!(self, Self::Share { .. })
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::LayerResolution { .. } => {
                "Check that the layer file exists under project.layer_root and the package's layer list is spelled correctly"
            }
            Self::SpatialReference { .. } => {
                "Point project.spatial_reference_layer at an empty layer in Web Mercator (WKID 3857)"
            }
            Self::PackageBuild { .. } | Self::ZipError(_) => {
                "Check free disk space and that every source layer is reachable, then rerun"
            }
            Self::Resolve { .. } | Self::HttpError(_) | Self::Portal { .. } => {
                "Check network access and portal credentials, then rerun the batch"
            }
            Self::Delete { .. } => {
                "Remove the stale item manually in the portal or rerun; deletion is retried on every run"
            }
            Self::Upload { .. } => {
                "The local package is kept on disk; rerun once the portal is reachable or storage quota is freed"
            }
            Self::Publish { .. } => {
                "The uploaded package is left in the portal and is replaced on the next run"
            }
            Self::Share { .. } => "Share the hosted layer manually or rerun the batch",
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. }
            | Self::UrlError(_) => "Fix the configuration file and try again",
            Self::DuplicatePackageError { .. } => "Give every [[packages]] entry a unique name",
            Self::CsvError(_) | Self::IoError(_) | Self::SerializationError(_) => {
                "Check file permissions and available disk space"
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::LayerResolution { layer, .. } => format!("Layer '{}' was not found", layer),
            Self::SpatialReference { found, .. } => {
                format!("The reference layer is in {} instead of Web Mercator", found)
            }
            Self::PackageBuild { package, .. } => {
                format!("Could not build the tile package for '{}'", package)
            }
            Self::Upload { title, .. } => format!("Could not upload '{}'", title),
            Self::Publish { .. } => "Could not publish the hosted tile layer".to_string(),
            Self::Share { .. } => "Published, but sharing could not be applied".to_string(),
            Self::DuplicatePackageError { name } => {
                format!("Package '{}' appears more than once in the configuration", name)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PublishError>;
