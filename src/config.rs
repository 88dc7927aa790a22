/// Configuration surface for the MemoGarden core substrate.
///
/// Precedence, highest to lowest: explicit constructor overrides >
/// `MEMOGARDEN_*` environment variables > an optional TOML config file >
/// defaults from the named resource profile. This generalizes the
/// storage-path resolution (`explicit path → env var → data dir
/// → cwd fallback`) to the whole configuration surface.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A named bundle of defaults. Unknown profile names fall back to `embedded`
/// with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceProfile {
    /// Conservative defaults for constrained, single-user deployments.
    Embedded,
    /// Defaults for a long-lived desktop/server installation.
    Standard,
}

impl std::str::FromStr for ResourceProfile {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "embedded" => Ok(ResourceProfile::Embedded),
            "standard" => Ok(ResourceProfile::Standard),
            _ => Err(()),
        }
    }
}

/// The materialized configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GardenConfig {
    pub data_dir: Option<PathBuf>,
    pub soil_db: Option<PathBuf>,
    pub core_db: Option<PathBuf>,
    pub safety_coefficient: f64,
    pub sweep_interval_secs: u64,
    pub summary_method: String,
    pub summary_max_tokens: usize,
    pub storage_pressure_threshold_pct: f64,
    pub eviction_target_free_pct: f64,
    pub context_bound_n: usize,
    pub view_coalescence_timeout_secs: u64,
    pub busy_timeout_secs: u64,
    pub resource_profile: ResourceProfile,
    pub log_level: String,
    pub encryption: bool,
}

impl Default for GardenConfig {
    fn default() -> Self {
        Self::profile(ResourceProfile::Embedded)
    }
}

impl GardenConfig {
    /// Defaults for a named resource profile.
    pub fn profile(profile: ResourceProfile) -> Self {
        let base = GardenConfig {
            data_dir: None,
            soil_db: None,
            core_db: None,
            safety_coefficient: 1.2,
            sweep_interval_secs: 24 * 60 * 60,
            summary_method: "extractive".to_string(),
            summary_max_tokens: 256,
            storage_pressure_threshold_pct: 85.0,
            eviction_target_free_pct: 70.0,
            context_bound_n: 7,
            view_coalescence_timeout_secs: 5,
            busy_timeout_secs: 5,
            resource_profile: profile,
            log_level: "info".to_string(),
            encryption: false,
        };
        match profile {
            ResourceProfile::Embedded => base,
            ResourceProfile::Standard => GardenConfig {
                sweep_interval_secs: 6 * 60 * 60,
                context_bound_n: 12,
                ..base
            },
        }
    }

    /// Load a config file (TOML) from disk, if it exists, layered onto the
    /// defaults for its declared (or the given) resource profile.
    pub fn load_file(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let partial: PartialConfig = toml::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut cfg = GardenConfig::profile(
            partial
                .resource_profile
                .unwrap_or(ResourceProfile::Embedded),
        );
        partial.apply(&mut cfg);
        Ok(cfg)
    }

    /// Overlay `MEMOGARDEN_*` environment variables on top of the current
    /// configuration. Environment variables outrank a config file but are
    /// outranked by explicit constructor overrides applied afterward.
    pub fn overlay_env(mut self) -> Self {
        if let Ok(v) = std::env::var("MEMOGARDEN_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("MEMOGARDEN_SOIL_DB") {
            self.soil_db = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("MEMOGARDEN_CORE_DB") {
            self.core_db = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("MEMOGARDEN_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("MEMOGARDEN_SAFETY_COEFFICIENT") {
            if let Ok(parsed) = v.parse() {
                self.safety_coefficient = parsed;
            }
        }
        self
    }

    /// Resolve the on-disk path for a layer's store, following the
    /// precedence above: explicit override → env var (already folded
    /// into `self` by [`overlay_env`]) → `data_dir`/`<layer>.db` → cwd.
    pub fn resolve_store_path(&self, layer: crate::ids::Layer) -> PathBuf {
        let explicit = match layer {
            crate::ids::Layer::Soil => &self.soil_db,
            crate::ids::Layer::Core => &self.core_db,
        };
        if let Some(p) = explicit {
            return p.clone();
        }
        let filename = format!("{}.db", layer.prefix());
        match &self.data_dir {
            Some(dir) => dir.join(filename),
            None => default_data_dir().join(filename),
        }
    }
}

/// `~/.memogarden`, falling back to the current directory if the home
/// directory can't be determined.
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".memogarden"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Partial view of the config file; only present keys override profile
/// defaults.
#[derive(Debug, Deserialize)]
struct PartialConfig {
    resource_profile: Option<ResourceProfile>,
    data_dir: Option<PathBuf>,
    soil_db: Option<PathBuf>,
    core_db: Option<PathBuf>,
    safety_coefficient: Option<f64>,
    sweep_interval_secs: Option<u64>,
    summary_method: Option<String>,
    summary_max_tokens: Option<usize>,
    storage_pressure_threshold_pct: Option<f64>,
    eviction_target_free_pct: Option<f64>,
    context_bound_n: Option<usize>,
    view_coalescence_timeout_secs: Option<u64>,
    busy_timeout_secs: Option<u64>,
    log_level: Option<String>,
    encryption: Option<bool>,
}

impl PartialConfig {
    fn apply(self, cfg: &mut GardenConfig) {
        macro_rules! set {
            ($field:ident) => {
                if let Some(v) = self.$field {
                    cfg.$field = v;
                }
            };
        }
        set!(data_dir);
        set!(soil_db);
        set!(core_db);
        set!(safety_coefficient);
        set!(sweep_interval_secs);
        set!(summary_method);
        set!(summary_max_tokens);
        set!(storage_pressure_threshold_pct);
        set!(eviction_target_free_pct);
        set!(context_bound_n);
        set!(view_coalescence_timeout_secs);
        set!(busy_timeout_secs);
        set!(log_level);
        set!(encryption);
    }
}
