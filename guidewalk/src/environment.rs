//! Facts about the host application that requirement checks consult.

use crate::errors::GuideError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

/// Organisation role, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgRole {
    #[default]
    None,
    Viewer,
    Editor,
    Admin,
}

impl OrgRole {
    pub fn parse(name: &str) -> Option<OrgRole> {
        match name.trim().to_lowercase().as_str() {
            "none" => Some(OrgRole::None),
            "viewer" => Some(OrgRole::Viewer),
            "editor" => Some(OrgRole::Editor),
            "admin" => Some(OrgRole::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserInfo {
    pub login: String,
    pub is_signed_in: bool,
    pub org_role: OrgRole,
    /// Server-wide administrator
    pub is_server_admin: bool,
    pub permissions: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceInfo {
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardInfo {
    pub title: String,
    #[serde(default)]
    pub uid: String,
}

/// Read access to the host application's state.
#[async_trait]
pub trait Environment: Send + Sync {
    async fn current_user(&self) -> Result<UserInfo, GuideError>;

    async fn has_permission(&self, permission: &str) -> Result<bool, GuideError> {
        Ok(self.current_user().await?.permissions.contains(permission))
    }

    async fn data_sources(&self) -> Result<Vec<DataSourceInfo>, GuideError>;

    async fn plugins(&self) -> Result<Vec<PluginInfo>, GuideError>;

    /// Dashboards whose title contains `query` (case-insensitive).
    async fn search_dashboards(&self, query: &str) -> Result<Vec<DashboardInfo>, GuideError>;

    fn feature_enabled(&self, feature: &str) -> bool;

    /// Deployment environment name, e.g. `cloud` or `oss`
    fn deployment_environment(&self) -> String;

    /// Host application version string, e.g. `10.4.1`
    fn version(&self) -> String;
}

/// Plain data behind a [`StaticEnvironment`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSnapshot {
    pub user: UserInfo,
    pub data_sources: Vec<DataSourceInfo>,
    pub plugins: Vec<PluginInfo>,
    pub dashboards: Vec<DashboardInfo>,
    pub features: BTreeSet<String>,
    pub environment: String,
    pub version: String,
}

/// An [`Environment`] backed by an in-memory snapshot that can be updated at runtime.
#[derive(Debug, Default)]
pub struct StaticEnvironment {
    snapshot: RwLock<EnvironmentSnapshot>,
}

impl StaticEnvironment {
    pub fn new(snapshot: EnvironmentSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GuideError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GuideError::InvalidArgument(format!("cannot read environment {}: {e}", path.display()))
        })?;
        let snapshot: EnvironmentSnapshot = serde_json::from_str(&raw).map_err(|e| {
            GuideError::InvalidArgument(format!("invalid environment {}: {e}", path.display()))
        })?;
        Ok(Self::new(snapshot))
    }

    pub fn snapshot(&self) -> EnvironmentSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mutate the snapshot in place.
    pub fn update(&self, f: impl FnOnce(&mut EnvironmentSnapshot)) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    pub fn with_user(self, user: UserInfo) -> Self {
        self.update(|s| s.user = user);
        self
    }

    pub fn with_data_source(self, name: &str, uid: &str, kind: &str) -> Self {
        self.update(|s| {
            s.data_sources.push(DataSourceInfo {
                name: name.to_string(),
                uid: uid.to_string(),
                kind: kind.to_string(),
            })
        });
        self
    }

    pub fn with_plugin(self, id: &str) -> Self {
        self.update(|s| {
            s.plugins.push(PluginInfo {
                id: id.to_string(),
                enabled: true,
            })
        });
        self
    }

    pub fn with_dashboard(self, title: &str) -> Self {
        self.update(|s| {
            s.dashboards.push(DashboardInfo {
                title: title.to_string(),
                uid: String::new(),
            })
        });
        self
    }

    pub fn with_feature(self, feature: &str) -> Self {
        self.update(|s| {
            s.features.insert(feature.to_string());
        });
        self
    }

    pub fn with_environment(self, environment: &str) -> Self {
        self.update(|s| s.environment = environment.to_string());
        self
    }

    pub fn with_version(self, version: &str) -> Self {
        self.update(|s| s.version = version.to_string());
        self
    }
}

#[async_trait]
impl Environment for StaticEnvironment {
    async fn current_user(&self) -> Result<UserInfo, GuideError> {
        Ok(self.snapshot().user)
    }

    async fn data_sources(&self) -> Result<Vec<DataSourceInfo>, GuideError> {
        Ok(self.snapshot().data_sources)
    }

    async fn plugins(&self) -> Result<Vec<PluginInfo>, GuideError> {
        Ok(self.snapshot().plugins)
    }

    async fn search_dashboards(&self, query: &str) -> Result<Vec<DashboardInfo>, GuideError> {
        let query = query.to_lowercase();
        Ok(self
            .snapshot()
            .dashboards
            .into_iter()
            .filter(|d| d.title.to_lowercase().contains(&query))
            .collect())
    }

    fn feature_enabled(&self, feature: &str) -> bool {
        self.snapshot().features.contains(feature)
    }

    fn deployment_environment(&self) -> String {
        self.snapshot().environment
    }

    fn version(&self) -> String {
        self.snapshot().version
    }
}
