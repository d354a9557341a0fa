pub mod database;
pub mod fileingestion;
pub mod opcua;
pub mod repository;
pub mod systems;
pub mod taghistorian;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use anyhow::Result;

use crate::core::error::MigrateError;
use crate::db::config::ServiceConfig;
use crate::facades::FacadeBundle;

/// A per-plugin switch beyond the selection flag, exposed on the CLI as
/// `--<plugin-id>-<name>`.
#[derive(Debug, Clone, Copy)]
pub struct ExtraArg {
    pub name: &'static str,
    pub help: &'static str,
    /// Flag when false, takes a value when true.
    pub takes_value: bool,
}

/// Parsed values of a plugin's extra switches, keyed by the bare `<name>`.
#[derive(Debug, Clone, Default)]
pub struct PluginArgs {
    flags: HashSet<String>,
    values: HashMap<String, String>,
}

impl PluginArgs {
    pub fn set_flag(&mut self, name: &str) {
        self.flags.insert(name.to_string());
    }

    pub fn set_value(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn flag(&self, name: &str) -> bool {
        self.flags.contains(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty() && self.values.is_empty()
    }
}

/// One migratable service: identity, help, and the capture/restore operations.
pub trait ServicePlugin {
    /// CLI switch token, e.g. `tag` for `--tag`.
    fn id(&self) -> &'static str;

    /// Display name; doubles as the logical database name fallback and the
    /// workspace sub-directory. Must be a valid path segment.
    fn name(&self) -> &'static str;

    fn help(&self) -> &'static str;

    fn extra_args(&self) -> Vec<ExtraArg> {
        Vec::new()
    }

    /// Whether the underlying service is present on this host. The probe is
    /// the service's configuration file.
    fn is_installed(&self, facades: &FacadeBundle) -> bool {
        facades
            .fs
            .file_exists(&facades.config_dir.join(format!("{}.json", self.name())))
    }

    fn pre_capture_check(
        &self,
        _dir: &Path,
        _facades: &FacadeBundle,
        _args: &PluginArgs,
    ) -> Result<()> {
        Ok(())
    }

    fn pre_restore_check(&self, dir: &Path, facades: &FacadeBundle, _args: &PluginArgs) -> Result<()> {
        facades.db.validate_can_restore(dir, self.name())?;
        Ok(())
    }

    fn capture(&self, dir: &Path, facades: &FacadeBundle, args: &PluginArgs) -> Result<()>;

    fn restore(&self, dir: &Path, facades: &FacadeBundle, args: &PluginArgs) -> Result<()>;
}

impl std::fmt::Debug for dyn ServicePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServicePlugin").field("id", &self.id()).finish()
    }
}

/// Lazily loaded, process-lifetime service configuration, scoped to the
/// plugin value.
#[derive(Debug, Default)]
pub(crate) struct ConfigCache(OnceLock<ServiceConfig>);

impl ConfigCache {
    pub(crate) const fn new() -> Self {
        Self(OnceLock::new())
    }

    pub(crate) fn get(
        &self,
        facades: &FacadeBundle,
        display_name: &str,
    ) -> Result<&ServiceConfig, MigrateError> {
        if let Some(cfg) = self.0.get() {
            return Ok(cfg);
        }
        let loaded = ServiceConfig::load(&facades.config_dir, display_name)?;
        Ok(self.0.get_or_init(|| loaded))
    }
}

/// All plugins known to the tool, in sweep order. The parser is built from
/// this list, so every plugin is known at parse time.
pub fn builtin_plugins() -> Vec<Box<dyn ServicePlugin>> {
    vec![
        Box::new(taghistorian::TagHistorianPlugin::default()),
        Box::new(opcua::OpcClientPlugin::default()),
        Box::new(fileingestion::FileIngestionPlugin::default()),
        Box::new(repository::PackageRepositoryPlugin::default()),
        Box::new(database::DatabasePlugin::new(
            "testmonitor",
            "TestMonitor",
            "Migrate test monitor data",
        )),
        Box::new(database::DatabasePlugin::new(
            "tagrules",
            "TagRuleEngine",
            "Migrate tag alarm rules",
        )),
        Box::new(database::DatabasePlugin::new(
            "assetrules",
            "AssetRuleEngine",
            "Migrate asset alarm rules",
        )),
        Box::new(database::DatabasePlugin::new(
            "documents",
            "DocumentManager",
            "Migrate operator documents",
        )),
        Box::new(database::DatabasePlugin::new(
            "userdata",
            "UserData",
            "Migrate per-user application data",
        )),
        Box::new(database::DatabasePlugin::new(
            "notifications",
            "Notifications",
            "Migrate notification rules and history",
        )),
        Box::new(database::DatabasePlugin::new(
            "assets",
            "AssetInventory",
            "Migrate the asset inventory",
        )),
        Box::new(systems::SystemsManagementPlugin::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_and_names_are_unique() {
        let plugins = builtin_plugins();
        let ids: HashSet<_> = plugins.iter().map(|p| p.id()).collect();
        let names: HashSet<_> = plugins.iter().map(|p| p.name()).collect();
        assert_eq!(ids.len(), plugins.len());
        assert_eq!(names.len(), plugins.len());
    }

    #[test]
    fn test_names_are_valid_path_segments() {
        for p in builtin_plugins() {
            let name = p.name();
            assert!(!name.is_empty());
            assert!(
                name.chars().all(|c| c.is_ascii_alphanumeric()),
                "'{name}' is not a safe path segment"
            );
        }
    }

    #[test]
    fn test_extra_arg_names_do_not_collide() {
        for p in builtin_plugins() {
            let extras: HashSet<_> = p.extra_args().iter().map(|e| e.name).collect();
            assert_eq!(extras.len(), p.extra_args().len(), "plugin '{}'", p.id());
        }
    }

    #[test]
    fn test_plugin_args_bag() {
        let mut args = PluginArgs::default();
        assert!(args.is_empty());
        args.set_flag("metadata-only");
        args.set_value("secret", "hunter2");
        assert!(args.flag("metadata-only"));
        assert!(!args.flag("secret"));
        assert_eq!(args.value("secret"), Some("hunter2"));
        assert_eq!(args.value("absent"), None);
    }
}
