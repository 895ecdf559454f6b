//! Static host list

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::InstanceEnumerator;
use crate::config::Settings;
use crate::sync::types::{CloudEnvironment, Target};

/// Maps every configured host straight to a target, without I/O
pub struct StaticProvider {
    settings: Arc<Settings>,
}

impl StaticProvider {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl InstanceEnumerator for StaticProvider {
    fn environment(&self) -> CloudEnvironment {
        CloudEnvironment::Static
    }

    async fn discover_targets(&self) -> Result<Vec<Target>> {
        Ok(self
            .settings
            .static_hosts()
            .unwrap_or_default()
            .iter()
            .map(|host| Target::from_settings(host.as_str(), &self.settings))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::minimal_settings;

    #[tokio::test]
    async fn test_one_target_per_host() {
        let mut settings = minimal_settings();
        settings.cc_vms = Some(vec![
            "10.0.0.5".to_string(),
            "10.0.0.6".to_string(),
            "collector.internal".to_string(),
        ]);
        let settings = Arc::new(settings);

        let targets = StaticProvider::new(settings.clone())
            .discover_targets()
            .await
            .unwrap();

        assert_eq!(targets.len(), 3);
        assert_eq!(targets[2].host, "collector.internal");
        for target in &targets {
            assert_eq!(target.username, settings.ssh_username);
            assert_eq!(target.key_path, settings.ssh_key_path);
            assert_eq!(target.remote_paths, settings.remote_paths);
        }
    }

    #[tokio::test]
    async fn test_no_hosts_no_targets() {
        let targets = StaticProvider::new(Arc::new(minimal_settings()))
            .discover_targets()
            .await
            .unwrap();

        assert!(targets.is_empty());
    }
}
