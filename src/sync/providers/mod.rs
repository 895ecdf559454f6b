//! Instance Enumerators
//!
//! Trait-based adapters that turn a fleet source (static list, AWS Auto
//! Scaling Group, Azure VM Scale Set) into a list of [`Target`]s.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

use super::types::{CloudEnvironment, StartupError, Target};
use crate::config::Settings;

pub mod aws;
pub mod azure;
pub mod static_list;

pub use aws::AwsProvider;
pub use azure::AzureProvider;
pub use static_list::StaticProvider;

/// Trait for fleet sources
#[async_trait]
pub trait InstanceEnumerator: Send + Sync {
    /// The environment this enumerator serves
    fn environment(&self) -> CloudEnvironment;

    /// Discover the current set of targets
    async fn discover_targets(&self) -> Result<Vec<Target>>;
}

/// The fleet source selected at startup
pub enum Fleet {
    Static(StaticProvider),
    Aws(AwsProvider),
    Azure(AzureProvider),
}

impl Fleet {
    /// Select the source for a detected environment.
    ///
    /// A static list wins regardless of the environment.
    pub fn for_environment(
        environment: CloudEnvironment,
        settings: Arc<Settings>,
    ) -> Result<Self, StartupError> {
        if settings.static_hosts().is_some() {
            return Ok(Fleet::Static(StaticProvider::new(settings)));
        }

        match environment {
            CloudEnvironment::Aws => Ok(Fleet::Aws(AwsProvider::new(settings)?)),
            CloudEnvironment::Azure => Ok(Fleet::Azure(AzureProvider::new(settings)?)),
            CloudEnvironment::Static | CloudEnvironment::Unknown => {
                Err(StartupError::UndetectedEnvironment)
            }
        }
    }

    pub fn environment(&self) -> CloudEnvironment {
        self.enumerator().environment()
    }

    fn enumerator(&self) -> &dyn InstanceEnumerator {
        match self {
            Fleet::Static(p) => p,
            Fleet::Aws(p) => p,
            Fleet::Azure(p) => p,
        }
    }

    /// Discover targets for this cycle.
    ///
    /// Provider failures degrade to an empty list; they never propagate.
    pub async fn enumerate(&self) -> Vec<Target> {
        let enumerator = self.enumerator();

        match enumerator.discover_targets().await {
            Ok(targets) => {
                info!(
                    provider = %enumerator.environment(),
                    count = targets.len(),
                    "Discovered targets"
                );
                targets
            }
            Err(e) => {
                error!(
                    provider = %enumerator.environment(),
                    error = %format!("{:#}", e),
                    "Failed to enumerate instances"
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::minimal_settings;

    #[test]
    fn test_static_list_takes_precedence() {
        let mut settings = minimal_settings();
        settings.cc_vms = Some(vec!["web-1".to_string()]);

        let fleet = Fleet::for_environment(CloudEnvironment::Aws, Arc::new(settings)).unwrap();
        assert_eq!(fleet.environment(), CloudEnvironment::Static);
    }

    #[test]
    fn test_unknown_environment_is_fatal() {
        let result = Fleet::for_environment(CloudEnvironment::Unknown, Arc::new(minimal_settings()));
        assert!(matches!(result, Err(StartupError::UndetectedEnvironment)));
    }

    #[test]
    fn test_static_without_hosts_is_fatal() {
        let result = Fleet::for_environment(CloudEnvironment::Static, Arc::new(minimal_settings()));
        assert!(matches!(result, Err(StartupError::UndetectedEnvironment)));
    }

    #[test]
    fn test_cloud_environments_select_provider() {
        let settings = Arc::new(minimal_settings());

        let aws = Fleet::for_environment(CloudEnvironment::Aws, settings.clone()).unwrap();
        assert_eq!(aws.environment(), CloudEnvironment::Aws);

        let azure = Fleet::for_environment(CloudEnvironment::Azure, settings).unwrap();
        assert_eq!(azure.environment(), CloudEnvironment::Azure);
    }

    #[tokio::test]
    async fn test_provider_error_degrades_to_empty() {
        let settings = Arc::new(minimal_settings());
        let fleet = Fleet::Aws(AwsProvider::with_api(
            Box::new(aws::tests::FailingApi),
            settings,
        ));

        assert!(fleet.enumerate().await.is_empty());
    }
}
