//! Azure Virtual Machine Scale Set enumerator
//!
//! Walks VMSS instance -> network interface (at the configured index) ->
//! IP configuration -> private IP address through the ARM REST API.
//! An instance with a missing link anywhere in that chain is skipped.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::InstanceEnumerator;
use crate::config::Settings;
use crate::sync::detector::{metadata_client, METADATA_BASE_URL};
use crate::sync::types::{CloudEnvironment, Target};

const ARM_ENDPOINT: &str = "https://management.azure.com";
const ARM_RESOURCE: &str = "https://management.azure.com/";
const COMPUTE_API_VERSION: &str = "2023-09-01";
/// Scale set network interfaces are only served on this Network API version
const NETWORK_API_VERSION: &str = "2018-10-01";
const MANAGED_IDENTITY_API_VERSION: &str = "2018-02-01";

/// One VM of a scale set
#[derive(Debug, Clone, Deserialize)]
pub struct ScaleSetVm {
    pub name: Option<String>,
    #[serde(rename = "instanceId")]
    pub instance_id: Option<String>,
    pub properties: Option<ScaleSetVmProperties>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScaleSetVmProperties {
    #[serde(rename = "networkProfile")]
    pub network_profile: Option<NetworkProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkProfile {
    #[serde(rename = "networkInterfaces", default)]
    pub network_interfaces: Vec<ResourceRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRef {
    pub id: String,
}

impl ScaleSetVm {
    /// ARM id of the network interface at `index`
    pub fn network_interface_id(&self, index: usize) -> Option<&str> {
        self.properties
            .as_ref()?
            .network_profile
            .as_ref()?
            .network_interfaces
            .get(index)
            .map(|r| r.id.as_str())
    }

    fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.instance_id.as_deref())
            .unwrap_or("unknown")
    }
}

/// A network interface resource
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInterface {
    pub properties: Option<NetworkInterfaceProperties>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInterfaceProperties {
    #[serde(rename = "ipConfigurations", default)]
    pub ip_configurations: Vec<IpConfiguration>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpConfiguration {
    pub properties: Option<IpConfigurationProperties>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpConfigurationProperties {
    #[serde(rename = "privateIPAddress")]
    pub private_ip_address: Option<String>,
}

impl NetworkInterface {
    /// Private IP of the first IP configuration that carries one
    pub fn private_ip_address(&self) -> Option<&str> {
        self.properties
            .as_ref()?
            .ip_configurations
            .iter()
            .filter_map(|c| c.properties.as_ref()?.private_ip_address.as_deref())
            .find(|ip| !ip.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// The two ARM calls the enumerator needs, authorized by a bearer token
/// acquired once per cycle
#[async_trait]
pub trait ScaleSetApi: Send + Sync {
    /// Obtain an ARM bearer token
    async fn authenticate(&self) -> Result<String>;

    /// All VMs of a scale set, across pages
    async fn list_scale_set_vms(
        &self,
        token: &str,
        resource_group: &str,
        vmss_name: &str,
    ) -> Result<Vec<ScaleSetVm>>;

    /// Network interface by ARM resource id
    async fn get_network_interface(&self, token: &str, nic_id: &str) -> Result<NetworkInterface>;
}

/// Bearer-token client for the Azure Resource Manager REST API
pub struct AzureApiClient {
    http_client: Client,
    metadata_client: Client,
    metadata_base_url: String,
    subscription_id: String,
}

impl AzureApiClient {
    pub fn new(subscription_id: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            metadata_client: metadata_client()?,
            metadata_base_url: METADATA_BASE_URL.to_string(),
            subscription_id: subscription_id.to_string(),
        })
    }

    /// Obtain an ARM token: managed identity first, then a service principal
    /// secret from the environment.
    async fn access_token(&self) -> Result<String> {
        match self.managed_identity_token().await {
            Ok(token) => return Ok(token),
            Err(e) => debug!(error = %format!("{:#}", e), "Managed identity token unavailable"),
        }

        self.client_secret_token()
            .await
            .context("No managed identity and service principal login failed")
    }

    async fn managed_identity_token(&self) -> Result<String> {
        let response: TokenResponse = self
            .metadata_client
            .get(format!(
                "{}/metadata/identity/oauth2/token",
                self.metadata_base_url
            ))
            .query(&[
                ("api-version", MANAGED_IDENTITY_API_VERSION),
                ("resource", ARM_RESOURCE),
            ])
            .header("Metadata", "true")
            .send()
            .await
            .context("Failed to call managed identity endpoint")?
            .error_for_status()?
            .json()
            .await
            .context("Invalid managed identity token response")?;

        Ok(response.access_token)
    }

    async fn client_secret_token(&self) -> Result<String> {
        let tenant_id = env::var("AZURE_TENANT_ID").context("AZURE_TENANT_ID not configured")?;
        let client_id = env::var("AZURE_CLIENT_ID").context("AZURE_CLIENT_ID not configured")?;
        let client_secret =
            env::var("AZURE_CLIENT_SECRET").context("AZURE_CLIENT_SECRET not configured")?;

        let token_url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            tenant_id
        );

        let scope = format!("{}.default", ARM_RESOURCE);
        let form_data = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let response = self
            .http_client
            .post(&token_url)
            .form(&form_data)
            .send()
            .await
            .context("Failed to call Azure AD")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Azure AD failed with {}: {}", status, body);
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Missing access_token in Azure response")?;

        Ok(token.access_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, token: &str) -> Result<T> {
        let response = self
            .http_client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Failed to call {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Azure API returned {}: {}", status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Invalid response from {}", url))
    }
}

#[async_trait]
impl ScaleSetApi for AzureApiClient {
    async fn authenticate(&self) -> Result<String> {
        self.access_token().await
    }

    async fn list_scale_set_vms(
        &self,
        token: &str,
        resource_group: &str,
        vmss_name: &str,
    ) -> Result<Vec<ScaleSetVm>> {
        let mut url = format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachineScaleSets/{}/virtualMachines?api-version={}",
            ARM_ENDPOINT,
            urlencoding::encode(&self.subscription_id),
            urlencoding::encode(resource_group),
            urlencoding::encode(vmss_name),
            COMPUTE_API_VERSION
        );

        let mut vms = Vec::new();
        loop {
            let page: ListResponse<ScaleSetVm> = self.get_json(&url, token).await?;
            vms.extend(page.value);

            match page.next_link {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }

        Ok(vms)
    }

    async fn get_network_interface(&self, token: &str, nic_id: &str) -> Result<NetworkInterface> {
        let url = format!(
            "{}{}?api-version={}",
            ARM_ENDPOINT, nic_id, NETWORK_API_VERSION
        );

        self.get_json(&url, token).await
    }
}

/// Azure VM Scale Set provider
pub struct AzureProvider {
    api: Box<dyn ScaleSetApi>,
    settings: Arc<Settings>,
}

impl AzureProvider {
    pub fn new(settings: Arc<Settings>) -> Result<Self> {
        let api = AzureApiClient::new(&settings.subscription_id)?;
        Ok(Self::with_api(Box::new(api), settings))
    }

    pub fn with_api(api: Box<dyn ScaleSetApi>, settings: Arc<Settings>) -> Self {
        Self { api, settings }
    }
}

#[async_trait]
impl InstanceEnumerator for AzureProvider {
    fn environment(&self) -> CloudEnvironment {
        CloudEnvironment::Azure
    }

    async fn discover_targets(&self) -> Result<Vec<Target>> {
        let token = self
            .api
            .authenticate()
            .await
            .context("Failed to acquire Azure access token")?;

        let vms = self
            .api
            .list_scale_set_vms(&token, &self.settings.resource_group, &self.settings.vmss_name)
            .await
            .with_context(|| format!("Failed to list scale set {}", self.settings.vmss_name))?;

        let device_index = self.settings.device_index;
        let mut targets = Vec::new();

        for vm in &vms {
            let Some(nic_id) = vm.network_interface_id(device_index) else {
                debug!(vm = %vm.label(), device_index, "No network interface at index, skipping");
                continue;
            };

            let nic = match self.api.get_network_interface(&token, nic_id).await {
                Ok(nic) => nic,
                Err(e) => {
                    warn!(
                        vm = %vm.label(),
                        nic = %nic_id,
                        error = %format!("{:#}", e),
                        "Failed to resolve network interface, skipping"
                    );
                    continue;
                }
            };

            match nic.private_ip_address() {
                Some(ip) => targets.push(Target::from_settings(ip, &self.settings)),
                None => debug!(vm = %vm.label(), "No private IP on network interface, skipping"),
            }
        }

        Ok(targets)
    }
}
