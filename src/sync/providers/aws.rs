//! AWS Auto Scaling Group enumerator
//!
//! Lists the in-service members of the configured ASG and resolves each to
//! the private IP of the network interface attached at the configured
//! device index. Calls go straight to the AWS Query APIs, signed with
//! SigV4; responses are XML.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::InstanceEnumerator;
use crate::config::Settings;
use crate::sync::detector::{aws_metadata_token, metadata_client, METADATA_BASE_URL};
use crate::sync::sigv4::{sign_query, AwsCredentials};
use crate::sync::types::{CloudEnvironment, Target};

const AUTOSCALING_API_VERSION: &str = "2011-01-01";
const EC2_API_VERSION: &str = "2016-11-15";
const IN_SERVICE: &str = "InService";

/// A member of an Auto Scaling Group
#[derive(Debug, Clone, Deserialize)]
pub struct GroupInstance {
    #[serde(rename = "InstanceId")]
    pub instance_id: String,
    #[serde(rename = "LifecycleState")]
    pub lifecycle_state: String,
}

/// An EC2 instance with its attached network interfaces
#[derive(Debug, Clone, Deserialize)]
pub struct Ec2Instance {
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    #[serde(rename = "networkInterfaceSet", default)]
    pub network_interfaces: ItemSet<NetworkInterface>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInterface {
    #[serde(rename = "privateIpAddress")]
    pub private_ip_address: Option<String>,
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    #[serde(rename = "deviceIndex")]
    pub device_index: usize,
}

impl Ec2Instance {
    /// Private IP of the interface attached at `device_index`
    pub fn private_ip_at(&self, device_index: usize) -> Option<&str> {
        self.network_interfaces
            .items
            .iter()
            .find(|nic| {
                nic.attachment
                    .as_ref()
                    .is_some_and(|a| a.device_index == device_index)
            })
            .and_then(|nic| nic.private_ip_address.as_deref())
            .filter(|ip| !ip.is_empty())
    }
}

/// `<member>` list used by the Auto Scaling API
#[derive(Debug, Clone, Deserialize)]
pub struct MemberList<T> {
    #[serde(rename = "member", default = "Vec::new")]
    pub members: Vec<T>,
}

impl<T> Default for MemberList<T> {
    fn default() -> Self {
        Self { members: Vec::new() }
    }
}

/// `<item>` list used by the EC2 API
#[derive(Debug, Clone, Deserialize)]
pub struct ItemSet<T> {
    #[serde(rename = "item", default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
struct DescribeAutoScalingGroupsResponse {
    #[serde(rename = "DescribeAutoScalingGroupsResult")]
    result: DescribeAutoScalingGroupsResult,
}

#[derive(Debug, Deserialize)]
struct DescribeAutoScalingGroupsResult {
    #[serde(rename = "AutoScalingGroups", default)]
    groups: MemberList<AutoScalingGroup>,
}

#[derive(Debug, Deserialize)]
struct AutoScalingGroup {
    #[serde(rename = "Instances", default)]
    instances: MemberList<GroupInstance>,
}

#[derive(Debug, Deserialize)]
struct DescribeInstancesResponse {
    #[serde(rename = "reservationSet", default)]
    reservations: ItemSet<Reservation>,
}

#[derive(Debug, Deserialize)]
struct Reservation {
    #[serde(rename = "instancesSet", default)]
    instances: ItemSet<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
struct InstanceProfileCredentials {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    secret_access_key: String,
    #[serde(rename = "Token")]
    token: String,
}

/// The two AWS calls the enumerator needs, signed with credentials
/// resolved once per cycle
#[async_trait]
pub trait AutoScalingApi: Send + Sync {
    async fn credentials(&self) -> Result<AwsCredentials>;

    /// Members of the named group, in any lifecycle state
    async fn describe_group_instances(
        &self,
        credentials: &AwsCredentials,
        group_name: &str,
    ) -> Result<Vec<GroupInstance>>;

    /// Instance details for the given IDs
    async fn describe_instances(
        &self,
        credentials: &AwsCredentials,
        instance_ids: &[String],
    ) -> Result<Vec<Ec2Instance>>;
}

/// SigV4-signed client for the Auto Scaling and EC2 Query APIs
pub struct AwsApiClient {
    http_client: Client,
    metadata_client: Client,
    metadata_base_url: String,
    region: String,
}

impl AwsApiClient {
    pub fn new(region: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            metadata_client: metadata_client()?,
            metadata_base_url: METADATA_BASE_URL.to_string(),
            region: region.to_string(),
        })
    }

    /// Resolve credentials: environment first, then the instance profile.
    async fn resolve_credentials(&self) -> Result<AwsCredentials> {
        if let (Ok(access_key_id), Ok(secret_access_key)) = (
            env::var("AWS_ACCESS_KEY_ID"),
            env::var("AWS_SECRET_ACCESS_KEY"),
        ) {
            debug!("Using AWS credentials from environment");
            return Ok(AwsCredentials {
                access_key_id,
                secret_access_key,
                session_token: env::var("AWS_SESSION_TOKEN").ok().filter(|t| !t.is_empty()),
            });
        }

        self.instance_profile_credentials()
            .await
            .context("No AWS credentials in environment and instance profile lookup failed")
    }

    async fn instance_profile_credentials(&self) -> Result<AwsCredentials> {
        let token = aws_metadata_token(&self.metadata_client, &self.metadata_base_url).await?;
        let base = format!(
            "{}/latest/meta-data/iam/security-credentials/",
            self.metadata_base_url
        );

        let roles = self
            .metadata_client
            .get(&base)
            .header("X-aws-ec2-metadata-token", &token)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let role = roles
            .lines()
            .next()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .context("No IAM role attached to this instance")?;

        let creds: InstanceProfileCredentials = self
            .metadata_client
            .get(format!("{}{}", base, role))
            .header("X-aws-ec2-metadata-token", &token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse instance profile credentials")?;

        debug!(role = %role, "Using AWS credentials from instance profile");

        Ok(AwsCredentials {
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: Some(creds.token),
        })
    }

    /// Issue a signed Query API call and decode its XML response
    async fn query<T: DeserializeOwned>(
        &self,
        credentials: &AwsCredentials,
        service: &str,
        params: Vec<(String, String)>,
    ) -> Result<T> {
        let host = format!("{}.{}.amazonaws.com", service, self.region);
        let signed = sign_query(
            credentials,
            &self.region,
            service,
            &host,
            &params,
            chrono::Utc::now(),
        );

        let mut request = self
            .http_client
            .get(format!("https://{}/?{}", host, signed.query));
        for (name, value) in signed.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to call AWS {}", service))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            anyhow::bail!("AWS {} returned {}: {}", service, status, body);
        }

        quick_xml::de::from_str(&body)
            .with_context(|| format!("Failed to parse AWS {} XML response", service))
    }
}

#[async_trait]
impl AutoScalingApi for AwsApiClient {
    async fn credentials(&self) -> Result<AwsCredentials> {
        self.resolve_credentials().await
    }

    async fn describe_group_instances(
        &self,
        credentials: &AwsCredentials,
        group_name: &str,
    ) -> Result<Vec<GroupInstance>> {
        let params = vec![
            ("Action".to_string(), "DescribeAutoScalingGroups".to_string()),
            ("Version".to_string(), AUTOSCALING_API_VERSION.to_string()),
            (
                "AutoScalingGroupNames.member.1".to_string(),
                group_name.to_string(),
            ),
        ];

        let response: DescribeAutoScalingGroupsResponse =
            self.query(credentials, "autoscaling", params).await?;
        parse_group_instances(response, group_name)
    }

    async fn describe_instances(
        &self,
        credentials: &AwsCredentials,
        instance_ids: &[String],
    ) -> Result<Vec<Ec2Instance>> {
        let mut params = vec![
            ("Action".to_string(), "DescribeInstances".to_string()),
            ("Version".to_string(), EC2_API_VERSION.to_string()),
        ];
        params.extend(
            instance_ids
                .iter()
                .enumerate()
                .map(|(i, id)| (format!("InstanceId.{}", i + 1), id.clone())),
        );

        let response: DescribeInstancesResponse = self.query(credentials, "ec2", params).await?;
        Ok(flatten_reservations(response))
    }
}

fn parse_group_instances(
    response: DescribeAutoScalingGroupsResponse,
    group_name: &str,
) -> Result<Vec<GroupInstance>> {
    let group = response
        .result
        .groups
        .members
        .into_iter()
        .next()
        .with_context(|| format!("Auto Scaling Group {} not found", group_name))?;

    Ok(group.instances.members)
}

fn flatten_reservations(response: DescribeInstancesResponse) -> Vec<Ec2Instance> {
    response
        .reservations
        .items
        .into_iter()
        .flat_map(|r| r.instances.items)
        .collect()
}

/// AWS Auto Scaling Group provider
pub struct AwsProvider {
    api: Box<dyn AutoScalingApi>,
    settings: Arc<Settings>,
}

impl AwsProvider {
    pub fn new(settings: Arc<Settings>) -> Result<Self> {
        let api = AwsApiClient::new(&settings.aws_region)?;
        Ok(Self::with_api(Box::new(api), settings))
    }

    pub fn with_api(api: Box<dyn AutoScalingApi>, settings: Arc<Settings>) -> Self {
        Self { api, settings }
    }
}

#[async_trait]
impl InstanceEnumerator for AwsProvider {
    fn environment(&self) -> CloudEnvironment {
        CloudEnvironment::Aws
    }

    async fn discover_targets(&self) -> Result<Vec<Target>> {
        let asg_name = &self.settings.asg_name;

        let credentials = self
            .api
            .credentials()
            .await
            .context("Failed to resolve AWS credentials")?;

        let members = self
            .api
            .describe_group_instances(&credentials, asg_name)
            .await
            .with_context(|| format!("Failed to describe Auto Scaling Group {}", asg_name))?;

        let instance_ids: Vec<String> = members
            .into_iter()
            .filter(|m| m.lifecycle_state == IN_SERVICE)
            .map(|m| m.instance_id)
            .collect();

        if instance_ids.is_empty() {
            info!(asg = %asg_name, "No in-service instances in Auto Scaling Group");
            return Ok(Vec::new());
        }

        let instances = self
            .api
            .describe_instances(&credentials, &instance_ids)
            .await
            .context("Failed to describe instances")?;

        let device_index = self.settings.device_index;
        let targets = instances
            .iter()
            .filter_map(|instance| {
                let ip = instance.private_ip_at(device_index);
                if ip.is_none() {
                    debug!(
                        instance_id = %instance.instance_id,
                        device_index,
                        "Instance has no private IP at device index, skipping"
                    );
                }
                ip
            })
            .map(|ip| Target::from_settings(ip, &self.settings))
            .collect();

        Ok(targets)
    }
}
