//! Kubernetes resource builders for project instances
//!
//! Every builder returns a freshly constructed object derived from the
//! instance record, the driver options and, for the workload, the
//! credentials minted for this provisioning pass. Nothing here talks to the
//! cluster; [`DesiredResourceSet`] bundles the builders' output in
//! provisioning order for the lifecycle code to converge.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, HTTPGetAction, LocalObjectReference,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, Pod,
    PodSecurityContext, PodSpec, PodTemplateSpec, Probe, ResourceRequirements, SecurityContext,
    Service, ServicePort, ServiceSpec, Toleration, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{debug, warn};
use url::Url;

use crate::config::{CustomHostnameOptions, DriverOptions};
use crate::controller::annotations::{render_all, RouteContext};
use crate::controller::platform::ManagedObject;
use crate::controller::store::AuthTokens;
use crate::error::{Error, Result};
use crate::model::{BrokerAgent, Instance, ResourceTier};

/// Editor port served by the instance runtime
pub const WEB_PORT: i32 = 1880;
/// Launcher management API port
pub const LAUNCHER_PORT: i32 = 2880;
/// Broker agent HTTP API port
pub const AGENT_PORT: i32 = 3500;

pub const CONTAINER_NAME: &str = "node-red";
pub const AGENT_CONTAINER_NAME: &str = "mqtt-schema-agent";

const CERT_MANAGER_PREFIX: &str = "cert-manager.io/";
const CLUSTER_ISSUER_ANNOTATION: &str = "cert-manager.io/cluster-issuer";
const PRIVATE_CA_MOUNT: &str = "/usr/local/ssl-certs";
const STORAGE_MOUNT: &str = "/data/storage";
const TIMEZONE: &str = "Europe/London";

// ============================================================================
// Instance URL
// ============================================================================

/// Externally reachable URL for an instance
///
/// A recorded http(s) URL keeps its scheme, host and port and drops any
/// path. Otherwise the URL is `{base scheme}://{safeName}.{domain}`.
pub fn instance_url(instance: &Instance, options: &DriverOptions) -> Result<String> {
    match instance.url.as_deref().filter(|u| u.starts_with("http")) {
        Some(existing) => {
            let url = Url::parse(existing).map_err(|e| Error::InvalidInstance {
                id: instance.id.clone(),
                reason: format!("url {existing:?}: {e}"),
            })?;
            Ok(origin(&url))
        }
        None => {
            let base = Url::parse(&options.base_url)
                .map_err(|e| Error::ConfigError(format!("baseUrl: {e}")))?;
            Ok(format!(
                "{}://{}.{}",
                base.scheme(),
                instance.safe_name(),
                options.domain
            ))
        }
    }
}

fn origin(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}

fn parse_url(instance: &Instance, url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| Error::InvalidInstance {
        id: instance.id.clone(),
        reason: format!("url {url:?}: {e}"),
    })
}

// ============================================================================
// Desired resource set
// ============================================================================

/// Everything an instance is made of, in provisioning order
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredResourceSet {
    pub url: String,
    pub volume: Option<PersistentVolumeClaim>,
    pub workload: Deployment,
    pub endpoint: Service,
    pub route: Ingress,
    pub custom_route: Option<Ingress>,
}

impl DesiredResourceSet {
    pub fn build(instance: &Instance, options: &DriverOptions, tokens: &AuthTokens) -> Result<Self> {
        let url = instance_url(instance, options)?;
        let parsed = parse_url(instance, &url)?;

        let volume = options
            .storage
            .enabled
            .then(|| build_volume(instance, options));

        let custom_route = match (
            options.custom_hostname(),
            instance.settings.custom_hostname.as_deref(),
        ) {
            (Some(custom), Some(hostname)) if !hostname.is_empty() => Some(build_custom_route(
                instance, options, custom, hostname, &parsed,
            )?),
            _ => None,
        };

        Ok(Self {
            workload: build_workload(instance, options, tokens, &url),
            endpoint: build_endpoint(instance, options),
            route: build_route(instance, options, &parsed),
            volume,
            custom_route,
            url,
        })
    }

    /// Objects in the order they are created
    pub fn objects(&self) -> Vec<ManagedObject> {
        let mut objects = Vec::with_capacity(5);
        if let Some(volume) = &self.volume {
            objects.push(ManagedObject::PersistentVolumeClaim(volume.clone()));
        }
        objects.push(ManagedObject::Deployment(self.workload.clone()));
        objects.push(ManagedObject::Service(self.endpoint.clone()));
        objects.push(ManagedObject::Ingress(self.route.clone()));
        if let Some(custom) = &self.custom_route {
            objects.push(ManagedObject::Ingress(custom.clone()));
        }
        objects
    }

    /// Multi-document YAML rendering
    pub fn to_yaml(&self) -> Result<String> {
        let mut out = String::new();
        for object in self.objects() {
            out.push_str("---\n");
            out.push_str(&serde_yaml::to_string(&object)?);
        }
        Ok(out)
    }
}

// ============================================================================
// Labels
// ============================================================================

fn with_project_labels(
    mut labels: BTreeMap<String, String>,
    options: &DriverOptions,
) -> BTreeMap<String, String> {
    if let Some(extra) = &options.project_labels {
        labels.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    labels
}

fn workload_labels(instance: &Instance, options: &DriverOptions) -> BTreeMap<String, String> {
    let labels = BTreeMap::from([
        ("nodered".to_string(), "true".to_string()),
        ("name".to_string(), instance.safe_name()),
        ("app".to_string(), instance.id.clone()),
    ]);
    with_project_labels(labels, options)
}

// ============================================================================
// Workload
// ============================================================================

/// Build the Deployment running the instance
pub fn build_workload(
    instance: &Instance,
    options: &DriverOptions,
    tokens: &AuthTokens,
    url: &str,
) -> Deployment {
    let labels = workload_labels(instance, options);
    let replicas = instance
        .settings
        .ha
        .as_ref()
        .map(|ha| ha.replicas)
        .filter(|r| *r > 1)
        .unwrap_or(1);

    Deployment {
        metadata: ObjectMeta {
            name: Some(instance.safe_name()),
            namespace: Some(options.namespace().to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    instance.id.clone(),
                )])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(build_pod_spec(instance, options, tokens, url)),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn build_pod_spec(
    instance: &Instance,
    options: &DriverOptions,
    tokens: &AuthTokens,
    url: &str,
) -> PodSpec {
    let mut container = build_container(instance, options, tokens, url);
    let mut volumes = Vec::new();

    if let Some(ca) = &options.private_ca {
        volumes.push(Volume {
            name: "cacert".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(ca.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: "cacert".to_string(),
                mount_path: PRIVATE_CA_MOUNT.to_string(),
                read_only: Some(true),
                ..Default::default()
            });
        container
            .env
            .get_or_insert_with(Vec::new)
            .push(env_var(
                "NODE_EXTRA_CA_CERTS",
                format!("{PRIVATE_CA_MOUNT}/chain.pem"),
            ));
    }

    if options.storage.enabled {
        volumes.push(Volume {
            name: "persistence".to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: instance.volume_name(),
                ..Default::default()
            }),
            ..Default::default()
        });
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: "persistence".to_string(),
                mount_path: STORAGE_MOUNT.to_string(),
                ..Default::default()
            });
    }

    let security_context = match &options.pod_security_context {
        Some(custom) => {
            debug!("Using custom PodSecurityContext");
            custom.clone()
        }
        None if options.strips_security_contexts() => {
            debug!("OpenShift, removing PodSecurityContext");
            PodSecurityContext::default()
        }
        None => PodSecurityContext {
            run_as_user: Some(1000),
            run_as_group: Some(1000),
            fs_group: Some(1000),
            ..Default::default()
        },
    };

    let image_pull_secrets = (!options.registry_secrets.is_empty()).then(|| {
        options
            .registry_secrets
            .iter()
            .map(|name| LocalObjectReference {
                name: Some(name.clone()),
            })
            .collect()
    });

    PodSpec {
        containers: vec![container],
        volumes: (!volumes.is_empty()).then_some(volumes),
        security_context: Some(security_context),
        tolerations: tolerations(options),
        node_selector: options.project_selector.clone(),
        image_pull_secrets,
        service_account_name: options.env.editor_service_account.clone(),
        scheduler_name: options.scheduler_name.clone(),
        enable_service_links: Some(false),
        ..Default::default()
    }
}

fn tolerations(options: &DriverOptions) -> Option<Vec<Toleration>> {
    match options.env.tolerations() {
        Ok(tolerations) => tolerations,
        Err(e) => {
            warn!("Ignoring tolerations override: {}", e);
            None
        }
    }
}

fn build_container(
    instance: &Instance,
    options: &DriverOptions,
    tokens: &AuthTokens,
    url: &str,
) -> Container {
    let image = instance
        .tier
        .container
        .clone()
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| options.default_image());

    let security_context = match &options.container_security_context {
        Some(custom) => custom.clone(),
        None if options.strips_security_contexts() => SecurityContext::default(),
        None => SecurityContext {
            allow_privilege_escalation: Some(false),
            ..Default::default()
        },
    };

    let probes = &options.project_probes;

    Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(image),
        image_pull_policy: Some("Always".to_string()),
        env: Some(instance_env(instance, options, tokens, url)),
        ports: Some(vec![
            container_port("web", WEB_PORT),
            container_port("management", LAUNCHER_PORT),
        ]),
        resources: Some(tier_resources(&instance.tier)),
        security_context: Some(security_context),
        startup_probe: Some(
            probes
                .startup_probe
                .clone()
                .unwrap_or_else(default_startup_probe),
        ),
        liveness_probe: probes.liveness_probe.clone(),
        readiness_probe: probes.readiness_probe.clone(),
        ..Default::default()
    }
}

fn instance_env(
    instance: &Instance,
    options: &DriverOptions,
    tokens: &AuthTokens,
    url: &str,
) -> Vec<EnvVar> {
    let mut env = vec![
        env_var("TZ", TIMEZONE),
        env_var("FORGE_CLIENT_ID", &tokens.client_id),
        env_var("FORGE_CLIENT_SECRET", &tokens.client_secret),
        env_var("FORGE_URL", &options.api_url),
        env_var("BASE_URL", url),
        env_var("FORGE_TEAM_ID", &instance.team_id),
        env_var("FORGE_PROJECT_ID", &instance.id),
        env_var("FORGE_PROJECT_TOKEN", &tokens.token),
        // Inbound TCP/UDP listeners are disabled on shared clusters
        env_var("FORGE_NR_NO_TCP_IN", "true"),
        env_var("FORGE_NR_NO_UDP_IN", "true"),
    ];
    if let Some(broker) = &tokens.broker {
        env.push(env_var("FORGE_BROKER_URL", &broker.url));
        env.push(env_var("FORGE_BROKER_USERNAME", &broker.username));
        env.push(env_var("FORGE_BROKER_PASSWORD", &broker.password));
    }
    if options.licensed {
        env.push(env_var("FORGE_LICENSE_TYPE", "ee"));
    }
    if let Some(memory) = instance.tier.memory.filter(|m| *m > 0) {
        env.push(env_var("FORGE_MEMORY_LIMIT", memory.to_string()));
    }
    if let Some(cpu) = instance.tier.cpu.filter(|c| *c > 0) {
        env.push(env_var("FORGE_CPU_LIMIT", cpu.to_string()));
    }
    if let Some(secret) = instance
        .settings
        .credential_secret
        .as_deref()
        .filter(|s| !s.is_empty())
    {
        env.push(env_var("FORGE_NR_SECRET", secret));
    }
    if options.log_passthrough {
        env.push(env_var("FORGE_LOG_PASSTHROUGH", "true"));
    }
    env
}

/// Requests and limits for a tier
///
/// CPU is given in 1/100th of a core and maps to `cpu * 10` millicores.
/// The memory limit gets 128Mi of headroom over the request for npm.
/// Tiers missing either value fall back to the platform defaults.
pub fn tier_resources(tier: &ResourceTier) -> ResourceRequirements {
    let (request_cpu, limit_cpu, request_memory, limit_memory) = match (
        tier.cpu.filter(|c| *c > 0),
        tier.memory.filter(|m| *m > 0),
    ) {
        (Some(cpu), Some(memory)) => (
            format!("{}m", cpu * 10),
            format!("{}m", cpu * 10),
            format!("{memory}Mi"),
            format!("{}Mi", memory + 128),
        ),
        _ => (
            "100m".to_string(),
            "125m".to_string(),
            "128Mi".to_string(),
            "192Mi".to_string(),
        ),
    };

    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(request_cpu)),
            ("memory".to_string(), Quantity(request_memory)),
        ])),
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(limit_cpu)),
            ("memory".to_string(), Quantity(limit_memory)),
        ])),
        ..Default::default()
    }
}

fn default_startup_probe() -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/flowforge/ready".to_string()),
            port: IntOrString::String("management".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(2),
        success_threshold: Some(1),
        failure_threshold: Some(450),
        ..Default::default()
    }
}

fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Build the Service fronting the instance
pub fn build_endpoint(instance: &Instance, options: &DriverOptions) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(instance.service_name()),
            namespace: Some(options.namespace().to_string()),
            labels: options.project_labels.clone(),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(options.service.service_type.clone()),
            selector: Some(BTreeMap::from([(
                "name".to_string(),
                instance.safe_name(),
            )])),
            ports: Some(vec![
                service_port("web", WEB_PORT),
                service_port("management", LAUNCHER_PORT),
            ]),
            ..Default::default()
        }),
        status: None,
    }
}

// ============================================================================
// Routes
// ============================================================================

/// Whether routes built with this issuer and annotation set request TLS
///
/// Also decides whether a route's TLS secret is cleaned up on teardown.
pub fn route_uses_tls(issuer: Option<&str>, annotations: Option<&BTreeMap<String, String>>) -> bool {
    issuer.is_some() || annotations.is_some_and(has_cert_manager_key)
}

fn has_cert_manager_key(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .keys()
        .any(|key| key.starts_with(CERT_MANAGER_PREFIX))
}

/// Merge operator annotations according to the TLS rules; returns whether
/// the route gets a TLS section
///
/// With an issuer, the cluster-issuer annotation is set and operator
/// annotations are merged except cert-manager ones. Without one, all
/// operator annotations are merged and TLS is on when any of them is a
/// cert-manager annotation.
fn apply_tls_annotations(
    annotations: &mut BTreeMap<String, String>,
    issuer: Option<&str>,
    operator: Option<&BTreeMap<String, String>>,
) -> bool {
    match (issuer, operator) {
        (Some(issuer), operator) => {
            annotations.insert(CLUSTER_ISSUER_ANNOTATION.to_string(), issuer.to_string());
            for (key, value) in operator.into_iter().flatten() {
                if !key.starts_with(CERT_MANAGER_PREFIX) {
                    annotations.insert(key.clone(), value.clone());
                }
            }
            true
        }
        (None, Some(operator)) => {
            annotations.extend(operator.iter().map(|(k, v)| (k.clone(), v.clone())));
            has_cert_manager_key(operator)
        }
        (None, None) => false,
    }
}

fn ingress_rule(host: &str, service_name: &str) -> IngressRule {
    IngressRule {
        host: Some(host.to_string()),
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath {
                path: Some("/".to_string()),
                path_type: "Prefix".to_string(),
                backend: IngressBackend {
                    service: Some(IngressServiceBackend {
                        name: service_name.to_string(),
                        port: Some(ServiceBackendPort {
                            number: Some(WEB_PORT),
                            name: None,
                        }),
                    }),
                    ..Default::default()
                },
            }],
        }),
    }
}

/// Build the primary Ingress for the instance
pub fn build_route(instance: &Instance, options: &DriverOptions, url: &Url) -> Ingress {
    let service_name = instance.service_name();
    let ctx = RouteContext::new(&service_name, url);

    let mut annotations = options.env.base_ingress_annotations().unwrap_or_else(|e| {
        warn!("Ignoring ingress annotations override: {}", e);
        BTreeMap::new()
    });
    let tls = apply_tls_annotations(
        &mut annotations,
        options.cert_manager_issuer.as_deref(),
        options.project_ingress_annotations.as_ref(),
    );
    render_all(&mut annotations, &ctx);

    let name = instance.route_name();
    Ingress {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(options.namespace().to_string()),
            labels: options.project_labels.clone(),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: options.env.ingress_class_name.clone(),
            rules: Some(vec![ingress_rule(&ctx.instance_host, &service_name)]),
            tls: tls.then(|| {
                vec![IngressTLS {
                    hosts: Some(vec![ctx.instance_host.clone()]),
                    secret_name: Some(name),
                }]
            }),
            ..Default::default()
        }),
        status: None,
    }
}

/// Build the Ingress serving the instance on a user-supplied hostname
pub fn build_custom_route(
    instance: &Instance,
    options: &DriverOptions,
    custom: &CustomHostnameOptions,
    hostname: &str,
    url: &Url,
) -> Result<Ingress> {
    let service_name = instance.service_name();
    let mut custom_url = url.clone();
    custom_url
        .set_host(Some(hostname))
        .map_err(|e| Error::InvalidInstance {
            id: instance.id.clone(),
            reason: format!("custom hostname {hostname:?}: {e}"),
        })?;
    let ctx = RouteContext::new(&service_name, &custom_url);

    let mut annotations = BTreeMap::new();
    let tls = apply_tls_annotations(
        &mut annotations,
        custom.cert_manager_issuer.as_deref(),
        custom.ingress_annotations.as_ref(),
    );
    render_all(&mut annotations, &ctx);

    let name = instance.custom_route_name();
    Ok(Ingress {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(options.namespace().to_string()),
            labels: options.project_labels.clone(),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: custom.ingress_class.clone(),
            rules: Some(vec![ingress_rule(hostname, &service_name)]),
            tls: tls.then(|| {
                vec![IngressTLS {
                    hosts: Some(vec![hostname.to_string()]),
                    secret_name: Some(name),
                }]
            }),
            ..Default::default()
        }),
        status: None,
    })
}

// ============================================================================
// PersistentVolumeClaim
// ============================================================================

/// Build the shared storage claim for the instance
pub fn build_volume(instance: &Instance, options: &DriverOptions) -> PersistentVolumeClaim {
    let labels = BTreeMap::from([
        ("ff-project-id".to_string(), instance.id.clone()),
        ("ff-project-name".to_string(), instance.safe_name()),
    ]);

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(instance.volume_name()),
            namespace: Some(options.namespace().to_string()),
            labels: Some(with_project_labels(labels, options)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            // ReadWriteMany so HA replicas can share it
            access_modes: Some(vec!["ReadWriteMany".to_string()]),
            storage_class_name: options.storage.storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: options.storage.size.as_ref().map(|size| {
                    BTreeMap::from([("storage".to_string(), Quantity(size.clone()))])
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

// ============================================================================
// Broker agent
// ============================================================================

fn agent_labels(agent: &BrokerAgent, options: &DriverOptions) -> BTreeMap<String, String> {
    let labels = BTreeMap::from([
        ("team".to_string(), agent.team_id.clone()),
        ("broker".to_string(), agent.broker.token().to_string()),
    ]);
    with_project_labels(labels, options)
}

/// Build the schema agent Pod for a broker
pub fn build_agent_pod(agent: &BrokerAgent, options: &DriverOptions, token: &str) -> Pod {
    let name = agent.object_name();
    let mut labels = agent_labels(agent, options);
    labels.insert("name".to_string(), name.clone());

    let mut env = vec![
        env_var("TZ", TIMEZONE),
        env_var("FORGE_TEAM_TOKEN", token),
        env_var("FORGE_URL", &options.api_url),
        env_var("FORGE_BROKER_ID", agent.broker.token()),
        env_var("FORGE_TEAM_ID", &agent.team_id),
    ];
    if agent.broker.is_team_default() {
        env.push(env_var("FORGE_TIMEOUT", "24"));
    }

    let quota = BTreeMap::from([
        ("cpu".to_string(), Quantity("100m".to_string())),
        ("memory".to_string(), Quantity("128Mi".to_string())),
    ]);

    Pod {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(options.namespace().to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: AGENT_CONTAINER_NAME.to_string(),
                image: Some(options.agent_image()),
                image_pull_policy: Some("Always".to_string()),
                security_context: Some(SecurityContext {
                    allow_privilege_escalation: Some(false),
                    ..Default::default()
                }),
                env: Some(env),
                ports: Some(vec![container_port("web", AGENT_PORT)]),
                resources: Some(ResourceRequirements {
                    requests: Some(quota.clone()),
                    limits: Some(quota),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            node_selector: options.project_selector.clone(),
            scheduler_name: options.scheduler_name.clone(),
            enable_service_links: Some(false),
            ..Default::default()
        }),
        status: None,
    }
}

/// Build the Service exposing a broker's schema agent
pub fn build_agent_service(agent: &BrokerAgent, options: &DriverOptions) -> Service {
    let name = agent.object_name();
    Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(options.namespace().to_string()),
            labels: Some(agent_labels(agent, options)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(BTreeMap::from([("name".to_string(), name)])),
            ports: Some(vec![service_port("web", AGENT_PORT)]),
            ..Default::default()
        }),
        status: None,
    }
}
