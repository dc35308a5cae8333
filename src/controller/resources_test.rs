//! Unit tests for Kubernetes resource builders.
//!
//! Run with: `cargo test -p flowforge-k8s resources_test`

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::{Container, EnvVar, PodSecurityContext};
    use k8s_openapi::api::networking::v1::Ingress;
    use url::Url;

    use crate::config::{CustomHostnameOptions, DriverOptions, EnvOverrides};
    use crate::controller::resources::*;
    use crate::controller::testing::{fixed_tokens, sample_instance, test_options};
    use crate::model::{BrokerAgent, BrokerRef, HaSettings, Instance, ResourceTier};

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn container(deployment: &Deployment) -> &Container {
        &deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers[0]
    }

    fn env_value<'a>(env: &'a [EnvVar], name: &str) -> Option<&'a str> {
        env.iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    fn quantity(map: &Option<BTreeMap<String, k8s_openapi::apimachinery::pkg::api::resource::Quantity>>, key: &str) -> String {
        map.as_ref().unwrap()[key].0.clone()
    }

    fn rule_host(ingress: &Ingress) -> &str {
        ingress.spec.as_ref().unwrap().rules.as_ref().unwrap()[0]
            .host
            .as_deref()
            .unwrap()
    }

    fn backend_name(ingress: &Ingress) -> &str {
        &ingress.spec.as_ref().unwrap().rules.as_ref().unwrap()[0]
            .http
            .as_ref()
            .unwrap()
            .paths[0]
            .backend
            .service
            .as_ref()
            .unwrap()
            .name
    }

    fn proj1() -> Instance {
        let mut instance = sample_instance("i1", "proj1");
        instance.tier = ResourceTier {
            cpu: Some(10),
            memory: Some(256),
            container: None,
        };
        instance
    }

    // -----------------------------------------------------------------------
    // Instance URL
    // -----------------------------------------------------------------------

    #[test]
    fn test_new_instance_url_uses_base_scheme_and_domain() {
        let url = instance_url(&proj1(), &test_options()).unwrap();
        assert_eq!(url, "https://proj1.example.com");
    }

    #[test]
    fn test_recorded_url_drops_path_and_keeps_port() {
        let mut instance = proj1();
        instance.url = Some("http://proj1.internal:8443/some/path?q=1".to_string());
        let url = instance_url(&instance, &test_options()).unwrap();
        assert_eq!(url, "http://proj1.internal:8443");
    }

    #[test]
    fn test_non_http_url_is_regenerated() {
        let mut instance = proj1();
        instance.url = Some(String::new());
        let url = instance_url(&instance, &test_options()).unwrap();
        assert_eq!(url, "https://proj1.example.com");
    }

    // -----------------------------------------------------------------------
    // Workload
    // -----------------------------------------------------------------------

    #[test]
    fn test_proj1_tier_resources() {
        let set = DesiredResourceSet::build(&proj1(), &test_options(), &fixed_tokens()).unwrap();
        let resources = container(&set.workload).resources.as_ref().unwrap();

        assert_eq!(quantity(&resources.requests, "memory"), "256Mi");
        assert_eq!(quantity(&resources.limits, "memory"), "384Mi");
        assert_eq!(quantity(&resources.requests, "cpu"), "100m");
        assert_eq!(quantity(&resources.limits, "cpu"), "100m");
    }

    #[test]
    fn test_incomplete_tier_keeps_default_resources() {
        let tier = ResourceTier {
            cpu: Some(50),
            memory: None,
            container: None,
        };
        let resources = tier_resources(&tier);
        assert_eq!(quantity(&resources.requests, "cpu"), "100m");
        assert_eq!(quantity(&resources.limits, "cpu"), "125m");
        assert_eq!(quantity(&resources.requests, "memory"), "128Mi");
        assert_eq!(quantity(&resources.limits, "memory"), "192Mi");
    }

    #[test]
    fn test_workload_identity_and_defaults() {
        let options = test_options();
        let set = DesiredResourceSet::build(&proj1(), &options, &fixed_tokens()).unwrap();
        let workload = &set.workload;

        assert_eq!(workload.metadata.name.as_deref(), Some("proj1"));
        assert_eq!(workload.metadata.namespace.as_deref(), Some("flowforge"));
        let labels = workload.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["name"], "proj1");
        assert_eq!(labels["app"], "i1");
        assert_eq!(labels["nodered"], "true");

        let spec = workload.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(
            spec.selector.match_labels.as_ref().unwrap()["app"],
            "i1"
        );

        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.enable_service_links, Some(false));
        let security = pod.security_context.as_ref().unwrap();
        assert_eq!(security.run_as_user, Some(1000));
        assert_eq!(security.fs_group, Some(1000));

        let c = container(workload);
        assert_eq!(c.name, "node-red");
        assert_eq!(c.image.as_deref(), Some("registry.example.com/flowforge/node-red"));
        let ports: Vec<i32> = c.ports.as_ref().unwrap().iter().map(|p| p.container_port).collect();
        assert_eq!(ports, vec![1880, 2880]);
        let probe = c.startup_probe.as_ref().unwrap();
        assert_eq!(probe.failure_threshold, Some(450));
        assert_eq!(
            probe.http_get.as_ref().unwrap().path.as_deref(),
            Some("/flowforge/ready")
        );
    }

    #[test]
    fn test_workload_env() {
        let mut instance = proj1();
        instance.settings.credential_secret = Some("nr-secret".to_string());
        let mut options = test_options();
        options.licensed = true;
        options.log_passthrough = true;

        let set = DesiredResourceSet::build(&instance, &options, &fixed_tokens()).unwrap();
        let env = container(&set.workload).env.clone().unwrap();

        assert_eq!(env_value(&env, "TZ"), Some("Europe/London"));
        assert_eq!(env_value(&env, "FORGE_CLIENT_ID"), Some("client-id"));
        assert_eq!(env_value(&env, "FORGE_PROJECT_TOKEN"), Some("project-token"));
        assert_eq!(env_value(&env, "BASE_URL"), Some("https://proj1.example.com"));
        assert_eq!(env_value(&env, "FORGE_TEAM_ID"), Some("TeamA1"));
        assert_eq!(env_value(&env, "FORGE_PROJECT_ID"), Some("i1"));
        assert_eq!(env_value(&env, "FORGE_NR_NO_TCP_IN"), Some("true"));
        assert_eq!(env_value(&env, "FORGE_LICENSE_TYPE"), Some("ee"));
        assert_eq!(env_value(&env, "FORGE_MEMORY_LIMIT"), Some("256"));
        assert_eq!(env_value(&env, "FORGE_CPU_LIMIT"), Some("10"));
        assert_eq!(env_value(&env, "FORGE_NR_SECRET"), Some("nr-secret"));
        assert_eq!(env_value(&env, "FORGE_LOG_PASSTHROUGH"), Some("true"));
        assert_eq!(env_value(&env, "FORGE_BROKER_URL"), None);
    }

    #[test]
    fn test_tier_container_overrides_default_image() {
        let mut instance = proj1();
        instance.tier.container = Some("flowfuse/node-red:4.0".to_string());
        let set = DesiredResourceSet::build(&instance, &test_options(), &fixed_tokens()).unwrap();
        assert_eq!(
            container(&set.workload).image.as_deref(),
            Some("flowfuse/node-red:4.0")
        );
    }

    #[test]
    fn test_ha_replicas() {
        let mut instance = proj1();
        instance.settings.ha = Some(HaSettings { replicas: 2 });
        let set = DesiredResourceSet::build(&instance, &test_options(), &fixed_tokens()).unwrap();
        assert_eq!(set.workload.spec.as_ref().unwrap().replicas, Some(2));

        instance.settings.ha = Some(HaSettings { replicas: 1 });
        let set = DesiredResourceSet::build(&instance, &test_options(), &fixed_tokens()).unwrap();
        assert_eq!(set.workload.spec.as_ref().unwrap().replicas, Some(1));
    }

    #[test]
    fn test_private_ca_and_storage_mounts() {
        let mut options = test_options();
        options.private_ca = Some("corp-ca".to_string());
        options.storage.enabled = true;
        options.storage.size = Some("5Gi".to_string());

        let set = DesiredResourceSet::build(&proj1(), &options, &fixed_tokens()).unwrap();
        let pod = set.workload.spec.as_ref().unwrap().template.spec.as_ref().unwrap();

        let volumes = pod.volumes.as_ref().unwrap();
        assert_eq!(volumes[0].name, "cacert");
        assert_eq!(
            volumes[0].config_map.as_ref().unwrap().name.as_deref(),
            Some("corp-ca")
        );
        assert_eq!(volumes[1].name, "persistence");
        assert_eq!(
            volumes[1].persistent_volume_claim.as_ref().unwrap().claim_name,
            "i1-pvc"
        );

        let mounts = pod.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/usr/local/ssl-certs");
        assert_eq!(mounts[1].mount_path, "/data/storage");
        let env = pod.containers[0].env.as_ref().unwrap();
        assert_eq!(
            env_value(env, "NODE_EXTRA_CA_CERTS"),
            Some("/usr/local/ssl-certs/chain.pem")
        );

        let volume = set.volume.as_ref().unwrap();
        assert_eq!(volume.metadata.name.as_deref(), Some("i1-pvc"));
        let spec = volume.spec.as_ref().unwrap();
        assert_eq!(spec.access_modes.as_ref().unwrap()[0], "ReadWriteMany");
        assert_eq!(
            quantity(&spec.resources.as_ref().unwrap().requests, "storage"),
            "5Gi"
        );
        assert_eq!(
            volume.metadata.labels.as_ref().unwrap()["ff-project-name"],
            "proj1"
        );
    }

    #[test]
    fn test_openshift_licensed_empties_security_contexts() {
        let mut options = test_options();
        options.cloud_provider = Some("openshift".to_string());
        options.licensed = true;

        let set = DesiredResourceSet::build(&proj1(), &options, &fixed_tokens()).unwrap();
        let pod = set.workload.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(pod.security_context, Some(PodSecurityContext::default()));
        assert_eq!(
            pod.containers[0].security_context,
            Some(Default::default())
        );
    }

    #[test]
    fn test_explicit_security_context_wins_over_openshift() {
        let mut options = test_options();
        options.cloud_provider = Some("openshift".to_string());
        options.licensed = true;
        options.pod_security_context = Some(PodSecurityContext {
            run_as_non_root: Some(true),
            ..Default::default()
        });

        let set = DesiredResourceSet::build(&proj1(), &options, &fixed_tokens()).unwrap();
        let pod = set.workload.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(
            pod.security_context.as_ref().unwrap().run_as_non_root,
            Some(true)
        );
    }

    #[test]
    fn test_malformed_tolerations_are_skipped() {
        let options = test_options().with_env(EnvOverrides {
            deployment_tolerations: Some("[{broken".to_string()),
            editor_service_account: Some("editor".to_string()),
            ..Default::default()
        });

        let set = DesiredResourceSet::build(&proj1(), &options, &fixed_tokens()).unwrap();
        let pod = set.workload.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert!(pod.tolerations.is_none());
        assert_eq!(pod.service_account_name.as_deref(), Some("editor"));
    }

    #[test]
    fn test_project_labels_merge() {
        let mut options = test_options();
        options.project_labels = Some(BTreeMap::from([(
            "tier".to_string(),
            "gold".to_string(),
        )]));
        let set = DesiredResourceSet::build(&proj1(), &options, &fixed_tokens()).unwrap();

        let labels = set.workload.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["tier"], "gold");
        assert_eq!(labels["name"], "proj1");
        assert_eq!(set.endpoint.metadata.labels.as_ref().unwrap()["tier"], "gold");
        assert_eq!(set.route.metadata.labels.as_ref().unwrap()["tier"], "gold");
    }

    // -----------------------------------------------------------------------
    // Endpoint and routes
    // -----------------------------------------------------------------------

    #[test]
    fn test_proj1_route() {
        let set = DesiredResourceSet::build(&proj1(), &test_options(), &fixed_tokens()).unwrap();

        assert_eq!(set.route.metadata.name.as_deref(), Some("proj1"));
        assert_eq!(rule_host(&set.route), "proj1.example.com");
        assert_eq!(backend_name(&set.route), "proj1");
        assert!(set.route.spec.as_ref().unwrap().tls.is_none());
        assert!(set.route.metadata.annotations.is_none());
    }

    #[test]
    fn test_digit_leading_name_prefixes_service_only() {
        let instance = sample_instance("i9", "9abc");
        let set = DesiredResourceSet::build(&instance, &test_options(), &fixed_tokens()).unwrap();

        assert_eq!(set.endpoint.metadata.name.as_deref(), Some("srv-9abc"));
        assert_eq!(set.route.metadata.name.as_deref(), Some("9abc"));
        assert_eq!(backend_name(&set.route), "srv-9abc");
        assert_eq!(set.workload.metadata.name.as_deref(), Some("9abc"));
        assert_eq!(
            set.endpoint.spec.as_ref().unwrap().selector.as_ref().unwrap()["name"],
            "9abc"
        );
    }

    #[test]
    fn test_endpoint_ports_and_type() {
        let mut options = test_options();
        options.service.service_type = "NodePort".to_string();
        let service = build_endpoint(&proj1(), &options);
        let spec = service.spec.as_ref().unwrap();

        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        let ports: Vec<(String, i32)> = spec
            .ports
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| (p.name.clone().unwrap(), p.port))
            .collect();
        assert_eq!(
            ports,
            vec![("web".to_string(), 1880), ("management".to_string(), 2880)]
        );
    }

    #[test]
    fn test_issuer_route_gets_tls_and_filtered_annotations() {
        let mut options = test_options();
        options.cert_manager_issuer = Some("letsencrypt".to_string());
        options.project_ingress_annotations = Some(BTreeMap::from([
            ("cert-manager.io/issuer".to_string(), "ignored".to_string()),
            (
                "nginx.ingress.kubernetes.io/upstream-vhost".to_string(),
                "{{ serviceName }}.flowforge".to_string(),
            ),
        ]));

        let url = Url::parse("https://proj1.example.com").unwrap();
        let route = build_route(&proj1(), &options, &url);
        let annotations = route.metadata.annotations.as_ref().unwrap();

        assert_eq!(annotations["cert-manager.io/cluster-issuer"], "letsencrypt");
        assert!(!annotations.contains_key("cert-manager.io/issuer"));
        assert_eq!(
            annotations["nginx.ingress.kubernetes.io/upstream-vhost"],
            "proj1.flowforge"
        );

        let tls = &route.spec.as_ref().unwrap().tls.as_ref().unwrap()[0];
        assert_eq!(tls.secret_name.as_deref(), Some("proj1"));
        assert_eq!(tls.hosts.as_ref().unwrap()[0], "proj1.example.com");
        assert!(route_uses_tls(
            options.cert_manager_issuer.as_deref(),
            options.project_ingress_annotations.as_ref()
        ));
    }

    #[test]
    fn test_cert_manager_annotation_without_issuer_enables_tls() {
        let mut options = test_options();
        options.project_ingress_annotations = Some(BTreeMap::from([(
            "cert-manager.io/cluster-issuer".to_string(),
            "internal".to_string(),
        )]));

        let url = Url::parse("https://proj1.example.com").unwrap();
        let route = build_route(&proj1(), &options, &url);

        assert_eq!(
            route.metadata.annotations.as_ref().unwrap()["cert-manager.io/cluster-issuer"],
            "internal"
        );
        assert!(route.spec.as_ref().unwrap().tls.is_some());
    }

    #[test]
    fn test_plain_annotations_without_tls() {
        let mut options = test_options();
        options.project_ingress_annotations = Some(BTreeMap::from([(
            "kubernetes.io/ingress.class".to_string(),
            "nginx".to_string(),
        )]));
        assert!(!route_uses_tls(None, options.project_ingress_annotations.as_ref()));

        let url = Url::parse("https://proj1.example.com").unwrap();
        let route = build_route(&proj1(), &options, &url);
        assert!(route.spec.as_ref().unwrap().tls.is_none());
        assert_eq!(
            route.metadata.annotations.as_ref().unwrap()["kubernetes.io/ingress.class"],
            "nginx"
        );
    }

    #[test]
    fn test_env_ingress_overrides() {
        let options = test_options().with_env(EnvOverrides {
            ingress_annotations: Some(r#"{"team":"{{ instanceHost }}"}"#.to_string()),
            ingress_class_name: Some("traefik".to_string()),
            ..Default::default()
        });
        let url = Url::parse("https://proj1.example.com").unwrap();
        let route = build_route(&proj1(), &options, &url);

        assert_eq!(
            route.metadata.annotations.as_ref().unwrap()["team"],
            "proj1.example.com"
        );
        assert_eq!(
            route.spec.as_ref().unwrap().ingress_class_name.as_deref(),
            Some("traefik")
        );
    }

    #[test]
    fn test_custom_route() {
        let mut instance = proj1();
        instance.settings.custom_hostname = Some("flows.acme.org".to_string());
        let mut options = test_options();
        options.custom_hostname = CustomHostnameOptions {
            enabled: true,
            cert_manager_issuer: Some("acme-issuer".to_string()),
            ingress_annotations: Some(BTreeMap::from([(
                "external-dns.alpha.kubernetes.io/hostname".to_string(),
                "{{ instanceHost }}".to_string(),
            )])),
            ingress_class: Some("public".to_string()),
        };

        let set = DesiredResourceSet::build(&instance, &options, &fixed_tokens()).unwrap();
        let custom = set.custom_route.as_ref().unwrap();

        assert_eq!(custom.metadata.name.as_deref(), Some("proj1-custom"));
        assert_eq!(rule_host(custom), "flows.acme.org");
        assert_eq!(backend_name(custom), "proj1");
        let annotations = custom.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations["cert-manager.io/cluster-issuer"], "acme-issuer");
        assert_eq!(
            annotations["external-dns.alpha.kubernetes.io/hostname"],
            "flows.acme.org"
        );
        let spec = custom.spec.as_ref().unwrap();
        assert_eq!(spec.ingress_class_name.as_deref(), Some("public"));
        assert_eq!(
            spec.tls.as_ref().unwrap()[0].secret_name.as_deref(),
            Some("proj1-custom")
        );
    }

    #[test]
    fn test_custom_route_requires_feature_and_setting() {
        let mut instance = proj1();
        instance.settings.custom_hostname = Some("flows.acme.org".to_string());
        let set = DesiredResourceSet::build(&instance, &test_options(), &fixed_tokens()).unwrap();
        assert!(set.custom_route.is_none());

        let mut options = test_options();
        options.custom_hostname.enabled = true;
        let set = DesiredResourceSet::build(&proj1(), &options, &fixed_tokens()).unwrap();
        assert!(set.custom_route.is_none());
    }

    #[test]
    fn test_objects_in_provisioning_order() {
        let mut options = test_options();
        options.storage.enabled = true;
        let set = DesiredResourceSet::build(&proj1(), &options, &fixed_tokens()).unwrap();
        let kinds: Vec<&str> = set.objects().iter().map(|o| o.kind().as_str()).collect();
        assert_eq!(
            kinds,
            vec!["PersistentVolumeClaim", "Deployment", "Service", "Ingress"]
        );

        let yaml = set.to_yaml().unwrap();
        assert_eq!(yaml.matches("---\n").count(), 4);
        assert!(yaml.contains("kind: Deployment"));
    }

    // -----------------------------------------------------------------------
    // Broker agent
    // -----------------------------------------------------------------------

    #[test]
    fn test_team_broker_agent_pod() {
        let agent = BrokerAgent::new("TeamA1", BrokerRef::TeamDefault);
        let options = test_options();
        let pod = build_agent_pod(&agent, &options, "team-token");

        assert_eq!(
            pod.metadata.name.as_deref(),
            Some("mqtt-schema-agent-teama1-team-broker")
        );
        let labels = pod.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["team"], "TeamA1");
        assert_eq!(labels["broker"], "team-broker");

        let spec = pod.spec.as_ref().unwrap();
        let c = &spec.containers[0];
        assert_eq!(
            c.image.as_deref(),
            Some("registry.example.com/flowfuse/mqtt-schema-agent")
        );
        assert_eq!(c.ports.as_ref().unwrap()[0].container_port, 3500);
        let env = c.env.as_ref().unwrap();
        assert_eq!(env_value(env, "FORGE_TEAM_TOKEN"), Some("team-token"));
        assert_eq!(env_value(env, "FORGE_BROKER_ID"), Some("team-broker"));
        assert_eq!(env_value(env, "FORGE_TIMEOUT"), Some("24"));
    }

    #[test]
    fn test_specific_broker_agent_service() {
        let agent = BrokerAgent::new("TeamA1", BrokerRef::Specific("BrK9".to_string()));
        let mut options = test_options();
        options.mqtt_schema_container = Some("custom/agent:1".to_string());

        let pod = build_agent_pod(&agent, &options, "t");
        let env = pod.spec.as_ref().unwrap().containers[0].env.as_ref().unwrap();
        assert_eq!(env_value(env, "FORGE_BROKER_ID"), Some("BrK9"));
        assert_eq!(env_value(env, "FORGE_TIMEOUT"), None);
        assert_eq!(
            pod.spec.as_ref().unwrap().containers[0].image.as_deref(),
            Some("custom/agent:1")
        );

        let service = build_agent_service(&agent, &options);
        assert_eq!(
            service.metadata.name.as_deref(),
            Some("mqtt-schema-agent-teama1-brk9")
        );
        let spec = service.spec.as_ref().unwrap();
        assert_eq!(
            spec.selector.as_ref().unwrap()["name"],
            "mqtt-schema-agent-teama1-brk9"
        );
        assert_eq!(spec.ports.as_ref().unwrap()[0].port, 3500);
    }

    #[test]
    fn test_options_without_registry() {
        let options = DriverOptions::default();
        let set = DesiredResourceSet::build(&proj1(), &options, &fixed_tokens()).unwrap();
        assert_eq!(
            container(&set.workload).image.as_deref(),
            Some("flowforge/node-red")
        );
    }
}
