//! Route annotation templating
//!
//! Operators may reference instance details inside Ingress annotation values
//! with `{{ key }}` placeholders (whitespace inside the braces is optional).

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use url::Url;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z]+)\s*\}\}").expect("hardcoded regex pattern is valid")
});

/// Values exposed to annotation placeholders for one route
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteContext {
    pub service_name: String,
    pub instance_url: String,
    pub instance_host: String,
    /// Scheme including the trailing colon, e.g. `https:`
    pub instance_protocol: String,
}

impl RouteContext {
    pub fn new(service_name: impl Into<String>, url: &Url) -> Self {
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };
        Self {
            service_name: service_name.into(),
            instance_url: url.as_str().to_string(),
            instance_host: host,
            instance_protocol: format!("{}:", url.scheme()),
        }
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            "serviceName" => Some(&self.service_name),
            "instanceURL" => Some(&self.instance_url),
            "instanceHost" => Some(&self.instance_host),
            "instanceProtocol" => Some(&self.instance_protocol),
            _ => None,
        }
    }
}

/// Substitute every known `{{ key }}` placeholder in `value`
///
/// Unknown placeholders are left untouched.
pub fn render(value: &str, ctx: &RouteContext) -> String {
    PLACEHOLDER
        .replace_all(value, |caps: &Captures| match ctx.lookup(&caps[1]) {
            Some(replacement) => replacement.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Render every annotation value in place
pub fn render_all(annotations: &mut BTreeMap<String, String>, ctx: &RouteContext) {
    for value in annotations.values_mut() {
        *value = render(value, ctx);
    }
}
