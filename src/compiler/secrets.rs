//! Image-pull secret payloads
//!
//! Builds the standard docker-config-json document a
//! `kubernetes.io/dockerconfigjson` secret carries under `.dockerconfigjson`.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

use crate::specs::ImageDetails;
use crate::{Error, Result};

/// Registry host used for images without an explicit registry
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Secret type for image-pull secrets
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Data key holding the docker config document
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

#[derive(Debug, Serialize)]
struct DockerConfig<'a> {
    auths: BTreeMap<String, DockerAuth<'a>>,
}

#[derive(Debug, Serialize)]
struct DockerAuth<'a> {
    username: &'a str,
    password: &'a str,
    auth: String,
}

/// Derive the canonical registry host from an image path.
///
/// The first path component is a registry host when it contains `.` or `:`
/// or is `localhost`; otherwise the image lives on the default registry.
pub fn registry_host(image_path: &str) -> Result<String> {
    let invalid = |why: &str| {
        Error::validation_for_field(
            "image",
            format!("invalid image path {image_path:?}: {why}"),
        )
    };

    if image_path.is_empty() {
        return Err(invalid("empty"));
    }
    if image_path.chars().any(char::is_whitespace) {
        return Err(invalid("contains whitespace"));
    }

    let (host, repository) = match image_path.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first.to_string(), rest)
        }
        _ => (DEFAULT_REGISTRY.to_string(), image_path),
    };

    let name = repository
        .split(['@', ':'])
        .next()
        .unwrap_or_default();
    if name.is_empty() || name.split('/').any(str::is_empty) {
        return Err(invalid("empty repository component"));
    }
    if name.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(invalid("repository name must be lowercase"));
    }
    Ok(host)
}

/// Build the `.dockerconfigjson` document for private registry credentials
pub fn docker_config_json(details: &ImageDetails) -> Result<String> {
    let host = registry_host(&details.image_path)?;
    let auth = STANDARD.encode(format!("{}:{}", details.username, details.password));
    let config = DockerConfig {
        auths: BTreeMap::from([(
            host,
            DockerAuth {
                username: &details.username,
                password: &details.password,
                auth,
            },
        )]),
    };
    Ok(serde_json::to_string(&config)?)
}
