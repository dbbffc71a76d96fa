//! Manifest validation (§4.9), applied on install, update, adoption, and
//! catalog ingestion.
//!
//! Grounded on the teacher's `config.rs` `validate_*` methods: many small,
//! named checks. Unlike the teacher's short-circuiting `anyhow::anyhow!`
//! style, §4.9 requires every problem to be reported together, so each
//! check here appends to a `Vec<FieldProblem>` instead of returning early.

use crate::error::{FieldProblem, RuntimeError};
use crate::model::Manifest;
use crate::resources::{parse_cpu_checked, parse_memory_checked};
use std::collections::HashSet;

fn is_valid_slug(s: &str) -> bool {
    if s.is_empty() || s.len() > 64 {
        return false;
    }
    let mut chars = s.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn is_valid_env_name(s: &str) -> bool {
    let mut chars = s.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !(first.is_ascii_uppercase() || first == '_') {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Validate a manifest against every §4.9 rule, collecting all failures.
///
/// Returns `Ok(())` if the manifest is valid, or
/// `Err(RuntimeError::InvalidManifest(problems))` listing every violation.
pub fn validate_manifest(manifest: &Manifest) -> Result<(), RuntimeError> {
    let mut problems = Vec::new();

    if !is_valid_slug(&manifest.id) {
        problems.push(FieldProblem {
            field: "id".to_string(),
            problem: "must be a slug of [a-z0-9][a-z0-9-]* with length 1-64".to_string(),
        });
    }

    if semver::Version::parse(&manifest.version).is_err() {
        problems.push(FieldProblem {
            field: "version".to_string(),
            problem: format!("'{}' does not parse as semver", manifest.version),
        });
    }

    if manifest.network.container_port == 0 {
        problems.push(FieldProblem {
            field: "network.containerPort".to_string(),
            problem: "must be in 1..65535".to_string(),
        });
    }
    if let Some(host_port) = manifest.network.host_port {
        if host_port == 0 {
            problems.push(FieldProblem {
                field: "network.hostPort".to_string(),
                problem: "must be in 1..65535".to_string(),
            });
        }
    }

    let mut seen_endpoints = HashSet::new();
    for endpoint in &manifest.endpoints {
        let key = (endpoint.method.to_uppercase(), endpoint.path.clone());
        if !seen_endpoints.insert(key) {
            problems.push(FieldProblem {
                field: "endpoints".to_string(),
                problem: format!(
                    "duplicate (method, path): ({}, {})",
                    endpoint.method, endpoint.path
                ),
            });
        }
    }

    for env in &manifest.environment {
        if !is_valid_env_name(&env.name) {
            problems.push(FieldProblem {
                field: format!("environment[{}].name", env.name),
                problem: "must match [A-Z_][A-Z0-9_]*".to_string(),
            });
        }
    }

    for volume in &manifest.volumes {
        if !volume.container_path.starts_with('/') {
            problems.push(FieldProblem {
                field: format!("volumes[{}].containerPath", volume.logical_name),
                problem: "must be an absolute path".to_string(),
            });
        }
    }

    if parse_memory_checked(&manifest.resources.memory).is_none() {
        problems.push(FieldProblem {
            field: "resources.memory".to_string(),
            problem: format!(
                "'{}' does not match \\d+[mg]",
                manifest.resources.memory
            ),
        });
    }
    if parse_cpu_checked(&manifest.resources.cpu).is_none() {
        problems.push(FieldProblem {
            field: "resources.cpu".to_string(),
            problem: format!("'{}' is not a valid decimal core count", manifest.resources.cpu),
        });
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(RuntimeError::InvalidManifest(problems))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Manifest;

    fn valid_manifest() -> Manifest {
        Manifest::synthesize_for_adoption("crypto-1", "flowforge/crypto", "1.0.0", 3001, 4050)
            .tap_version("1.0.0")
    }

    trait TapVersion {
        fn tap_version(self, v: &str) -> Self;
    }
    impl TapVersion for Manifest {
        fn tap_version(mut self, v: &str) -> Self {
            self.version = v.to_string();
            self
        }
    }

    #[test]
    fn accepts_a_well_formed_manifest() {
        assert!(validate_manifest(&valid_manifest()).is_ok());
    }

    #[test]
    fn rejects_bad_slug_and_semver_together() {
        let mut manifest = valid_manifest();
        manifest.id = "Crypto_Bad!".to_string();
        manifest.version = "not-a-version".to_string();
        let err = validate_manifest(&manifest).unwrap_err();
        match err {
            RuntimeError::InvalidManifest(problems) => {
                assert!(problems.iter().any(|p| p.field == "id"));
                assert!(problems.iter().any(|p| p.field == "version"));
            }
            _ => panic!("expected InvalidManifest"),
        }
    }

    #[test]
    fn rejects_duplicate_endpoints() {
        use crate::model::EndpointSpec;
        let mut manifest = valid_manifest();
        manifest.endpoints = vec![
            EndpointSpec {
                method: "POST".to_string(),
                path: "/hash".to_string(),
                description: String::new(),
                rate_limit: None,
            },
            EndpointSpec {
                method: "post".to_string(),
                path: "/hash".to_string(),
                description: String::new(),
                rate_limit: None,
            },
        ];
        assert!(validate_manifest(&manifest).is_err());
    }

    #[test]
    fn rejects_relative_volume_path() {
        use crate::model::VolumeSpec;
        let mut manifest = valid_manifest();
        manifest.volumes.push(VolumeSpec {
            logical_name: "data".to_string(),
            container_path: "relative/path".to_string(),
            read_only: false,
        });
        assert!(validate_manifest(&manifest).is_err());
    }
}
