//! Stamping new instances from a workload's template.
//!
//! The factory is built from the fields it needs, passed explicitly: the
//! template, the selector labels used when the template has none, and the
//! validated owner reference.

use chrono::Utc;
use podset_reconcile::{Instance, InstancePhase, InstanceTemplate, Labels, OwnerReference};
use thiserror::Error;
use uuid::Uuid;

/// Longest name base kept before the random suffix is appended.
const MAX_NAME_BASE_LEN: usize = 57;

/// Length of the random name suffix.
const NAME_SUFFIX_LEN: usize = 5;

/// Characters used in name suffixes: no vowels and no 0, 1 or 3.
const NAME_SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// Invalid controller reference.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OwnerRefError {
    #[error("controller reference has an empty api version")]
    MissingApiVersion,

    #[error("controller reference has an empty kind")]
    MissingKind,

    #[error("controller reference has an empty name")]
    MissingName,

    #[error("controller reference has a nil uid")]
    NilUid,

    #[error("owner reference is not marked as controller")]
    NotController,

    #[error("controller reference does not block owner deletion")]
    NoBlockOwnerDeletion,
}

/// Check that a reference can be stamped as the managing controller.
pub fn validate_controller_ref(owner: &OwnerReference) -> Result<(), OwnerRefError> {
    if owner.api_version.is_empty() {
        return Err(OwnerRefError::MissingApiVersion);
    }
    if owner.kind.is_empty() {
        return Err(OwnerRefError::MissingKind);
    }
    if owner.name.is_empty() {
        return Err(OwnerRefError::MissingName);
    }
    if owner.uid.is_nil() {
        return Err(OwnerRefError::NilUid);
    }
    if !owner.controller {
        return Err(OwnerRefError::NotController);
    }
    if !owner.block_owner_deletion {
        return Err(OwnerRefError::NoBlockOwnerDeletion);
    }
    Ok(())
}

/// Builds instances for one workload.
#[derive(Debug, Clone)]
pub struct InstanceFactory {
    namespace: String,
    name_base: String,
    labels: Labels,
    spec: serde_json::Value,
    owner: OwnerReference,
}

impl InstanceFactory {
    /// Create a factory, validating the owner reference.
    ///
    /// Instances get the template labels, or `selector_labels` when the
    /// template carries none.
    pub fn new(
        namespace: &str,
        template: &InstanceTemplate,
        selector_labels: &Labels,
        owner: OwnerReference,
    ) -> Result<Self, OwnerRefError> {
        validate_controller_ref(&owner)?;

        let labels = if template.labels.is_empty() {
            selector_labels.clone()
        } else {
            template.labels.clone()
        };

        let mut name_base: String = owner.name.chars().take(MAX_NAME_BASE_LEN).collect();
        name_base.push('-');

        Ok(Self {
            namespace: namespace.to_string(),
            name_base,
            labels,
            spec: template.spec.clone(),
            owner,
        })
    }

    /// Stamp a new pending instance with a generated name.
    pub fn build(&self) -> Instance {
        let uid = Uuid::new_v4();
        let suffix = name_suffix(Uuid::new_v4().as_u128());

        Instance {
            namespace: self.namespace.clone(),
            name: format!("{}{}", self.name_base, suffix),
            uid,
            labels: self.labels.clone(),
            owner_references: vec![self.owner.clone()],
            phase: InstancePhase::Pending,
            readiness: None,
            creation_timestamp: Utc::now(),
            spec: self.spec.clone(),
        }
    }
}

fn name_suffix(mut random: u128) -> String {
    let radix = NAME_SUFFIX_ALPHABET.len() as u128;
    (0..NAME_SUFFIX_LEN)
        .map(|_| {
            let c = NAME_SUFFIX_ALPHABET[(random % radix) as usize];
            random /= radix;
            char::from(c)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "pixiu.pixiu.io/v1alpha1".to_string(),
            kind: "PodSet".to_string(),
            name: "web".to_string(),
            uid: Uuid::new_v4(),
            controller: true,
            block_owner_deletion: true,
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_validate_controller_ref() {
        assert!(validate_controller_ref(&owner()).is_ok());

        let cases = [
            (
                OwnerReference {
                    api_version: String::new(),
                    ..owner()
                },
                OwnerRefError::MissingApiVersion,
            ),
            (
                OwnerReference {
                    kind: String::new(),
                    ..owner()
                },
                OwnerRefError::MissingKind,
            ),
            (
                OwnerReference {
                    name: String::new(),
                    ..owner()
                },
                OwnerRefError::MissingName,
            ),
            (
                OwnerReference {
                    uid: Uuid::nil(),
                    ..owner()
                },
                OwnerRefError::NilUid,
            ),
            (
                OwnerReference {
                    controller: false,
                    ..owner()
                },
                OwnerRefError::NotController,
            ),
            (
                OwnerReference {
                    block_owner_deletion: false,
                    ..owner()
                },
                OwnerRefError::NoBlockOwnerDeletion,
            ),
        ];

        for (reference, expected) in cases {
            assert_eq!(validate_controller_ref(&reference), Err(expected));
        }
    }

    #[test]
    fn test_build_stamps_owner_and_template_labels() {
        let template = InstanceTemplate {
            labels: labels(&[("app", "web"), ("tier", "front")]),
            spec: serde_json::json!({"image": "nginx"}),
        };
        let owner = owner();
        let factory =
            InstanceFactory::new("prod", &template, &labels(&[("app", "web")]), owner.clone())
                .unwrap();

        let a = factory.build();
        let b = factory.build();

        assert_eq!(a.namespace, "prod");
        assert!(a.name.starts_with("web-"));
        assert_eq!(a.name.len(), "web-".len() + NAME_SUFFIX_LEN);
        assert_ne!(a.name, b.name);
        assert_eq!(a.labels, template.labels);
        assert_eq!(a.spec, template.spec);
        assert_eq!(a.owner_references, vec![owner.clone()]);
        assert_eq!(a.controller_ref().map(|o| o.uid), Some(owner.uid));
        assert_eq!(a.phase, InstancePhase::Pending);
        assert!(a.readiness.is_none());
    }

    #[test]
    fn test_name_suffix_uses_safe_alphabet() {
        assert_eq!(name_suffix(0), "bbbbb");
        assert_eq!(name_suffix(1), "cbbbb");
        assert_eq!(name_suffix(27), "bcbbb");

        let factory = InstanceFactory::new(
            "prod",
            &InstanceTemplate::default(),
            &labels(&[("app", "web")]),
            owner(),
        )
        .unwrap();
        for _ in 0..100 {
            let name = factory.build().name;
            let suffix = name.strip_prefix("web-").unwrap();
            assert_eq!(suffix.len(), NAME_SUFFIX_LEN);
            assert!(suffix.bytes().all(|b| NAME_SUFFIX_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_empty_template_labels_fall_back_to_selector() {
        let selector_labels = labels(&[("app", "web")]);
        let factory =
            InstanceFactory::new("prod", &InstanceTemplate::default(), &selector_labels, owner())
                .unwrap();
        assert_eq!(factory.build().labels, selector_labels);
    }

    #[test]
    fn test_invalid_owner_is_rejected() {
        let result = InstanceFactory::new(
            "prod",
            &InstanceTemplate::default(),
            &Labels::new(),
            OwnerReference {
                controller: false,
                ..owner()
            },
        );
        assert_eq!(result.err(), Some(OwnerRefError::NotController));
    }

    #[test]
    fn test_long_names_are_truncated() {
        let long = "w".repeat(80);
        let factory = InstanceFactory::new(
            "prod",
            &InstanceTemplate::default(),
            &labels(&[("app", "web")]),
            OwnerReference {
                name: long,
                ..owner()
            },
        )
        .unwrap();
        assert_eq!(factory.build().name.len(), MAX_NAME_BASE_LEN + 1 + NAME_SUFFIX_LEN);
    }
}
