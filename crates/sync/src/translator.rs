//! Metadata translation for newly created physical objects.

use vsync_core::{Resource, MANAGED_BY_LABEL, OBJECT_NAMESPACE_ANNOTATION, OBJECT_NAME_ANNOTATION};

use crate::names::physical_name;

const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Builds the skeleton of a physical object from its virtual counterpart.
pub trait MetadataTranslator: Send + Sync {
    fn translate_metadata(&self, virtual_obj: &Resource) -> Resource;
    /// Suffix used by forward name translation.
    fn suffix(&self) -> &str;
}

/// Places every physical object in one target namespace under a translated name.
#[derive(Debug, Clone)]
pub struct NamespacedTranslator {
    suffix: String,
    target_namespace: String,
}

impl NamespacedTranslator {
    pub fn new(suffix: impl Into<String>, target_namespace: impl Into<String>) -> Self {
        Self { suffix: suffix.into(), target_namespace: target_namespace.into() }
    }

    pub fn target_namespace(&self) -> &str { &self.target_namespace }
}

impl MetadataTranslator for NamespacedTranslator {
    fn translate_metadata(&self, virtual_obj: &Resource) -> Resource {
        let namespace = virtual_obj.namespace().unwrap_or_default();
        let mut out = Resource::new(virtual_obj.api_version(), virtual_obj.kind());
        out.set_name(&physical_name(virtual_obj.name(), namespace, &self.suffix));
        out.set_namespace(&self.target_namespace);

        let mut labels = virtual_obj.labels();
        labels.insert(MANAGED_BY_LABEL.to_string(), self.suffix.clone());
        out.set_labels(labels);

        let mut annotations = virtual_obj.annotations();
        annotations.remove(LAST_APPLIED_ANNOTATION);
        annotations.insert(OBJECT_NAME_ANNOTATION.to_string(), virtual_obj.name().to_string());
        annotations.insert(OBJECT_NAMESPACE_ANNOTATION.to_string(), namespace.to_string());
        out.set_annotations(annotations);
        out
    }

    fn suffix(&self) -> &str { &self.suffix }
}
