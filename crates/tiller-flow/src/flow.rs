//! Flow descriptors and the flow-resolution seam.
//!
//! The core never parses flow definitions; it only needs enough of a flow to
//! address it, check that it is executable, and read its labels.

use serde::{Deserialize, Serialize};
use tiller_core::Label;

/// A resolved flow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    /// Owning tenant, if the deployment is multi-tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Namespace the flow lives in.
    pub namespace: String,
    /// Flow identifier, unique within its namespace.
    pub id: String,
    /// Revision of this definition.
    pub revision: u32,
    /// Disabled flows cannot be executed.
    #[serde(default)]
    pub disabled: bool,
    /// Set when the stored definition failed validation; such flows cannot
    /// be executed either.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    /// Labels declared on the flow.
    #[serde(default)]
    pub labels: Vec<Label>,
}

impl Flow {
    /// Creates a minimal executable flow descriptor.
    #[must_use]
    pub fn new(namespace: impl Into<String>, id: impl Into<String>, revision: u32) -> Self {
        Self {
            tenant_id: None,
            namespace: namespace.into(),
            id: id.into(),
            revision,
            disabled: false,
            exception: None,
            labels: Vec::new(),
        }
    }

    /// Sets the owning tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the flow labels.
    #[must_use]
    pub fn with_labels(mut self, labels: Vec<Label>) -> Self {
        self.labels = labels;
        self
    }

    /// Marks the flow as disabled.
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Marks the flow as invalid with the stored validation failure.
    #[must_use]
    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    /// Labels in the reserved system namespace.
    pub fn system_labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter().filter(|l| l.is_system())
    }
}

/// Resolves flows by address.
///
/// The caller coordinates (tenant, namespace, flow id) identify who is asking
/// so implementations can enforce access scoping between namespaces.
pub trait FlowLookup: Send + Sync + std::fmt::Debug {
    /// Finds a flow, optionally pinned to a revision.
    ///
    /// Returns `None` when no such flow exists or the caller may not see it.
    #[allow(clippy::too_many_arguments)]
    fn find_by_id(
        &self,
        tenant_id: Option<&str>,
        namespace: &str,
        flow_id: &str,
        revision: Option<u32>,
        caller_tenant_id: Option<&str>,
        caller_namespace: &str,
        caller_flow_id: &str,
    ) -> Option<Flow>;
}
