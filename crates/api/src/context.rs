use pushdeck_core::AdminId;

/// Admin identity for a request, as asserted by the upstream authentication
/// layer.
///
/// Must be present for all routes except `/health`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminContext {
    admin_id: AdminId,
}

impl AdminContext {
    pub fn new(admin_id: AdminId) -> Self {
        Self { admin_id }
    }

    pub fn admin_id(&self) -> &AdminId {
        &self.admin_id
    }
}
