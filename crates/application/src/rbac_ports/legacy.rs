use aegis_domain::PermissionAction;

/// Requirements the static matrix attaches to one action.
///
/// An actor satisfies the requirement when its static role is listed or it
/// holds any of the listed static permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyRequirement {
    /// Static roles allowed to perform the action.
    pub roles: Vec<String>,
    /// Static permission strings that allow the action.
    pub permissions: Vec<String>,
}

/// Port for the pre-dynamic static permission matrix.
pub trait LegacyPermissionMatrix: Send + Sync {
    /// Returns the requirement for an action, if the matrix knows it.
    fn requirement_for(&self, action: &PermissionAction) -> Option<LegacyRequirement>;

    /// Returns every action the matrix knows, used as the comparison set.
    fn actions(&self) -> Vec<PermissionAction>;
}
