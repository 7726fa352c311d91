//! Ordered permission levels gating command access.

/// A connection's authorization level. Ordered: `Guest < User < Moderator
/// < Admin`.
///
/// This is the single canonical ordering; no separate "Authoritys" type
/// exists in this codebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PermissionLevel {
    /// Unauthenticated or minimally trusted.
    #[default]
    Guest,
    /// A regular authenticated user.
    User,
    /// Elevated, room/channel-scoped authority.
    Moderator,
    /// Full administrative authority.
    Admin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_totally_ordered() {
        assert!(PermissionLevel::Guest < PermissionLevel::User);
        assert!(PermissionLevel::User < PermissionLevel::Moderator);
        assert!(PermissionLevel::Moderator < PermissionLevel::Admin);
    }
}
