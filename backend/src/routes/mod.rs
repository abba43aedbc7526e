/// Router Module Index
///
/// Routes are grouped by the guard chain in front of them. Each group is layered
/// separately and then merged under `/api/v1`, so a path can carry an ungated
/// verb next to a gated one without any handler re-checking credentials.

/// Routes with no guard.
pub mod public;

/// Routes behind the token guard only.
pub mod authenticated;

/// Routes behind the token guard followed by the admin role gate.
pub mod admin;
