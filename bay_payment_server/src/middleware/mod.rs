mod admin;

pub use admin::AdminMiddlewareFactory;

/// The header operators present their token in.
pub const ADMIN_TOKEN_HEADER: &str = "bpg-admin-token";
