pub mod auth;
pub mod ip_filter;

pub use auth::admin_auth;
pub use ip_filter::IpFilterLayer;
