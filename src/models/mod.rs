pub mod organization;
pub mod rbac;
pub mod session;
pub mod user;
