pub mod auth;
pub mod completion;
pub mod documents;
pub mod tenants;
