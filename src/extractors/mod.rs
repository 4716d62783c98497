pub mod session;
pub mod tenant;

pub use session::SessionToken;
pub use tenant::{selection_cookie, SelectedTenant, TENANT_ID_HEADER};
