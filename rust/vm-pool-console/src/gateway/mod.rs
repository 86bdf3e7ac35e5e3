//! Gateway functionality: authentication and flash messages.
//!
//! This module sits between HTTP and the controllers:
//! - bearer-token and trusted remote-user authentication
//! - one-shot flash messages carried across redirects

pub mod auth;
pub mod flash;

pub use auth::{AuthError, AuthMethod, AuthenticatedUser};
pub use flash::{Flash, redirect};
