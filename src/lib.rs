pub mod boundary;
pub mod config;
pub mod crypto;
pub mod policy;
pub mod secret;
pub mod session;
pub mod store;

pub use boundary::BoundaryAdapter;
pub use boundary::CookieCodec;
pub use config::CookieParams;
pub use config::SameSite;
pub use config::SecurityConfig;
pub use config::SessionConfig;
pub use policy::PolicyCheck;
pub use policy::PolicyOutcome;
pub use policy::PolicyPipeline;
pub use policy::RequestContext;
pub use policy::RestartReason;
pub use policy::SecurityMetadata;
pub use secret::SecretString;
pub use session::Flash;
pub use session::Session;
pub use session::SessionStatus;
pub use store::FileStore;
pub use store::MemoryStore;
pub use store::SessionData;
pub use store::SessionStore;
pub use store::WriteGuarantee;

#[cfg(feature = "redis-store")]
pub use store::RedisStore;

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    NotStarted,
    AlreadyStarted,
    CannotStart(String),
    CannotDestroy(String),
    BackendUnavailable(String),
    Serialization(String),
    ReservedKey(String),
    InvalidConfiguration(String),
}

impl std::error::Error for SessionError {}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotStarted => write!(f, "Session is not started"),
            SessionError::AlreadyStarted => write!(f, "Session is already started"),
            SessionError::CannotStart(msg) => write!(f, "Cannot start session: {}", msg),
            SessionError::CannotDestroy(msg) => write!(f, "Cannot destroy session: {}", msg),
            SessionError::BackendUnavailable(msg) => {
                write!(f, "Session backend unavailable: {}", msg)
            }
            SessionError::Serialization(msg) => {
                write!(f, "Session serialization error: {}", msg)
            }
            SessionError::ReservedKey(key) => write!(f, "Session key is reserved: {}", key),
            SessionError::InvalidConfiguration(msg) => {
                write!(f, "Invalid session configuration: {}", msg)
            }
        }
    }
}
