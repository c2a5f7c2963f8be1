//! Messaging platform integration.
//!
//! The delivery core only sees `AccountConnector` and `Connection`. The
//! gateway connector is the production implementation, `MockConnector` the
//! scripted one used in tests.

pub mod credentials;
pub mod gateway;
pub mod mock;
pub mod traits;

pub use credentials::{AccountsTable, CredentialError, CredentialSource, EnvCredentials};
pub use gateway::GatewayConnector;
pub use mock::MockConnector;
pub use traits::{
    AccountConnector, AccountId, Connection, Credentials, PlatformError, PlatformResult,
    ScopedConnection,
};
