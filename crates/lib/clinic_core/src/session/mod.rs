//! Session services built on the stores: refresh tokens, the revocation
//! ledger, password reset secrets, the authenticator that ties them together
//! and the background sweeper.

pub mod authenticator;
pub mod refresh;
pub mod reset;
pub mod revocation;
pub mod sweeper;

pub use authenticator::{SessionAuthenticator, TokenPair};
pub use refresh::{IssuedRefreshToken, RefreshTokens};
pub use reset::{IssuedSecret, PasswordResets};
pub use revocation::RevocationLedger;
pub use sweeper::Sweeper;
