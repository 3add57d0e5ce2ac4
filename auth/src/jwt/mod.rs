pub mod claims;
pub mod errors;
pub mod handler;

pub use claims::SessionClaims;
pub use claims::VerifiedSession;
pub use errors::JwtError;
pub use handler::JwtHandler;
