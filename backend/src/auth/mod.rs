// Bearer-token verification. Tokens are issued by the identity service.

pub mod jwt;
pub mod middleware;

pub use middleware::AuthUser;
