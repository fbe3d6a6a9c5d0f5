pub mod jwt;

pub use jwt::{extract_bearer, Claims, JwtVerifier};
