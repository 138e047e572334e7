/// NoteHive credential primitives
///
/// - Argon2id password hashing and verification
/// - HS256 session tokens carried in the `token` cookie
/// - Six-digit one-time codes for password reset

pub mod otp;
pub mod password;
pub mod token;

pub use otp::{OTP_TTL_MINUTES, generate_otp};
pub use password::{PasswordError, hash_password, verify_password};
pub use token::{TokenError, TokenSigner};
