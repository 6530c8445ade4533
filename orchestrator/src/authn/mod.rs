//! Authentication: scoped tokens, principal resolution and passwords

pub mod passwords;
pub mod principals;
pub mod tokens;
