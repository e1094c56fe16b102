//! `stratum-identity`: the user aggregate and its credentials.

pub mod password;
pub mod role;
pub mod user;

pub use password::hash_password;
pub use role::Role;
pub use user::{
    RegisterUser, USER_DEACTIVATED, USER_REGISTERED, USER_UPDATED, User, UserCommand, UserState,
};
