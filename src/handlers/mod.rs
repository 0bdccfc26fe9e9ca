//! Request handlers.
//!
//! Each module serves one resource kind (or the login surface).  Handlers
//! take the shared state plus already-extracted path and body values and
//! return `Result<Response, IdpError>`; route wiring lives in `server.rs`.

pub mod login;
pub mod resource;
pub mod services;
pub mod sessions;
pub mod shortcuts;
pub mod users;
