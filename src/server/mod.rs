//! WebSocket session server
//!
//! Displays connect to `/ws/display` and get a session (new, or the one named
//! in `?session=`); phones connect to `/ws/controller` with the session id and
//! a role. Each session runs in its own actor task.

pub mod actor;
pub mod hub;
pub mod ws;

pub use actor::{Join, SessionHandle};
pub use hub::{BaseUrl, Hub, JoinUrlProvider};
pub use ws::{router, serve};
