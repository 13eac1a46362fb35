//! Route handler modules for the devconnect-web server.

pub mod follows;
pub mod functions;
pub mod health;
pub mod messages;
pub mod notifications;
pub mod profiles;
pub mod search;
pub mod stories;
pub mod websocket;
