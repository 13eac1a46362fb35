pub mod db;
pub mod error;
pub mod feed;
pub mod fetchers;
pub mod functions;
pub mod live;
pub mod logging;
pub mod retry;
pub mod search;
pub mod session;
pub mod storage;
pub mod stories;
pub mod web;
