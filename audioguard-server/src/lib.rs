pub mod app;
pub mod http;
pub mod session_cookie;
pub mod subsystems;
