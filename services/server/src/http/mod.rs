pub mod broadcasts;
pub mod dlt;
pub mod messages;
pub mod response;
pub mod sse;
pub mod tokens;
