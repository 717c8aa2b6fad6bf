pub mod broadcasts;
pub mod dlt;
pub mod outbox;
pub mod shedlock;
pub mod tokens;
pub mod user_broadcasts;
