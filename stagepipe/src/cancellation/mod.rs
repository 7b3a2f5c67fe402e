//! Cooperative cancellation for stage tasks.
//!
//! Every stage owns a [`CancellationToken`]. Its blocking points race
//! against [`CancellationToken::cancelled`], so cancelling the token unwinds
//! the stage promptly from `take`, `reserve` or `put`.

mod token;

pub use token::CancellationToken;
