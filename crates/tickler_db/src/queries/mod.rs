//! Database query functions.
//!
//! Organized by domain:
//! - `reminder`: one-shot reminders and todos
//! - `recurring`: recurring definitions and their trigger watermark
//! - `preferences`: per-user timezone
//! - `chats`: broadcast audience
//!
//! Reads take the pool directly. Anything that writes takes the
//! [`TicklerDb`](crate::TicklerDb) handle so it can hold the writer lock.

mod chats;
mod preferences;
mod recurring;
mod reminder;

pub use chats::*;
pub use preferences::*;
pub use recurring::*;
pub use reminder::*;
