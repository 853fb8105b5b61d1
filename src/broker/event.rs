//! Event payload delivered to an account's callback.

use crate::error::ResultCode;

/// Which verb triggered a callback invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    None,
    Publish,
    Pull,
    Notify,
    Timer,
}

/// The argument passed to every [`EventCallback`].
///
/// `data`/`size` describe a byte region whose meaning depends on `event`:
/// for `Publish` and `Notify` it is the sender's payload (read-only from the
/// callback's perspective); for `Pull` it is the caller's output buffer,
/// which the callback is expected to fill.
pub struct EventParam<'a> {
    pub event: EventKind,
    pub from_id: &'a str,
    pub to_id: &'a str,
    pub data: *const u8,
    pub size: usize,
}

/// Per-account event callback. `ctx` is the account's own `user_data`
/// pointer, handed back uninterpreted.
pub type EventCallback = fn(ctx: *mut u8, event: &EventParam) -> ResultCode;
