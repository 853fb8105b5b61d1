//! Raw, arena-owned node shapes for the account registry and subscription
//! graph, plus the pointer-level helpers that walk them.
//!
//! These live outside Rust's ordinary ownership model on purpose: every
//! `AccountNode`/`EdgeNode` is carved out of a [`crate::arena::HeapArena`] by
//! hand (`arena.allocate` + `ptr::write`) and torn down by hand
//! (`ptr::drop_in_place` is never called — there is nothing to drop, every
//! field here is `Copy` or itself arena-owned). The broker is the only code
//! that ever touches these pointers; nothing here is `pub` outside the
//! `broker` module.

use crate::broker::event::EventCallback;
use crate::pingpong::PingPongBuffer;

pub(crate) struct AccountNode {
    pub id_ptr: *mut u8,
    pub id_len: usize,
    pub user_data: *mut u8,
    pub buffer_size: usize,
    pub buffer: Option<PingPongBuffer>,
    pub on_event: Option<EventCallback>,
    pub publishers: *mut EdgeNode,
    pub subscribers: *mut EdgeNode,
    pub next: *mut AccountNode,
}

pub(crate) struct EdgeNode {
    pub account: *mut AccountNode,
    pub next: *mut EdgeNode,
}

/// Reconstructs the account's id as a `&str` borrowed from arena storage.
///
/// # Safety
/// `node` must point at a live `AccountNode` whose `id_ptr`/`id_len` were
/// written by `copy_id` (always valid UTF-8, since it is a byte-for-byte
/// copy of a caller-supplied `&str`).
pub(crate) unsafe fn id_str<'n>(node: &'n AccountNode) -> &'n str {
    if node.id_len == 0 {
        return "";
    }
    core::str::from_utf8_unchecked(core::slice::from_raw_parts(node.id_ptr, node.id_len))
}

/// Appends `node` to the tail of the singly-linked edge list `head`, so that
/// walking from `head` visits edges in the order they were linked. Publish
/// order is observable to callers (spec: subscribers are invoked in the
/// order they were subscribed), so insertion here must be FIFO, not LIFO.
///
/// # Safety
/// Every node reachable from `*head` must be live; `node` must not already
/// appear in the list.
pub(crate) unsafe fn append_edge(head: &mut *mut EdgeNode, node: *mut EdgeNode) {
    if head.is_null() {
        *head = node;
        return;
    }
    let mut tail = *head;
    while !(*tail).next.is_null() {
        tail = (*tail).next;
    }
    (*tail).next = node;
}

/// True if `target` appears anywhere in the singly-linked edge list `head`.
///
/// # Safety
/// Every node reachable from `head` must be live.
pub(crate) unsafe fn edge_exists(head: *mut EdgeNode, target: *mut AccountNode) -> bool {
    let mut current = head;
    while !current.is_null() {
        if core::ptr::eq((*current).account, target) {
            return true;
        }
        current = (*current).next;
    }
    false
}

/// Unlinks and returns the first edge node referencing `target`, if any.
/// The caller is responsible for freeing the returned node's memory.
///
/// # Safety
/// Every node reachable from `*head` must be live.
pub(crate) unsafe fn unlink_edge_to(
    head: &mut *mut EdgeNode,
    target: *mut AccountNode,
) -> *mut EdgeNode {
    let mut prev: *mut EdgeNode = core::ptr::null_mut();
    let mut current = *head;
    while !current.is_null() {
        let next = (*current).next;
        if core::ptr::eq((*current).account, target) {
            if prev.is_null() {
                *head = next;
            } else {
                (*prev).next = next;
            }
            return current;
        }
        prev = current;
        current = next;
    }
    core::ptr::null_mut()
}
