//! `AccountBroker` — a named registry of accounts that publish to and
//! subscribe from one another, layered entirely on a [`HeapArena`].
//!
//! Every account record, id copy, subscription edge, and ping-pong buffer
//! lives in arena memory reached through raw pointers; nothing here touches
//! Rust's global allocator. The registry is a singly-linked list with
//! `head`/`tail`; each account's publisher/subscriber sets are themselves
//! singly-linked edge lists, maintained symmetrically on every mutation.
//!
//! `publish` snapshots the subscriber list into an arena-allocated buffer
//! sized to the live subscriber count before invoking any callback, and
//! releases the broker's critical section before the invocation loop
//! starts. That is what lets a subscriber's own callback turn around and
//! call `unsubscribe` (or even `publish` on a different account) without
//! deadlocking against itself — the cost, as for any snapshot-then-act
//! design, is that an edge created mid-walk is not observed by that walk.

mod account;
pub mod event;

use crate::arena::HeapArena;
use crate::error::ResultCode;
use crate::pingpong::PingPongBuffer;
use crate::sync::{CriticalCell, CriticalSection};

use account::{AccountNode, EdgeNode};
pub use event::{EventCallback, EventKind, EventParam};

struct RegistryState {
    head: *mut AccountNode,
    tail: *mut AccountNode,
    count: usize,
}

/// A named pub/sub account registry over a single [`HeapArena`].
///
/// Like `HeapArena`, this is an ordinary value — construct as many brokers
/// as you like, each against its own arena (or the same one, if the caller
/// wants to share capacity).
pub struct AccountBroker<'a> {
    arena: &'a HeapArena,
    state: CriticalCell<RegistryState>,
}

// SAFETY: all mutable access to `state` goes through `with_state`, which
// brackets the access through `CriticalCell::lock` under the crate's
// single-threaded cooperative concurrency contract; the raw pointers stored
// in `RegistryState` never move between threads on their own.
unsafe impl Sync for AccountBroker<'_> {}

impl<'a> AccountBroker<'a> {
    /// Builds an empty broker over `arena`.
    pub fn init(arena: &'a HeapArena, critical_section: CriticalSection) -> AccountBroker<'a> {
        AccountBroker {
            arena,
            state: CriticalCell::new(
                RegistryState {
                    head: core::ptr::null_mut(),
                    tail: core::ptr::null_mut(),
                    count: 0,
                },
                critical_section,
            ),
        }
    }

    /// Deletes every account, tearing down all edges and freeing all
    /// arena memory the registry holds.
    pub fn deinit(&self) {
        self.with_state(|state| {
            while !state.head.is_null() {
                let node = state.head;
                self.delete_node_locked(state, node);
            }
        });
    }

    /// Number of accounts currently registered.
    pub fn account_count(&self) -> usize {
        self.with_state(|state| state.count)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut RegistryState) -> R) -> R {
        let mut guard = self.state.lock();
        f(&mut guard)
    }

    fn find_locked(&self, state: &RegistryState, id: &str) -> Option<*mut AccountNode> {
        let mut current = state.head;
        while !current.is_null() {
            // SAFETY: every node reachable from `head` is a live account
            // this broker allocated and has not yet deleted.
            let node = unsafe { &*current };
            if unsafe { account::id_str(node) } == id {
                return Some(current);
            }
            current = node.next;
        }
        None
    }

    fn push_back_locked(&self, state: &mut RegistryState, node: *mut AccountNode) {
        if state.head.is_null() {
            state.head = node;
            state.tail = node;
        } else {
            // SAFETY: `state.tail` is live whenever `state.head` is non-null.
            unsafe {
                (*state.tail).next = node;
            }
            state.tail = node;
        }
        state.count += 1;
    }

    fn unlink_locked(&self, state: &mut RegistryState, target: *mut AccountNode) {
        let mut prev: *mut AccountNode = core::ptr::null_mut();
        let mut current = state.head;
        while !current.is_null() {
            // SAFETY: every node reachable from `head` is live.
            let next = unsafe { (*current).next };
            if core::ptr::eq(current, target) {
                if prev.is_null() {
                    state.head = next;
                } else {
                    // SAFETY: `prev` was reached by the same live-chain walk.
                    unsafe {
                        (*prev).next = next;
                    }
                }
                if core::ptr::eq(state.tail, target) {
                    state.tail = prev;
                }
                return;
            }
            prev = current;
            current = next;
        }
    }

    fn copy_id(&self, id: &str) -> Option<(*mut u8, usize)> {
        let len = id.len();
        if len == 0 {
            return Some((core::ptr::NonNull::dangling().as_ptr(), 0));
        }
        let dst = self.arena.allocate(len);
        if dst.is_null() {
            return None;
        }
        // SAFETY: `dst` is `len` freshly allocated writable bytes; `id`'s
        // bytes are `len` readable bytes; the two regions cannot overlap.
        unsafe {
            core::ptr::copy_nonoverlapping(id.as_bytes().as_ptr(), dst, len);
        }
        Some((dst, len))
    }

    fn free_id(&self, ptr: *mut u8, len: usize) {
        if len > 0 {
            self.arena.free(ptr);
        }
    }

    /// Registers a new account. Rejects a duplicate `id` without mutating
    /// anything. If `buffer_size > 0`, also carves out a ping-pong cache of
    /// `2 * buffer_size` bytes. Any sub-allocation failure rolls back every
    /// allocation already made for this call and returns `false`.
    pub fn create_account(&self, id: &str, buffer_size: usize, user_data: *mut u8) -> bool {
        self.with_state(|state| self.create_account_locked(state, id, buffer_size, user_data))
    }

    fn create_account_locked(
        &self,
        state: &mut RegistryState,
        id: &str,
        buffer_size: usize,
        user_data: *mut u8,
    ) -> bool {
        if self.find_locked(state, id).is_some() {
            return false;
        }

        let node_ptr = self.arena.allocate(core::mem::size_of::<AccountNode>()) as *mut AccountNode;
        if node_ptr.is_null() {
            return false;
        }

        let (id_ptr, id_len) = match self.copy_id(id) {
            Some(v) => v,
            None => {
                self.arena.free(node_ptr as *mut u8);
                return false;
            }
        };

        let buffer = if buffer_size > 0 {
            let raw = self.arena.allocate(buffer_size * 2);
            if raw.is_null() {
                self.free_id(id_ptr, id_len);
                self.arena.free(node_ptr as *mut u8);
                return false;
            }
            // SAFETY: `raw` is `buffer_size * 2` fresh bytes; the two halves
            // are disjoint, equally sized, and both stay within `raw`'s
            // allocation for the buffer's whole lifetime.
            let buf1 = unsafe { raw.add(buffer_size) };
            Some(PingPongBuffer::new(raw, buf1, buffer_size))
        } else {
            None
        };

        // SAFETY: `node_ptr` is fresh, correctly sized storage for one
        // `AccountNode`; nothing has read it yet.
        unsafe {
            core::ptr::write(
                node_ptr,
                AccountNode {
                    id_ptr,
                    id_len,
                    user_data,
                    buffer_size,
                    buffer,
                    on_event: None,
                    publishers: core::ptr::null_mut(),
                    subscribers: core::ptr::null_mut(),
                    next: core::ptr::null_mut(),
                },
            );
        }

        self.push_back_locked(state, node_ptr);
        true
    }

    /// Removes an account, tearing down both directions of every incident
    /// edge and freeing its ping-pong buffer and record. Returns `false` if
    /// `id` is not registered.
    pub fn delete_account(&self, id: &str) -> bool {
        self.with_state(|state| match self.find_locked(state, id) {
            Some(node) => {
                self.delete_node_locked(state, node);
                true
            }
            None => false,
        })
    }

    fn delete_node_locked(&self, state: &mut RegistryState, target: *mut AccountNode) {
        // SAFETY: `target` is a live node owned by this broker; we hold the
        // only reference to it while the critical section is held.
        unsafe {
            if let Some(buffer) = (*target).buffer.take() {
                self.arena.free(buffer.base_ptr());
            }

            let mut pub_edge = (*target).publishers;
            while !pub_edge.is_null() {
                let publisher = (*pub_edge).account;
                let stray = account::unlink_edge_to(&mut (*publisher).subscribers, target);
                if !stray.is_null() {
                    self.arena.free(stray as *mut u8);
                }
                let next = (*pub_edge).next;
                self.arena.free(pub_edge as *mut u8);
                pub_edge = next;
            }

            let mut sub_edge = (*target).subscribers;
            while !sub_edge.is_null() {
                let subscriber = (*sub_edge).account;
                let stray = account::unlink_edge_to(&mut (*subscriber).publishers, target);
                if !stray.is_null() {
                    self.arena.free(stray as *mut u8);
                }
                let next = (*sub_edge).next;
                self.arena.free(sub_edge as *mut u8);
                sub_edge = next;
            }

            self.free_id((*target).id_ptr, (*target).id_len);
        }

        self.unlink_locked(state, target);
        state.count -= 1;
        self.arena.free(target as *mut u8);
    }

    /// Creates a subscription edge `subscriber -> publisher` (subscriber
    /// receives publisher's events). Rejects self-subscription, a missing
    /// endpoint, or a duplicate edge, leaving the graph untouched on
    /// failure.
    pub fn subscribe(&self, subscriber_id: &str, publisher_id: &str) -> bool {
        if subscriber_id == publisher_id {
            return false;
        }
        self.with_state(|state| self.subscribe_locked(state, subscriber_id, publisher_id))
    }

    fn subscribe_locked(
        &self,
        state: &mut RegistryState,
        subscriber_id: &str,
        publisher_id: &str,
    ) -> bool {
        let subscriber = match self.find_locked(state, subscriber_id) {
            Some(p) => p,
            None => return false,
        };
        let publisher = match self.find_locked(state, publisher_id) {
            Some(p) => p,
            None => return false,
        };

        // SAFETY: both pointers are live nodes found above.
        unsafe {
            if account::edge_exists((*subscriber).publishers, publisher) {
                return false;
            }

            let edge_on_subscriber =
                self.arena.allocate(core::mem::size_of::<EdgeNode>()) as *mut EdgeNode;
            if edge_on_subscriber.is_null() {
                return false;
            }
            let edge_on_publisher =
                self.arena.allocate(core::mem::size_of::<EdgeNode>()) as *mut EdgeNode;
            if edge_on_publisher.is_null() {
                self.arena.free(edge_on_subscriber as *mut u8);
                return false;
            }

            core::ptr::write(
                edge_on_subscriber,
                EdgeNode {
                    account: publisher,
                    next: core::ptr::null_mut(),
                },
            );
            account::append_edge(&mut (*subscriber).publishers, edge_on_subscriber);

            core::ptr::write(
                edge_on_publisher,
                EdgeNode {
                    account: subscriber,
                    next: core::ptr::null_mut(),
                },
            );
            account::append_edge(&mut (*publisher).subscribers, edge_on_publisher);
        }
        true
    }

    /// Removes the subscription edge `subscriber -> publisher`. Returns
    /// `false` if either endpoint is missing or the edge does not exist.
    pub fn unsubscribe(&self, subscriber_id: &str, publisher_id: &str) -> bool {
        if subscriber_id == publisher_id {
            return false;
        }
        self.with_state(|state| self.unsubscribe_locked(state, subscriber_id, publisher_id))
    }

    fn unsubscribe_locked(
        &self,
        state: &mut RegistryState,
        subscriber_id: &str,
        publisher_id: &str,
    ) -> bool {
        let subscriber = match self.find_locked(state, subscriber_id) {
            Some(p) => p,
            None => return false,
        };
        let publisher = match self.find_locked(state, publisher_id) {
            Some(p) => p,
            None => return false,
        };

        // SAFETY: both pointers are live nodes found above; the edge
        // symmetry invariant guarantees the mirror exists if the forward
        // edge does, so both `unlink_edge_to` calls below find a node.
        unsafe {
            if !account::edge_exists((*subscriber).publishers, publisher) {
                return false;
            }
            let a = account::unlink_edge_to(&mut (*subscriber).publishers, publisher);
            let b = account::unlink_edge_to(&mut (*publisher).subscribers, subscriber);
            self.arena.free(a as *mut u8);
            self.arena.free(b as *mut u8);
        }
        true
    }

    /// Installs (or replaces) `id`'s event callback. Returns `false` if `id`
    /// is not registered.
    pub fn register_callback(&self, id: &str, callback: EventCallback) -> bool {
        self.with_state(|state| match self.find_locked(state, id) {
            Some(node) => {
                // SAFETY: `node` is a live node found above.
                unsafe {
                    (*node).on_event = Some(callback);
                }
                true
            }
            None => false,
        })
    }

    /// Writes `data` into `id`'s write slot and marks it committed. Fails if
    /// `id` is missing, has no cache, or `data.len()` does not equal the
    /// account's configured buffer size.
    pub fn commit(&self, id: &str, data: &[u8]) -> bool {
        self.with_state(|state| self.commit_locked(state, id, data))
    }

    fn commit_locked(&self, state: &mut RegistryState, id: &str, data: &[u8]) -> bool {
        let node = match self.find_locked(state, id) {
            Some(p) => p,
            None => return false,
        };
        // SAFETY: `node` is a live node found above.
        unsafe {
            if data.is_empty() || data.len() != (*node).buffer_size {
                return false;
            }
            let buffer = match (*node).buffer.as_mut() {
                Some(b) => b,
                None => return false,
            };
            let dst = buffer.write_buf();
            core::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
            buffer.set_write_done();
        }
        true
    }

    /// Delivers `id`'s committed data to every current subscriber, in
    /// subscription order, then marks the slot consumed.
    ///
    /// The subscriber list is copied into an arena-allocated snapshot, sized
    /// to the live subscriber count, while the broker's critical section is
    /// held; every callback then runs after the section has been released,
    /// so a callback may safely re-enter the broker (e.g. to unsubscribe
    /// itself). The snapshot is freed back to the arena once every callback
    /// has run.
    pub fn publish(&self, id: &str) -> ResultCode {
        let prep = self.with_state(
            |state| -> Result<(*const u8, usize, *mut *mut AccountNode, usize), ResultCode> {
                let node = self.find_locked(state, id).ok_or(ResultCode::Unknown)?;
                // SAFETY: `node` is a live node found above.
                unsafe {
                    let buffer = (*node).buffer.as_ref().ok_or(ResultCode::NoCache)?;
                    let read_ptr = buffer.read_buf().ok_or(ResultCode::NoCommitted)?;
                    let size = buffer.region_size();

                    let mut count = 0usize;
                    let mut edge = (*node).subscribers;
                    while !edge.is_null() {
                        count += 1;
                        edge = (*edge).next;
                    }

                    let snapshot = if count == 0 {
                        core::ptr::null_mut()
                    } else {
                        let bytes = count * core::mem::size_of::<*mut AccountNode>();
                        let raw = self.arena.allocate(bytes) as *mut *mut AccountNode;
                        if raw.is_null() {
                            crate::logging::logln(
                                "broker",
                                format_args!(
                                    "publish({}): arena has no room for a {}-subscriber snapshot",
                                    id, count
                                ),
                            );
                            return Err(ResultCode::Unknown);
                        }
                        let mut edge = (*node).subscribers;
                        let mut i = 0usize;
                        while !edge.is_null() {
                            *raw.add(i) = (*edge).account;
                            i += 1;
                            edge = (*edge).next;
                        }
                        raw
                    };

                    Ok((read_ptr, size, snapshot, count))
                }
            },
        );

        let (data_ptr, size, snapshot, snapshot_len) = match prep {
            Ok(v) => v,
            Err(code) => return code,
        };

        let mut last = ResultCode::Unknown;
        let mut any = false;

        for i in 0..snapshot_len {
            // SAFETY: `snapshot` holds `snapshot_len` live `AccountNode`
            // pointers written above; `publish` never frees a subscriber
            // account, only `delete_account` does, and nothing here calls
            // it on these nodes.
            let (cb, ctx, to_id) = unsafe {
                let sub_ptr = *snapshot.add(i);
                let node = &*sub_ptr;
                (node.on_event, node.user_data, account::id_str(node))
            };
            if let Some(cb) = cb {
                let param = EventParam {
                    event: EventKind::Publish,
                    from_id: id,
                    to_id,
                    data: data_ptr,
                    size,
                };
                last = cb(ctx, &param);
                any = true;
            }
        }

        if !snapshot.is_null() {
            self.arena.free(snapshot as *mut u8);
        }

        self.with_state(|state| {
            if let Some(node) = self.find_locked(state, id) {
                // SAFETY: `node` is a live node found above.
                unsafe {
                    if let Some(buffer) = (*node).buffer.as_mut() {
                        buffer.set_read_done();
                    }
                }
            }
        });

        if any {
            last
        } else {
            ResultCode::Unknown
        }
    }

    /// Pulls data from `publisher_id` on behalf of `subscriber_id`.
    ///
    /// If the publisher has a callback, it is invoked with `out_buf` as the
    /// event's data pointer — the callback is expected to fill it — and its
    /// result is returned directly. Otherwise, if a committed read slot of
    /// exactly `out_buf.len()` bytes exists, it is copied into `out_buf` and
    /// consumed.
    pub fn pull(&self, subscriber_id: &str, publisher_id: &str, out_buf: &mut [u8]) -> ResultCode {
        enum Prep {
            Callback(EventCallback, *mut u8),
            Copy,
        }

        let prep = self.with_state(|state| -> Result<Prep, ResultCode> {
            let subscriber = self.find_locked(state, subscriber_id).ok_or(ResultCode::NotFound)?;
            let publisher = self.find_locked(state, publisher_id).ok_or(ResultCode::NotFound)?;
            // SAFETY: both pointers are live nodes found above.
            unsafe {
                if !account::edge_exists((*subscriber).publishers, publisher) {
                    return Err(ResultCode::NotFound);
                }
                if let Some(cb) = (*publisher).on_event {
                    return Ok(Prep::Callback(cb, (*publisher).user_data));
                }
            }
            Ok(Prep::Copy)
        });

        let prep = match prep {
            Ok(p) => p,
            Err(code) => return code,
        };

        match prep {
            Prep::Callback(cb, ctx) => {
                let param = EventParam {
                    event: EventKind::Pull,
                    from_id: subscriber_id,
                    to_id: publisher_id,
                    data: out_buf.as_mut_ptr() as *const u8,
                    size: out_buf.len(),
                };
                cb(ctx, &param)
            }
            Prep::Copy => self.with_state(|state| {
                let publisher = match self.find_locked(state, publisher_id) {
                    Some(p) => p,
                    None => return ResultCode::NotFound,
                };
                // SAFETY: `publisher` is a live node found above.
                unsafe {
                    let buffer = match (*publisher).buffer.as_mut() {
                        Some(b) => b,
                        None => return ResultCode::NoCache,
                    };
                    if buffer.region_size() != out_buf.len() {
                        return ResultCode::SizeMismatch;
                    }
                    let read_ptr = match buffer.read_buf() {
                        Some(p) => p,
                        None => return ResultCode::NoCommitted,
                    };
                    core::ptr::copy_nonoverlapping(read_ptr, out_buf.as_mut_ptr(), out_buf.len());
                    buffer.set_read_done();
                }
                ResultCode::Ok
            }),
        }
    }

    /// Sends `data` directly to `publisher_id`'s callback on behalf of
    /// `subscriber_id`. Fails if either endpoint is missing, the edge does
    /// not exist, or the publisher has no callback registered.
    pub fn notify(&self, subscriber_id: &str, publisher_id: &str, data: &[u8]) -> ResultCode {
        let prep = self.with_state(|state| -> Result<(EventCallback, *mut u8), ResultCode> {
            let subscriber = self.find_locked(state, subscriber_id).ok_or(ResultCode::NotFound)?;
            let publisher = self.find_locked(state, publisher_id).ok_or(ResultCode::NotFound)?;
            // SAFETY: both pointers are live nodes found above.
            unsafe {
                if !account::edge_exists((*subscriber).publishers, publisher) {
                    return Err(ResultCode::NotFound);
                }
                match (*publisher).on_event {
                    Some(cb) => Ok((cb, (*publisher).user_data)),
                    None => Err(ResultCode::NoCallback),
                }
            }
        });

        match prep {
            Ok((cb, ctx)) => {
                let param = EventParam {
                    event: EventKind::Notify,
                    from_id: subscriber_id,
                    to_id: publisher_id,
                    data: data.as_ptr(),
                    size: data.len(),
                };
                cb(ctx, &param)
            }
            Err(code) => code,
        }
    }

    /// Diagnostic enumeration: logs one account, or every account if `id`
    /// is `None`.
    pub fn log_account(&self, id: Option<&str>) {
        self.with_state(|state| match id {
            Some(target) => {
                if let Some(node) = self.find_locked(state, target) {
                    self.log_one(node);
                }
            }
            None => {
                let mut current = state.head;
                while !current.is_null() {
                    self.log_one(current);
                    // SAFETY: every node reachable from `head` is live.
                    current = unsafe { (*current).next };
                }
            }
        })
    }

    fn log_one(&self, node: *mut AccountNode) {
        // SAFETY: `node` is a live node.
        let n = unsafe { &*node };
        crate::logging::logln(
            "broker",
            format_args!(
                "account id={} buffer_size={} has_callback={}",
                unsafe { account::id_str(n) },
                n.buffer_size,
                n.on_event.is_some()
            ),
        );
    }
}
