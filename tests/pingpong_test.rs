//! Ping-pong buffer integration tests.
//!
//! These exercise the discard-on-read commit/publish cache directly: nothing
//! is readable before the first commit, a committed frame survives one read
//! and then discards, and an unread committed half is never clobbered by a
//! subsequent write.

use arena_broker::pingpong::PingPongBuffer;

#[test]
fn nothing_readable_before_first_commit() {
    let mut a = [0u8; 8];
    let mut b = [0u8; 8];
    let pp = PingPongBuffer::new(a.as_mut_ptr(), b.as_mut_ptr(), 8);
    assert!(pp.read_buf().is_none());
    assert!(!pp.has_readable());
}

#[test]
fn commit_then_read_then_discard() {
    let mut a = [0u8; 8];
    let mut b = [0u8; 8];
    let mut pp = PingPongBuffer::new(a.as_mut_ptr(), b.as_mut_ptr(), 8);

    let w = pp.write_buf();
    unsafe {
        core::ptr::write_bytes(w, 7, 8);
    }
    pp.set_write_done();
    assert!(pp.has_readable());
    let r = pp.read_buf().expect("committed data should be readable");
    unsafe {
        assert_eq!(*r, 7);
    }

    pp.set_read_done();
    assert!(!pp.has_readable());
    assert!(pp.read_buf().is_none());
}

#[test]
fn write_while_unread_does_not_clobber_the_readable_half() {
    let mut a = [0u8; 4];
    let mut b = [0u8; 4];
    let mut pp = PingPongBuffer::new(a.as_mut_ptr(), b.as_mut_ptr(), 4);

    unsafe {
        core::ptr::write_bytes(pp.write_buf(), 1, 4);
    }
    pp.set_write_done();
    let first_read_ptr = pp.read_buf().unwrap();

    // Write a second frame before the first has been read.
    unsafe {
        core::ptr::write_bytes(pp.write_buf(), 2, 4);
    }
    // The not-yet-consumed readable half is untouched by the new write.
    unsafe {
        assert_eq!(*first_read_ptr, 1);
    }
}
