// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

// cspell:words EPOLLERR EPOLLET EPOLLHUP EPOLLIN EPOLLONESHOT EPOLLOUT
// cspell:words EPOLLPRI EPOLLRDHUP CLOEXEC DONTWAIT ERRQUEUE epfd getsockopt
// cspell:words maxevents sockopt

//! The OS event set: a thin wrapper over the `epoll` control interface plus
//! the socket-error helpers the dispatch loop needs. All unsafe syscall
//! plumbing in the reactor lives in this file.

use crate::error::{Error, Result};
use crate::reactor::event::{Notification, NotificationQueue};
use crate::reactor::handle::Handle;
use crate::reactor::interest::{Interest, Trigger};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tracing::trace;

/// Builds the `" EPOLLIN EPOLLOUT …"` suffix for trace lines.
fn describe_events(events: u32) -> String {
    const NAMES: [(u32, &str); 8] = [
        (libc::EPOLLIN as u32, " EPOLLIN"),
        (libc::EPOLLOUT as u32, " EPOLLOUT"),
        (libc::EPOLLERR as u32, " EPOLLERR"),
        (libc::EPOLLHUP as u32, " EPOLLHUP"),
        (libc::EPOLLRDHUP as u32, " EPOLLRDHUP"),
        (libc::EPOLLPRI as u32, " EPOLLPRI"),
        (libc::EPOLLET as u32, " EPOLLET"),
        (libc::EPOLLONESHOT as u32, " EPOLLONESHOT"),
    ];
    let mut text = String::new();
    for (flag, name) in NAMES {
        if events & flag != 0 {
            text.push_str(name);
        }
    }
    text
}

/// Translates recorded interest into an epoll event mask.
///
/// Error and hangup conditions are always reported by the kernel; the
/// error/notifications toggles select dispatch, not registration, so only
/// readable/writable and the delivery modes appear in the mask.
fn event_mask(interest: Interest) -> u32 {
    let mut events: u32 = 0;
    if interest.want_readable() {
        events |= libc::EPOLLIN as u32;
    }
    if interest.want_writable() {
        events |= libc::EPOLLOUT as u32;
    }
    if interest.trigger() == Trigger::Edge {
        events |= libc::EPOLLET as u32;
    }
    if interest.one_shot() {
        events |= libc::EPOLLONESHOT as u32;
    }
    events
}

/// One polled readiness report, as the dispatch loop consumes it.
#[derive(Debug, Clone, Copy)]
pub struct PolledEvent {
    pub handle: Handle,
    pub events: u32,
}

impl PolledEvent {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.events & libc::EPOLLERR as u32 != 0
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.events & libc::EPOLLOUT as u32 != 0
    }

    #[must_use]
    pub fn is_readable_or_hangup(&self) -> bool {
        self.events
            & (libc::EPOLLIN as u32
                | libc::EPOLLRDHUP as u32
                | libc::EPOLLHUP as u32)
            != 0
    }

    /// True when hangup was the sole signal; the driver then removes the
    /// descriptor from the event set after the readable dispatch.
    #[must_use]
    pub fn is_hangup_only(&self) -> bool {
        self.events == libc::EPOLLHUP as u32
    }
}

/// Owns the epoll descriptor and serializes interest into it.
///
/// `epoll_ctl` is thread-safe at the kernel level; callers serialize
/// per-descriptor updates with the registry's entry locks.
pub struct EpollSet {
    epoll_fd: OwnedFd,
}

impl std::fmt::Debug for EpollSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpollSet")
            .field("epoll_fd", &self.epoll_fd.as_raw_fd())
            .finish()
    }
}

impl EpollSet {
    /// Creates the epoll descriptor (close-on-exec).
    ///
    /// # Errors
    ///
    /// Returns the classified OS error when the kernel refuses the
    /// descriptor (fd limits, memory).
    pub fn new() -> Result<Self> {
        // Safety: epoll_create1 takes no pointers; a non-negative return is
        // a descriptor this process owns.
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(Error::last_os_error());
        }
        trace!("Epoll fd {fd} created");
        // Safety: fd was just returned by epoll_create1 and is not owned
        // elsewhere.
        let epoll_fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { epoll_fd })
    }

    fn ctl(&self, op: libc::c_int, handle: Handle, events: u32) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events,
            u64: handle as u64,
        };
        // Safety: `event` outlives the call; `handle` validity is the
        // caller's contract (kernel reports EBADF/ENOENT otherwise).
        let rc = unsafe {
            libc::epoll_ctl(self.epoll_fd.as_raw_fd(), op, handle, &mut event)
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Adds `handle` with `interest` to the event set.
    ///
    /// # Errors
    ///
    /// Returns the classified OS error from `epoll_ctl`.
    pub fn add(&self, handle: Handle, interest: Interest) -> Result<()> {
        let events = event_mask(interest);
        match self.ctl(libc::EPOLL_CTL_ADD, handle, events) {
            Ok(()) => {
                trace!(
                    "Descriptor {handle} added{}",
                    describe_events(events)
                );
                Ok(())
            }
            Err(source) => {
                trace!("Failed to add descriptor {handle}: {source}");
                Err(Error::from(source))
            }
        }
    }

    /// Re-arms `handle` with `interest`.
    ///
    /// A descriptor is artificially removed from the set each time it polls
    /// hangup-only, but later registrations are allowed to re-add it; the
    /// ENOENT fallback to ADD implements that.
    ///
    /// # Errors
    ///
    /// Returns the classified OS error from `epoll_ctl`.
    pub fn update(&self, handle: Handle, interest: Interest) -> Result<()> {
        let events = event_mask(interest);
        match self.ctl(libc::EPOLL_CTL_MOD, handle, events) {
            Ok(()) => {
                trace!(
                    "Descriptor {handle} updated{}",
                    describe_events(events)
                );
                Ok(())
            }
            Err(source) if source.raw_os_error() == Some(libc::ENOENT) => {
                match self.ctl(libc::EPOLL_CTL_ADD, handle, events) {
                    Ok(()) => {
                        trace!(
                            "Descriptor {handle} updated{}",
                            describe_events(events)
                        );
                        Ok(())
                    }
                    Err(source) => {
                        trace!(
                            "Failed to update descriptor {handle}: {source}"
                        );
                        Err(Error::from(source))
                    }
                }
            }
            Err(source) => {
                trace!("Failed to update descriptor {handle}: {source}");
                Err(Error::from(source))
            }
        }
    }

    /// Removes `handle` from the event set. Removal of a descriptor the
    /// kernel no longer tracks is not an error.
    ///
    /// # Errors
    ///
    /// Returns the classified OS error from `epoll_ctl`.
    pub fn remove(&self, handle: Handle) -> Result<()> {
        match self.ctl(libc::EPOLL_CTL_DEL, handle, 0) {
            Ok(()) => {
                trace!("Descriptor {handle} removed");
                Ok(())
            }
            Err(source) if source.raw_os_error() == Some(libc::ENOENT) => {
                Ok(())
            }
            Err(source) => {
                trace!("Failed to remove descriptor {handle}: {source}");
                Err(Error::from(source))
            }
        }
    }

    /// Blocks until readiness or timeout. `timeout_ms < 0` waits
    /// indefinitely. Returns the polled batch, at most `max_events` long.
    ///
    /// # Errors
    ///
    /// Returns the raw OS error; the driver absorbs `EINTR` itself.
    pub fn wait(
        &self,
        results: &mut Vec<PolledEvent>,
        max_events: usize,
        timeout_ms: i32,
    ) -> io::Result<usize> {
        results.clear();
        let mut raw: Vec<libc::epoll_event> = Vec::with_capacity(max_events);
        // Safety: the spare capacity is max_events entries; epoll_wait
        // writes at most that many and reports the count written.
        let rc = unsafe {
            libc::epoll_wait(
                self.epoll_fd.as_raw_fd(),
                raw.as_mut_ptr(),
                max_events as libc::c_int,
                timeout_ms,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        let count = rc as usize;
        // Safety: the kernel initialized the first `count` entries.
        unsafe {
            raw.set_len(count);
        }
        for event in &raw {
            let handle = event.u64 as Handle;
            trace!(
                "Descriptor {handle} polled{}",
                describe_events(event.events)
            );
            results.push(PolledEvent {
                handle,
                events: event.events,
            });
        }
        Ok(count)
    }
}

/// Queries and clears the pending socket error on `handle`.
///
/// Returns `Ok(None)` when the socket reports no error.
///
/// # Errors
///
/// Returns the classified OS error when the query itself fails.
pub fn take_socket_error(handle: Handle) -> Result<Option<Error>> {
    let mut so_error: libc::c_int = 0;
    let mut len = size_of::<libc::c_int>() as libc::socklen_t;
    // Safety: `so_error`/`len` outlive the call and len matches the buffer.
    let rc = unsafe {
        libc::getsockopt(
            handle,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            (&raw mut so_error).cast(),
            &raw mut len,
        )
    };
    if rc != 0 {
        return Err(Error::last_os_error());
    }
    if so_error == 0 {
        Ok(None)
    } else {
        Ok(Some(Error::from_raw_os_error(so_error)))
    }
}

/// Drains the socket's error queue into `queue` without blocking.
///
/// The payloads are opaque to the core; an empty drain is success.
///
/// # Errors
///
/// Returns the classified OS error when the drain fails for a reason other
/// than an empty queue.
pub fn receive_notifications(
    queue: &mut NotificationQueue,
    handle: Handle,
) -> Result<()> {
    let mut buffer = [0u8; 2048];
    loop {
        // Safety: buffer outlives the call; length matches.
        let rc = unsafe {
            libc::recv(
                handle,
                buffer.as_mut_ptr().cast(),
                buffer.len(),
                libc::MSG_ERRQUEUE | libc::MSG_DONTWAIT,
            )
        };
        if rc < 0 {
            let source = io::Error::last_os_error();
            if source.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(Error::from(source));
        }
        if rc == 0 {
            return Ok(());
        }
        queue.push(Notification::new(buffer[..rc as usize].to_vec()));
    }
}
