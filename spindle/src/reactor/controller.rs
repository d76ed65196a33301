// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

// cspell:words CLOEXEC NONBLOCK eventfd

//! The controller: an `eventfd` the reactor keeps registered readable so
//! other threads can break a blocking wait promptly.

use crate::error::{Error, Result};
use crate::reactor::handle::Handle;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tracing::trace;

/// Wake mechanism for blocked waiters.
///
/// [`Controller::interrupt`] adds to the eventfd counter, making the
/// descriptor readable and forcing the OS wait to return;
/// [`Controller::acknowledge`] drains the counter. The reactor recreates
/// the controller transparently if either side errors.
pub struct Controller {
    event_fd: OwnedFd,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("event_fd", &self.event_fd.as_raw_fd())
            .finish()
    }
}

impl Controller {
    /// Creates the eventfd (close-on-exec, non-blocking).
    ///
    /// # Errors
    ///
    /// Returns the classified OS error when the descriptor cannot be
    /// created.
    pub fn new() -> Result<Self> {
        // Safety: eventfd takes no pointers.
        let fd = unsafe {
            libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK)
        };
        if fd < 0 {
            return Err(Error::last_os_error());
        }
        trace!("Controller fd {fd} created");
        // Safety: fd was just returned by eventfd and is not owned
        // elsewhere.
        let event_fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { event_fd })
    }

    #[must_use]
    pub fn handle(&self) -> Handle { self.event_fd.as_raw_fd() }

    /// Posts `wakeups` wake tokens. A full counter already guarantees a
    /// pending wake, so overflow is absorbed.
    ///
    /// # Errors
    ///
    /// Returns the classified OS error when the write fails; the caller
    /// should recreate the controller.
    pub fn interrupt(&self, wakeups: u64) -> Result<()> {
        let value = wakeups.max(1).to_ne_bytes();
        // Safety: writes eight bytes from a live buffer.
        let rc = unsafe {
            libc::write(
                self.event_fd.as_raw_fd(),
                value.as_ptr().cast(),
                value.len(),
            )
        };
        if rc == value.len() as isize {
            return Ok(());
        }
        let source = io::Error::last_os_error();
        if source.kind() == io::ErrorKind::WouldBlock {
            // Counter saturated: the waiters are already due to wake.
            return Ok(());
        }
        Err(Error::from(source))
    }

    /// Drains any queued wake tokens.
    ///
    /// # Errors
    ///
    /// Returns the classified OS error when the read fails; the caller
    /// should recreate the controller.
    pub fn acknowledge(&self) -> Result<()> {
        let mut value = [0u8; 8];
        // Safety: reads eight bytes into a live buffer.
        let rc = unsafe {
            libc::read(
                self.event_fd.as_raw_fd(),
                value.as_mut_ptr().cast(),
                value.len(),
            )
        };
        if rc == value.len() as isize {
            return Ok(());
        }
        let source = io::Error::last_os_error();
        if source.kind() == io::ErrorKind::WouldBlock {
            // Another waiter drained it first.
            return Ok(());
        }
        Err(Error::from(source))
    }
}
