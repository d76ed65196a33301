// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

//! Opaque descriptor handles.

/// An OS-assigned integer identifying a kernel descriptor.
pub type Handle = std::os::fd::RawFd;

/// The distinguished sentinel for "no handle".
pub const INVALID_HANDLE: Handle = -1;
