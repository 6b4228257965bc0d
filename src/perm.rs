//! Permission bitmask shared by descriptors and maps.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Access permissions for a descriptor or map: read=1, write=2, execute=4.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Perm: u8 {
        const READ = 1;
        const WRITE = 2;
        const EXEC = 4;
    }
}

impl Perm {
    /// Read-only, the default open mode.
    pub fn r() -> Self {
        Perm::READ
    }

    /// Read-write.
    pub fn rw() -> Self {
        Perm::READ | Perm::WRITE
    }

    /// Read-write-execute, used for debugger-backed targets.
    pub fn rwx() -> Self {
        Perm::READ | Perm::WRITE | Perm::EXEC
    }
}

impl fmt::Display for Perm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::with_capacity(3);
        s.push(if self.contains(Perm::READ) { 'r' } else { '-' });
        s.push(if self.contains(Perm::WRITE) { 'w' } else { '-' });
        s.push(if self.contains(Perm::EXEC) { 'x' } else { '-' });
        write!(f, "{}", s)
    }
}
