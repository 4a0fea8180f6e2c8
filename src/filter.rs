use crate::classfile::{AccessFlags, CLINIT};

bitflags::bitflags! {
    /// Which member visibilities (and whether compiler-synthetic members) survive stubbing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VisibilityMask: u8 {
        const PRIVATE = 0x01;
        const PUBLIC = 0x02;
        const PROTECTED = 0x04;
        const PACKAGE = 0x08;
        const SYNTHETIC = 0x10;
    }
}

impl Default for VisibilityMask {
    fn default() -> Self {
        VisibilityMask::all()
    }
}

impl VisibilityMask {
    /// Visibility bits a member carries; package-default when none of the three access bits is set.
    pub fn of(flags: AccessFlags) -> VisibilityMask {
        let mut v = VisibilityMask::empty();
        if flags.contains(AccessFlags::PUBLIC) {
            v |= VisibilityMask::PUBLIC;
        }
        if flags.contains(AccessFlags::PRIVATE) {
            v |= VisibilityMask::PRIVATE;
        }
        if flags.contains(AccessFlags::PROTECTED) {
            v |= VisibilityMask::PROTECTED;
        }
        if v.is_empty() {
            v = VisibilityMask::PACKAGE;
        }
        v
    }
}

/// Keep/drop decision for fields and methods. Pure function of the flags and the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberFilter {
    pub mask: VisibilityMask,
    pub preserve_references: bool,
}

impl MemberFilter {
    pub fn new(mask: VisibilityMask, preserve_references: bool) -> Self {
        Self {
            mask,
            preserve_references,
        }
    }

    pub fn keep_field(&self, flags: AccessFlags) -> bool {
        self.visible(flags)
    }

    pub fn keep_method(&self, name: &[u8], flags: AccessFlags) -> bool {
        if name == CLINIT && !self.preserve_references {
            return false;
        }
        self.visible(flags)
    }

    fn visible(&self, flags: AccessFlags) -> bool {
        if flags.contains(AccessFlags::SYNTHETIC) && !self.mask.contains(VisibilityMask::SYNTHETIC) {
            return false;
        }
        self.mask.intersects(VisibilityMask::of(flags))
    }
}
