/// Flags controlling how a [`crate::ConfSimple`] parses and compares keys.
///
/// Mirrors the bitfield accepted by the original `ConfSimple(int flags, ...)`
/// constructor: read-only, tilde-expansion of section names, value
/// right-trim suppression, and independent case sensitivity for submap
/// (section) names and for keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub read_only: bool,
    pub tilde_expand: bool,
    pub no_trim_values: bool,
    pub submap_no_case: bool,
    pub key_no_case: bool,
}

impl Flags {
    pub const NONE: Flags = Flags {
        read_only: false,
        tilde_expand: false,
        no_trim_values: false,
        submap_no_case: false,
        key_no_case: false,
    };

    pub fn read_only() -> Self {
        Flags {
            read_only: true,
            ..Flags::NONE
        }
    }

    pub fn no_case() -> Self {
        Flags {
            submap_no_case: true,
            key_no_case: true,
            ..Flags::NONE
        }
    }

    pub(crate) fn norm_key(&self, s: &str) -> String {
        if self.key_no_case {
            s.to_lowercase()
        } else {
            s.to_string()
        }
    }

    pub(crate) fn norm_section(&self, s: &str) -> String {
        if self.submap_no_case {
            s.to_lowercase()
        } else {
            s.to_string()
        }
    }
}
