/// Address separator.
pub const SEPARATOR: char = '/';

/// Leading byte of every type-tag string.
pub const TYPE_TAG_PREFIX: u8 = b',';

/// Marker that opens a bundle. Bundles are not supported.
pub const BUNDLE_MARKER: &[u8; 8] = b"#bundle\0";

/// Argument type tags.
pub const TAG_INT: u8 = b'i';
pub const TAG_FLOAT: u8 = b'f';
pub const TAG_DOUBLE: u8 = b'd';
pub const TAG_STRING: u8 = b's';
pub const TAG_TRUE: u8 = b'T';
pub const TAG_FALSE: u8 = b'F';

/// Every field on the wire is aligned to four bytes.
pub const ALIGNMENT: usize = 4;

/// How an address path is joined when it goes on the wire.
///
/// Participant devices expect `brain/node`, browser clients expect `/brain/node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Relative,
    Absolute,
}

impl Framing {
    pub fn join<S: AsRef<str>>(self, segments: &[S]) -> String {
        let joined = segments
            .iter()
            .map(|s| s.as_ref())
            .collect::<Vec<_>>()
            .join("/");
        match self {
            Framing::Relative => joined,
            Framing::Absolute => format!("{SEPARATOR}{joined}"),
        }
    }
}

/// Split an address into its segments, accepting either framing.
pub fn split_address(address: &str) -> Vec<&str> {
    address
        .strip_prefix(SEPARATOR)
        .unwrap_or(address)
        .split(SEPARATOR)
        .collect()
}
