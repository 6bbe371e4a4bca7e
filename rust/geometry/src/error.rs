// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for geometry decoding.

/// Result type alias for geometry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding a geometry BLOB.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The BLOB ended before the declared content was read.
    #[error("truncated geometry blob: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// A marker byte did not have the expected value.
    #[error("invalid geometry blob: expected marker 0x{expected:02X} at offset {offset}, found 0x{found:02X}")]
    BadMarker {
        offset: usize,
        expected: u8,
        found: u8,
    },

    /// The endianness flag is neither little nor big endian.
    #[error("invalid geometry blob: unknown endianness flag 0x{0:02X}")]
    BadEndianness(u8),

    /// The class code is not one this codec understands.
    #[error("unsupported geometry class {0}")]
    UnsupportedClass(i32),

    /// A count field was negative.
    #[error("invalid geometry blob: negative count {0}")]
    NegativeCount(i32),

    /// Bytes remained after the end marker.
    #[error("invalid geometry blob: {0} trailing bytes")]
    TrailingBytes(usize),
}
