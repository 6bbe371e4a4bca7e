// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binary layout of a routing graph.
//!
//! A graph is stored as one header BLOB followed by data blocks. Every
//! record is a tag byte followed by little-endian fields:
//!
//! ```text
//! header: START | HEADER nodes:i32 ID|CODE code_len:u8
//!         TABLE FROM TO GEOM NAME (tag len:u16 text NUL) [A_STAR coeff:f64] END
//! block:  BLOCK nodes:u16 node*
//! node:   NODE index:i32 (id:i64 | code[code_len]) [x:f64 y:f64] arcs:u16 arc* END
//! arc:    ARC rowid:i64 to:i32 cost:f64 END
//! ```
//!
//! A node record never spans two blocks, and a block never grows past
//! [`MAX_BLOCK`] bytes unless it holds a single oversized node.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Tags
// ============================================================================

/// Stream start, 32-bit identifiers. Only recognised, never written.
pub const START: u8 = 0x67;
/// Stream start, 64-bit identifiers.
pub const START_64: u8 = 0x68;
/// Stream start, 64-bit identifiers with A* coordinates.
pub const START_A_STAR: u8 = 0x69;
pub const END: u8 = 0x87;
pub const HEADER: u8 = 0xc0;
pub const CODE: u8 = 0xa6;
pub const ID: u8 = 0xb5;
pub const NODE: u8 = 0xde;
pub const ARC: u8 = 0x54;
pub const TABLE: u8 = 0xa0;
pub const FROM: u8 = 0xa1;
pub const TO: u8 = 0xa2;
pub const GEOM: u8 = 0xa3;
pub const NAME: u8 = 0xa4;
pub const A_STAR_COEFF: u8 = 0xa5;
pub const BLOCK: u8 = 0xed;

/// Upper bound on the encoded size of one data block.
pub const MAX_BLOCK: usize = 1024 * 1024;

const ARC_SIZE: usize = 1 + 8 + 4 + 8 + 1;

// ============================================================================
// Records
// ============================================================================

/// External identity of a node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKey {
    Id(i64),
    Code(String),
}

impl NodeKey {
    pub fn id(&self) -> Option<i64> {
        match self {
            NodeKey::Id(id) => Some(*id),
            NodeKey::Code(_) => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            NodeKey::Id(_) => None,
            NodeKey::Code(code) => Some(code),
        }
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKey::Id(id) => write!(f, "{id}"),
            NodeKey::Code(code) => f.write_str(code),
        }
    }
}

/// Graph-wide description stored in the first row of the data table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub node_count: u32,
    /// Nodes are identified by integer ids rather than text codes.
    pub has_ids: bool,
    /// Width of the fixed text code field; 0 for integer ids.
    pub max_code_length: u8,
    pub table: String,
    pub from_column: String,
    pub to_column: String,
    pub geom_column: Option<String>,
    pub name_column: Option<String>,
    /// Minimum cost/length ratio, present when the graph supports A*.
    pub a_star_coeff: Option<f64>,
}

impl Header {
    pub fn a_star(&self) -> bool {
        self.a_star_coeff.is_some()
    }
}

/// One outgoing arc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arc {
    /// ROWID of the input row the arc came from.
    pub rowid: i64,
    /// Dense index of the destination node.
    pub to: u32,
    pub cost: f64,
}

/// A node and its adjacency list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub index: u32,
    pub key: NodeKey,
    pub coords: Option<(f64, f64)>,
    pub arcs: Vec<Arc>,
}

// ============================================================================
// Encoding
// ============================================================================

fn put_field(out: &mut Vec<u8>, tag: u8, text: &str) {
    out.push(tag);
    let len = (text.len() + 1).min(u16::MAX as usize);
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&text.as_bytes()[..len - 1]);
    out.push(0);
}

/// Encodes the header BLOB.
pub fn encode_header(header: &Header) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.push(if header.a_star() { START_A_STAR } else { START_64 });
    out.push(HEADER);
    out.extend_from_slice(&(header.node_count as i32).to_le_bytes());
    out.push(if header.has_ids { ID } else { CODE });
    out.push(if header.has_ids { 0 } else { header.max_code_length });
    put_field(&mut out, TABLE, &header.table);
    put_field(&mut out, FROM, &header.from_column);
    put_field(&mut out, TO, &header.to_column);
    put_field(&mut out, GEOM, header.geom_column.as_deref().unwrap_or(""));
    put_field(&mut out, NAME, header.name_column.as_deref().unwrap_or(""));
    if let Some(coeff) = header.a_star_coeff {
        out.push(A_STAR_COEFF);
        out.extend_from_slice(&coeff.to_le_bytes());
    }
    out.push(END);
    out
}

/// Encoded size of a node record under `header`.
pub fn node_size(header: &Header, arcs: usize) -> usize {
    let key = if header.has_ids { 8 } else { header.max_code_length as usize };
    let coords = if header.a_star() { 16 } else { 0 };
    1 + 4 + key + coords + 2 + arcs * ARC_SIZE + 1
}

/// Encodes one node record.
pub fn encode_node(header: &Header, node: &NodeRecord) -> Result<Vec<u8>> {
    let arc_count = u16::try_from(node.arcs.len())
        .map_err(|_| Error::TooManyArcs(i64::from(node.index)))?;
    let mut out = Vec::with_capacity(node_size(header, node.arcs.len()));
    out.push(NODE);
    out.extend_from_slice(&(node.index as i32).to_le_bytes());
    match &node.key {
        NodeKey::Id(id) => out.extend_from_slice(&id.to_le_bytes()),
        NodeKey::Code(code) => {
            let width = header.max_code_length as usize;
            let bytes = code.as_bytes();
            let used = bytes.len().min(width);
            out.extend_from_slice(&bytes[..used]);
            out.resize(out.len() + width - used, 0);
        }
    }
    if header.a_star() {
        let (x, y) = node.coords.unwrap_or((0.0, 0.0));
        out.extend_from_slice(&x.to_le_bytes());
        out.extend_from_slice(&y.to_le_bytes());
    }
    out.extend_from_slice(&arc_count.to_le_bytes());
    for arc in &node.arcs {
        out.push(ARC);
        out.extend_from_slice(&arc.rowid.to_le_bytes());
        out.extend_from_slice(&(arc.to as i32).to_le_bytes());
        out.extend_from_slice(&arc.cost.to_le_bytes());
        out.push(END);
    }
    out.push(END);
    Ok(out)
}

/// Accumulates node records into one data block.
#[derive(Debug)]
pub struct BlockWriter {
    buf: Vec<u8>,
    nodes: u16,
}

impl Default for BlockWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockWriter {
    pub fn new() -> Self {
        Self {
            buf: vec![BLOCK, 0, 0],
            nodes: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes == 0
    }

    /// False when a record of `size` bytes must go to a fresh block.
    pub fn fits(&self, size: usize) -> bool {
        self.is_empty() || (size < MAX_BLOCK.saturating_sub(self.buf.len()) && self.nodes < u16::MAX)
    }

    pub fn push(&mut self, record: &[u8]) {
        self.buf.extend_from_slice(record);
        self.nodes += 1;
    }

    /// Patches the node count and hands the block over.
    pub fn finish(mut self) -> Vec<u8> {
        self.buf[1..3].copy_from_slice(&self.nodes.to_le_bytes());
        self.buf
    }
}

// ============================================================================
// Decoding
// ============================================================================

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.data.len());
        let end = end.ok_or(Error::InvalidData("truncated record"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn want(&mut self, tag: u8, what: &'static str) -> Result<()> {
        if self.u8()? == tag {
            Ok(())
        } else {
            Err(Error::InvalidData(what))
        }
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    fn index(&mut self) -> Result<u32> {
        u32::try_from(self.i32()?).map_err(|_| Error::InvalidData("negative node index"))
    }

    fn field(&mut self, tag: u8) -> Result<String> {
        self.want(tag, "unexpected header field")?;
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        let text = bytes.strip_suffix(&[0]).ok_or(Error::InvalidData("unterminated text field"))?;
        String::from_utf8(text.to_vec()).map_err(|_| Error::InvalidData("text field is not UTF-8"))
    }
}

fn optional(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

/// Decodes the header BLOB.
pub fn decode_header(blob: &[u8]) -> Result<Header> {
    let mut r = Reader::new(blob);
    let a_star = match r.u8()? {
        START_64 => false,
        START_A_STAR => true,
        START => return Err(Error::InvalidData("32-bit routing data is not supported")),
        _ => return Err(Error::InvalidData("not a routing header")),
    };
    r.want(HEADER, "missing header tag")?;
    let node_count = u32::try_from(r.i32()?).map_err(|_| Error::InvalidData("negative node count"))?;
    let has_ids = match r.u8()? {
        ID => true,
        CODE => false,
        _ => return Err(Error::InvalidData("unknown node identity kind")),
    };
    let max_code_length = r.u8()?;
    let table = r.field(TABLE)?;
    let from_column = r.field(FROM)?;
    let to_column = r.field(TO)?;
    let geom_column = optional(r.field(GEOM)?);
    let name_column = optional(r.field(NAME)?);
    let a_star_coeff = if a_star {
        r.want(A_STAR_COEFF, "missing A* coefficient")?;
        Some(r.f64()?)
    } else {
        None
    };
    r.want(END, "unterminated header")?;
    Ok(Header {
        node_count,
        has_ids,
        max_code_length,
        table,
        from_column,
        to_column,
        geom_column,
        name_column,
        a_star_coeff,
    })
}

/// Decodes every node record of one data block.
pub fn decode_block(header: &Header, blob: &[u8]) -> Result<Vec<NodeRecord>> {
    let mut r = Reader::new(blob);
    r.want(BLOCK, "not a routing block")?;
    let count = r.u16()?;
    let mut nodes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        r.want(NODE, "missing node tag")?;
        let index = r.index()?;
        let key = if header.has_ids {
            NodeKey::Id(r.i64()?)
        } else {
            let raw = r.take(header.max_code_length as usize)?;
            let used = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            let code = std::str::from_utf8(&raw[..used])
                .map_err(|_| Error::InvalidData("node code is not UTF-8"))?;
            NodeKey::Code(code.to_string())
        };
        let coords = if header.a_star() {
            Some((r.f64()?, r.f64()?))
        } else {
            None
        };
        let arc_count = r.u16()?;
        let mut arcs = Vec::with_capacity(arc_count as usize);
        for _ in 0..arc_count {
            r.want(ARC, "missing arc tag")?;
            let rowid = r.i64()?;
            let to = r.index()?;
            let cost = r.f64()?;
            r.want(END, "unterminated arc")?;
            arcs.push(Arc { rowid, to, cost });
        }
        r.want(END, "unterminated node")?;
        nodes.push(NodeRecord {
            index,
            key,
            coords,
            arcs,
        });
    }
    if r.pos != blob.len() {
        return Err(Error::InvalidData("trailing bytes after block"));
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(has_ids: bool, a_star: bool) -> Header {
        Header {
            node_count: 2,
            has_ids,
            max_code_length: if has_ids { 0 } else { 3 },
            table: "roads".into(),
            from_column: "node_from".into(),
            to_column: "node_to".into(),
            geom_column: a_star.then(|| "geom".to_string()),
            name_column: None,
            a_star_coeff: a_star.then_some(0.5),
        }
    }

    #[test]
    fn header_layout() {
        let blob = encode_header(&header(true, false));
        assert_eq!(&blob[..8], &[START_64, HEADER, 2, 0, 0, 0, ID, 0]);
        assert_eq!(&blob[8..11], &[TABLE, 6, 0]);
        assert_eq!(&blob[11..17], b"roads\0");
        // empty geometry and name fields are a lone NUL
        assert_eq!(&blob[blob.len() - 9..], &[GEOM, 1, 0, 0, NAME, 1, 0, 0, END]);
        assert_eq!(decode_header(&blob).unwrap(), header(true, false));
    }

    #[test]
    fn a_star_header_carries_coefficient() {
        let h = header(false, true);
        let blob = encode_header(&h);
        assert_eq!(blob[0], START_A_STAR);
        assert_eq!(blob[6], CODE);
        assert_eq!(blob[7], 3);
        assert_eq!(decode_header(&blob).unwrap(), h);
    }

    #[test]
    fn codes_are_padded_to_fixed_width() {
        let h = header(false, false);
        let node = NodeRecord {
            index: 1,
            key: NodeKey::Code("ab".into()),
            coords: None,
            arcs: vec![Arc { rowid: 9, to: 0, cost: 2.5 }],
        };
        let record = encode_node(&h, &node).unwrap();
        assert_eq!(record.len(), node_size(&h, 1));
        assert_eq!(&record[5..8], b"ab\0");

        let mut block = BlockWriter::new();
        block.push(&record);
        let blob = block.finish();
        assert_eq!(&blob[..3], &[BLOCK, 1, 0]);
        assert_eq!(decode_block(&h, &blob).unwrap(), vec![node]);
    }

    #[test]
    fn blocks_refuse_overflowing_records() {
        let mut block = BlockWriter::new();
        assert!(block.fits(MAX_BLOCK * 2));
        block.push(&vec![0u8; MAX_BLOCK - 100]);
        assert!(block.fits(50));
        assert!(!block.fits(97));
    }

    #[test]
    fn truncated_blocks_are_rejected() {
        let h = header(true, false);
        assert!(matches!(
            decode_block(&h, &[BLOCK, 1, 0, NODE, 0]),
            Err(Error::InvalidData(_))
        ));
        assert!(matches!(decode_header(&[START]), Err(Error::InvalidData(_))));
    }
}
