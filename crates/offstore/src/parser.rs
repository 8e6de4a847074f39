//! Store file codec using nom
//!
//! File format:
//! ```text
//! OFFC001\n
//! [version: u32]
//! [entry_count: u32]
//! ...records...
//! ```
//!
//! Record format (all integers little-endian):
//! ```text
//! [u32 len][method]
//! [u32 len][url]
//! [u16 status]
//! [u32 header_count] ([u32 len][name][u32 len][value])*
//! [u64 len][body]
//! ```

use nom::{
    bytes::complete::tag,
    combinator::map_res,
    multi::length_data,
    number::complete::{le_u16, le_u32, le_u64},
    sequence::{pair, tuple},
    IResult,
};

use crate::entry::{RequestKey, Response};
use crate::error::Result;

/// Magic header for store files
pub const OFFC_MAGIC: &[u8] = b"OFFC001\n";

/// Current file format version
pub const FORMAT_VERSION: u32 = 1;

/// Total header length in bytes
pub const HEADER_LEN: usize = OFFC_MAGIC.len() + 8;

/// Byte offset of the committed entry count inside the header
pub const ENTRY_COUNT_OFFSET: u64 = OFFC_MAGIC.len() as u64 + 4;

/// Store file header
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHeader {
    /// File format version
    pub version: u32,
    /// Number of committed records
    pub entry_count: u32,
}

fn header(input: &[u8]) -> IResult<&[u8], (u32, u32)> {
    let (input, (_, version, entry_count)) = tuple((tag(OFFC_MAGIC), le_u32, le_u32))(input)?;
    Ok((input, (version, entry_count)))
}

/// Parse a store file header
pub fn parse_header(input: &[u8]) -> Result<StoreHeader> {
    let (_, (version, entry_count)) = header(input)?;
    Ok(StoreHeader {
        version,
        entry_count,
    })
}

/// Create a store file header
pub fn create_header(version: u32, entry_count: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(OFFC_MAGIC);
    header.extend_from_slice(&version.to_le_bytes());
    header.extend_from_slice(&entry_count.to_le_bytes());
    header
}

/// Append the encoded form of one record to `out`
pub fn encode_record(out: &mut Vec<u8>, key: &RequestKey, response: &Response) {
    put_str(out, key.method());
    put_str(out, key.url());
    out.extend_from_slice(&response.status.to_le_bytes());
    out.extend_from_slice(&(response.headers.len() as u32).to_le_bytes());
    for (name, value) in &response.headers {
        put_str(out, name);
        put_str(out, value);
    }
    out.extend_from_slice(&(response.body.len() as u64).to_le_bytes());
    out.extend_from_slice(&response.body);
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn string(input: &[u8]) -> IResult<&[u8], String> {
    map_res(length_data(le_u32), |bytes: &[u8]| {
        std::str::from_utf8(bytes).map(str::to_owned)
    })(input)
}

fn headers(input: &[u8]) -> IResult<&[u8], Vec<(String, String)>> {
    let (mut input, n) = le_u32(input)?;
    // n is read from disk, so no preallocation.
    let mut headers = Vec::new();
    for _ in 0..n {
        let (rest, header) = pair(string, string)(input)?;
        headers.push(header);
        input = rest;
    }
    Ok((input, headers))
}

/// Parse a single record
pub fn parse_record(input: &[u8]) -> IResult<&[u8], (RequestKey, Response)> {
    let (input, (method, url, status, headers, body)) =
        tuple((string, string, le_u16, headers, length_data(le_u64)))(input)?;

    let key = RequestKey::new(&method, &url);
    let response = Response {
        status,
        headers,
        body: body.to_vec(),
    };

    Ok((input, (key, response)))
}
