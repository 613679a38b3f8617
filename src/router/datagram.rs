//! Datagram wire format parsing (§4.G): two dialects distinguished by the
//! first byte, ported from the reference's `udp_read`.

/// Reply tokens the router sends back on a malformed datagram or a
/// failed address resolution.
pub const REPLY_FMT: &[u8] = b"fmt\n";
pub const REPLY_WTF: &[u8] = b"wtf\n";
pub const REPLY_404: &[u8] = b"404\n";

pub struct ParsedDatagram {
    pub address: String,
    pub data: Vec<u8>,
    pub is_osc: bool,
}

pub enum DatagramOutcome {
    Parsed(ParsedDatagram),
    /// No separator found at all: reply `fmt\n`.
    BadFormat,
    /// Separator found but the computed payload length went negative:
    /// reply `wtf\n`. Computed as `i64` so it can never wrap before the
    /// check (§9 resolved Open Question).
    NegativeLength,
}

/// Parses one UDP payload. OSC dialect: leading `/`, address terminated
/// by `NUL`, payload starts at the next 4-byte-aligned offset past the
/// terminator (mirroring the reference's `3 - (data - buf - 1) % 4`
/// padding). Plain dialect: address terminated by `:`, payload starts
/// immediately after.
pub fn parse(buf: &[u8]) -> DatagramOutcome {
    let is_osc = buf.first() == Some(&b'/');
    let separator = if is_osc { 0u8 } else { b':' };
    let initial_offset = if is_osc { 1 } else { 0 };

    let Some(sep_idx) = buf.iter().position(|&b| b == separator) else {
        return DatagramOutcome::BadFormat;
    };

    let address = String::from_utf8_lossy(&buf[initial_offset..sep_idx]).into_owned();

    let mut data_start = sep_idx + 1;
    if is_osc {
        // Round up to the next multiple of 4 past the NUL, matching the
        // reference's alignment padding for OSC argument blocks.
        let past_nul = data_start as i64 - 1;
        let pad = 3 - past_nul.rem_euclid(4);
        data_start = (data_start as i64 + pad) as usize;
    }

    let data_len = buf.len() as i64 - data_start as i64;
    if data_len < 0 {
        return DatagramOutcome::NegativeLength;
    }

    let data = buf
        .get(data_start..data_start + data_len as usize)
        .unwrap_or(&[])
        .to_vec();

    DatagramOutcome::Parsed(ParsedDatagram {
        address,
        data,
        is_osc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_dialect_splits_on_colon() {
        let outcome = parse(b"a/b/c:hello");
        let DatagramOutcome::Parsed(parsed) = outcome else {
            panic!("expected Parsed");
        };
        assert_eq!(parsed.address, "a/b/c");
        assert_eq!(parsed.data, b"hello");
        assert!(!parsed.is_osc);
    }

    #[test]
    fn missing_separator_is_bad_format() {
        assert!(matches!(parse(b"no separator here"), DatagramOutcome::BadFormat));
    }

    #[test]
    fn osc_dialect_strips_leading_slash_and_pads() {
        // "/a/b" (4 bytes) + NUL lands the payload start at the next
        // 4-byte boundary (offset 8), not immediately after the NUL.
        let mut buf = b"/a/b\0".to_vec();
        buf.extend_from_slice(&[0, 0, 0]);
        buf.extend_from_slice(b"xx");
        let outcome = parse(&buf);
        let DatagramOutcome::Parsed(parsed) = outcome else {
            panic!("expected Parsed");
        };
        assert_eq!(parsed.address, "a/b");
        assert_eq!(parsed.data, b"xx");
        assert!(parsed.is_osc);
    }
}
