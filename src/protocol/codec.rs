//! Guacamole instruction framing: length-prefixed, comma-separated elements,
//! terminated by `;`. Element lengths are UTF-8 byte counts, not code point
//! counts — this implementation fixes that choice throughout.

use crate::error::GatewayError;

/// One parsed instruction. `0` is always the opcode; the rest are its
/// arguments, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction(Vec<String>);

impl Instruction {
    pub fn new(elements: Vec<String>) -> Self {
        Instruction(elements)
    }

    pub fn opcode(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or("")
    }

    pub fn args(&self) -> &[String] {
        if self.0.len() > 1 { &self.0[1..] } else { &[] }
    }

    pub fn elements(&self) -> &[String] {
        &self.0
    }

    /// Serialize back to the wire format described in §4.B.
    pub fn encode(&self) -> Vec<u8> {
        encode_elements(&self.0)
    }
}

/// Encode a raw opcode + argument vector without building an `Instruction`.
pub fn encode_instruction(opcode: &str, args: &[&str]) -> Vec<u8> {
    let mut elements = Vec::with_capacity(args.len() + 1);
    elements.push(opcode.to_owned());
    elements.extend(args.iter().map(|s| (*s).to_owned()));
    encode_elements(&elements)
}

fn encode_elements(elements: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    let last = elements.len().saturating_sub(1);
    for (i, el) in elements.iter().enumerate() {
        let bytes = el.as_bytes();
        out.extend_from_slice(bytes.len().to_string().as_bytes());
        out.push(b'.');
        out.extend_from_slice(bytes);
        out.push(if i == last { b';' } else { b',' });
    }
    out
}

/// Streaming, carry-over reader. Feed it raw bytes as they arrive from
/// either socket; it returns zero or more complete instructions per push
/// and keeps the unconsumed remainder internally.
///
/// Parsing is per-element, not per-instruction: `buf` is drained down to
/// its unconsumed remainder the instant an element finishes, and an
/// in-progress instruction's already-parsed elements move into `partial`
/// rather than staying in `buf` to be re-walked. A partially-arrived
/// element is detected by a bounds check alone (digit count plus a length
/// comparison), with no content copied or UTF-8-validated until it is
/// known to be fully present. Together this means every byte is scanned
/// and then dropped exactly once, so cost is amortized over the total
/// number of bytes seen — not quadratic in how finely a single large
/// instruction is chunked across pushes.
#[derive(Debug, Default)]
pub struct InstructionReader {
    buf: Vec<u8>,
    partial: Vec<String>,
}

enum ElementOutcome {
    Complete { content: String, total_len: usize, terminator: u8 },
    Incomplete,
}

impl InstructionReader {
    pub fn new() -> Self {
        Self { buf: Vec::new(), partial: Vec::new() }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Instruction>, GatewayError> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        loop {
            match parse_element(&self.buf)? {
                ElementOutcome::Complete { content, total_len, terminator } => {
                    self.buf.drain(0..total_len);
                    self.partial.push(content);
                    if terminator == b';' {
                        out.push(Instruction::new(std::mem::take(&mut self.partial)));
                    }
                }
                ElementOutcome::Incomplete => break,
            }
        }
        Ok(out)
    }
}

/// Attempt to parse exactly one length-prefixed element from the front of
/// `data`. Returns `Incomplete` as soon as not enough bytes are present,
/// checked purely by digit/length arithmetic before any content is touched.
fn parse_element(data: &[u8]) -> Result<ElementOutcome, GatewayError> {
    let mut cursor = 0usize;

    // Read the decimal length prefix.
    let digits_start = cursor;
    while cursor < data.len() && data[cursor].is_ascii_digit() {
        cursor += 1;
    }
    if cursor == digits_start {
        if cursor == data.len() {
            return Ok(ElementOutcome::Incomplete);
        }
        return Err(GatewayError::Framing(format!(
            "expected length digit at offset {cursor}"
        )));
    }
    if cursor == data.len() {
        return Ok(ElementOutcome::Incomplete);
    }
    if data[cursor] != b'.' {
        return Err(GatewayError::Framing(format!(
            "expected '.' after length at offset {cursor}"
        )));
    }
    let len: usize = std::str::from_utf8(&data[digits_start..cursor])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| GatewayError::Framing("element length overflow".to_owned()))?;
    cursor += 1; // past '.'

    let content_end = cursor
        .checked_add(len)
        .ok_or_else(|| GatewayError::Framing("element length overflow".to_owned()))?;
    if content_end >= data.len() {
        // Need content_end bytes plus one delimiter byte.
        return Ok(ElementOutcome::Incomplete);
    }
    let content = std::str::from_utf8(&data[cursor..content_end])
        .map_err(|_| GatewayError::Framing("element is not valid UTF-8".to_owned()))?
        .to_owned();

    let terminator = data[content_end];
    if terminator != b',' && terminator != b';' {
        return Err(GatewayError::Framing(format!(
            "expected ',' or ';' after element, got {:?}",
            terminator as char
        )));
    }
    Ok(ElementOutcome::Complete { content, total_len: content_end + 1, terminator })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_single_element() {
        let bytes = encode_instruction("select", &["rdp"]);
        assert_eq!(bytes, b"6.select,3.rdp;");
    }

    #[test]
    fn encode_zero_length_element() {
        let bytes = encode_instruction("connect", &[""]);
        assert_eq!(bytes, b"7.connect,0.;");
    }

    // S1 — framing split across chunks.
    #[test]
    fn reader_reassembles_across_chunk_boundaries() {
        let mut reader = InstructionReader::new();
        let whole = b"5.hello,5.world;";
        let chunks: [&[u8]; 3] = [&whole[..5], &whole[5..12], &whole[12..]];

        let mut all = Vec::new();
        for chunk in chunks {
            all.extend(reader.push(chunk).unwrap());
        }
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].elements(), ["hello", "world"]);
    }

    #[test]
    fn reader_handles_multiple_instructions_in_one_push() {
        let mut reader = InstructionReader::new();
        let data = b"4.ping;4.pong;";
        let instrs = reader.push(data).unwrap();
        assert_eq!(instrs.len(), 2);
        assert_eq!(instrs[0].opcode(), "ping");
        assert_eq!(instrs[1].opcode(), "pong");
    }

    #[test]
    fn reader_rejects_bad_delimiter() {
        let mut reader = InstructionReader::new();
        let err = reader.push(b"5.helloXworld;").unwrap_err();
        assert!(matches!(err, GatewayError::Framing(_)));
    }

    #[test]
    fn reader_rejects_non_utf8_content() {
        let mut reader = InstructionReader::new();
        let mut data = b"1.".to_vec();
        data.push(0xff);
        data.push(b';');
        let err = reader.push(&data).unwrap_err();
        assert!(matches!(err, GatewayError::Framing(_)));
    }

    #[test]
    fn reader_preserves_elements_containing_delimiter_bytes() {
        // The element's own bytes contain ';' and ',' — length-prefixing
        // must skip over them rather than treating them as a boundary.
        let mut reader = InstructionReader::new();
        let payload = "a;b,c";
        let bytes = encode_instruction("blob", &[payload]);
        let instrs = reader.push(&bytes).unwrap();
        assert_eq!(instrs.len(), 1);
        assert_eq!(instrs[0].args(), [payload]);
    }

    #[test]
    fn round_trip_random_splits() {
        // Property 1/3: for any element vector, any chunking of the
        // encoded bytes through the reader reproduces the instruction,
        // loses no bytes, and preserves order.
        let cases: Vec<Vec<&str>> = vec![
            vec!["select", "vnc"],
            vec!["size", "1024", "768", "96"],
            vec!["args", "VERSION_1_3_0", "hostname", "port"],
            vec!["connect", "", "h", "3389", ""],
        ];
        for elements in cases {
            let bytes = encode_instruction(elements[0], &elements[1..]);
            for split in 1..bytes.len() {
                let mut reader = InstructionReader::new();
                let mut got = Vec::new();
                got.extend(reader.push(&bytes[..split]).unwrap());
                got.extend(reader.push(&bytes[split..]).unwrap());
                assert_eq!(got.len(), 1, "split at {split} for {elements:?}");
                assert_eq!(got[0].elements(), elements.as_slice());
            }
        }
    }

    #[test]
    fn length_bytes_equals_spec_formula() {
        // Property 2: length(writer([s])) == len(decimal(bytes(s))) + 1 + bytes(s) + 1
        for s in ["", "a", "hello world", "\u{1F600}", "héllo"] {
            let encoded = encode_instruction(s, &[]);
            let expected = s.len().to_string().len() + 1 + s.len() + 1;
            assert_eq!(encoded.len(), expected, "mismatch for {s:?}");
        }
    }

    #[test]
    fn reader_drains_each_completed_element_instead_of_retaining_the_whole_instruction() {
        // An instruction with several large elements, delivered as one
        // element's bytes arrive fully before the next element starts. The
        // old parser restarted at buffer offset 0 on every push and only
        // drained once the whole instruction (ending in `;`) completed, so
        // already-finished elements were re-copied and re-validated on every
        // later push — quadratic in the number of elements times their
        // size. Draining per element means `buf` never holds more than the
        // one element still in flight.
        let big_a = "a".repeat(4_000);
        let big_b = "b".repeat(4_000);
        let bytes = encode_instruction("blob", &[&big_a, &big_b]);

        // Split right after the first big element's delimiter, so "blob"
        // and big_a are both fully parsed before big_b arrives at all.
        let first_delim = bytes.iter().position(|&b| b == b',').unwrap();
        let second_elem_start = first_delim + 1
            + bytes[first_delim + 1..].iter().position(|&b| b == b',').unwrap()
            + 1;

        let mut reader = InstructionReader::new();
        let got_first = reader.push(&bytes[..second_elem_start]).unwrap();
        assert!(got_first.is_empty());
        assert_eq!(reader.partial, vec!["blob".to_owned(), big_a.clone()]);
        assert!(
            reader.buf.is_empty(),
            "completed elements must not linger in buf, found {} bytes",
            reader.buf.len()
        );

        let got_second = reader.push(&bytes[second_elem_start..]).unwrap();
        assert_eq!(got_second.len(), 1);
        assert_eq!(got_second[0].args(), [big_b.as_str()]);
    }

    #[test]
    fn reader_carries_partial_elements_of_an_in_progress_instruction() {
        let mut reader = InstructionReader::new();
        let whole = encode_instruction("connect", &["a", "b", "c"]);
        // Split mid-way through the last element's length prefix, so
        // "connect", "a" and "b" are already parsed into `partial` before
        // the instruction completes.
        let split = whole.iter().position(|&b| b == b';').unwrap() - 1;
        let mut got = Vec::new();
        got.extend(reader.push(&whole[..split]).unwrap());
        assert!(got.is_empty());
        assert_eq!(reader.partial, vec!["connect".to_owned(), "a".to_owned(), "b".to_owned()]);
        got.extend(reader.push(&whole[split..]).unwrap());
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].args(), ["a", "b", "c"]);
    }
}
