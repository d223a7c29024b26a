/// Output of one assembly step.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Frames {
    /// Complete lines in file order, terminators removed.
    pub lines: Vec<String>,
    /// Unterminated tail to carry into the next step. Empty when the input
    /// ended exactly on a terminator.
    pub fragment: Vec<u8>,
}

/// Split `previous` followed by `new_bytes` into complete lines.
///
/// Lines end at `\n`; a `\r` directly before it is dropped as well, so both
/// `\n` and `\r\n` files work. The split is done on raw bytes and lines are
/// decoded only once complete, so a multi-byte character that straddles two
/// reads comes out intact.
pub fn assemble(previous: &[u8], new_bytes: &[u8]) -> Frames {
    let mut data = Vec::with_capacity(previous.len() + new_bytes.len());
    data.extend_from_slice(previous);
    data.extend_from_slice(new_bytes);

    let mut lines = Vec::new();
    let mut start = 0;
    while let Some(pos) = data[start..].iter().position(|&b| b == b'\n') {
        let end = start + pos;
        let mut line = &data[start..end];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        lines.push(String::from_utf8_lossy(line).into_owned());
        start = end + 1;
    }

    data.drain(..start);

    Frames {
        lines,
        fragment: data,
    }
}
