//! CRLF dot-stuffing for the DATA command: any bare `\n` not already preceded
//! by `\r` is normalized to `\r\n` (spec §8 scenario 1), any line starting
//! with `.` gets an extra leading `.`, and the message is terminated with
//! `.\r\n`. Adapted from the pack's async SMTP client's dot-stuffer,
//! generalized to stream over chunks rather than a single buffer.

pub(crate) struct DotStuffer {
    at_line_start: bool,
    last_was_cr: bool,
}

impl DotStuffer {
    pub(crate) fn new() -> Self {
        DotStuffer { at_line_start: true, last_was_cr: false }
    }

    /// Feed one chunk of message bytes, invoking `emit` with stuffed output.
    pub(crate) fn process_chunk(&mut self, chunk: &[u8], mut emit: impl FnMut(&[u8])) {
        let mut start = 0;
        for (i, &byte) in chunk.iter().enumerate() {
            if byte == b'\n' && !self.last_was_cr {
                emit(&chunk[start..i]);
                emit(b"\r");
                start = i;
            } else if self.at_line_start && byte == b'.' {
                emit(&chunk[start..i]);
                emit(b".");
                start = i;
            }
            self.last_was_cr = byte == b'\r';
            self.at_line_start = byte == b'\n';
        }
        emit(&chunk[start..]);
    }

    /// Terminate the message with the final `.\r\n` (after a bare CRLF if the
    /// message didn't already end with one).
    pub(crate) fn end_message(&mut self, mut emit: impl FnMut(&[u8])) {
        if !self.at_line_start {
            emit(b"\r\n");
        }
        emit(b".\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stuff(input: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut stuffer = DotStuffer::new();
        stuffer.process_chunk(input, |s| out.extend_from_slice(s));
        stuffer.end_message(|s| out.extend_from_slice(s));
        out
    }

    #[test]
    fn leading_dot_is_doubled() {
        assert_eq!(stuff(b".hello\r\n"), b"..hello\r\n.\r\n");
    }

    #[test]
    fn plain_body_gets_terminator() {
        assert_eq!(stuff(b"hello\r\n"), b"hello\r\n.\r\n");
    }

    #[test]
    fn body_without_trailing_crlf_gets_one_before_terminator() {
        assert_eq!(stuff(b"hello"), b"hello\r\n.\r\n");
    }

    #[test]
    fn dot_mid_line_is_untouched() {
        assert_eq!(stuff(b"a.b\r\n"), b"a.b\r\n.\r\n");
    }

    #[test]
    fn bare_lf_is_normalized_to_crlf() {
        assert_eq!(stuff(b"line1\nline2\n"), b"line1\r\nline2\r\n.\r\n");
    }

    #[test]
    fn existing_crlf_is_not_doubled() {
        assert_eq!(stuff(b"line1\r\nline2\r\n"), b"line1\r\nline2\r\n.\r\n");
    }

    #[test]
    fn cr_and_lf_split_across_chunks_is_not_doubled() {
        let mut out = Vec::new();
        let mut stuffer = DotStuffer::new();
        stuffer.process_chunk(b"line1\r", |s| out.extend_from_slice(s));
        stuffer.process_chunk(b"\nline2\n", |s| out.extend_from_slice(s));
        stuffer.end_message(|s| out.extend_from_slice(s));
        assert_eq!(out, b"line1\r\nline2\r\n.\r\n");
    }
}
