use serde_json::Value;

/// Incremental splitter for a stdout stream that concatenates top-level JSON
/// objects with no separators. Bytes are buffered across chunk boundaries and
/// the split is invariant under re-chunking: feeding the same stream in any
/// chunking yields the same sequence of parsed objects.
///
/// Escape sequences inside string literals are honored so a `}` in a payload
/// string never closes an object. Bytes outside any object (interleaved
/// non-JSON noise) are discarded, as are object slices that fail to parse.
pub struct JsonObjectStream {
    buffer: Vec<u8>,
    scan_pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    object_start: Option<usize>,
}

impl JsonObjectStream {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            scan_pos: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            object_start: None,
        }
    }

    /// Feed one chunk; returns every object completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);
        let mut parsed = Vec::new();

        let mut i = self.scan_pos;
        while i < self.buffer.len() {
            let byte = self.buffer[i];
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
            } else {
                match byte {
                    b'"' if self.depth > 0 => self.in_string = true,
                    b'{' => {
                        if self.depth == 0 {
                            self.object_start = Some(i);
                        }
                        self.depth += 1;
                    }
                    b'}' if self.depth > 0 => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            if let Some(start) = self.object_start.take() {
                                if let Ok(value) =
                                    serde_json::from_slice(&self.buffer[start..=i])
                                {
                                    parsed.push(value);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            i += 1;
        }

        // Drop everything already consumed; an object still open stays in the
        // buffer with its start rebased to zero.
        let drain_to = match self.object_start {
            Some(start) => start,
            None => self.buffer.len(),
        };
        self.buffer.drain(..drain_to);
        if let Some(start) = self.object_start.as_mut() {
            *start -= drain_to;
        }
        self.scan_pos = self.buffer.len();

        parsed
    }
}

impl Default for JsonObjectStream {
    fn default() -> Self {
        Self::new()
    }
}
