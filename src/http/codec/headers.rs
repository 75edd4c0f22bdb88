use anyhow::{Result, anyhow, bail};
use http::header::HeaderName;

#[derive(Debug, Clone)]
struct HeaderLine {
    lower_name: String,
    value: String,
}

/// Collects header lines of one message head against a byte budget.
#[derive(Debug)]
pub(crate) struct HeaderAccumulator {
    headers: Vec<HeaderLine>,
    total_bytes: usize,
    max_bytes: usize,
    content_length: Option<u64>,
    chunked: bool,
    connection_close: bool,
    keep_alive: bool,
}

impl HeaderAccumulator {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            headers: Vec::new(),
            total_bytes: 0,
            max_bytes,
            content_length: None,
            chunked: false,
            connection_close: false,
            keep_alive: false,
        }
    }

    /// Records one raw line. Returns `false` on the blank line ending the head.
    pub fn push_line(&mut self, line: &str) -> Result<bool> {
        self.total_bytes = self.total_bytes.saturating_add(line.len());
        if self.total_bytes > self.max_bytes {
            bail!("headers exceed configured limit of {} bytes", self.max_bytes);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Ok(false);
        }

        let (name, value) = trimmed
            .split_once(':')
            .ok_or_else(|| anyhow!("header missing ':' separator"))?;
        if name.is_empty() || name.ends_with([' ', '\t']) {
            bail!("invalid header name '{name}'");
        }
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| anyhow!("invalid header name '{name}'"))?;
        let value = value.trim();

        if name.eq_ignore_ascii_case("content-length") {
            if self.content_length.is_some() {
                bail!("multiple Content-Length headers are not supported");
            }
            let parsed = value
                .parse::<u64>()
                .map_err(|_| anyhow!("invalid Content-Length value '{value}'"))?;
            self.content_length = Some(parsed);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            self.chunked = true;
        } else if name.eq_ignore_ascii_case("connection") {
            for token in value.split(',').map(str::trim) {
                if token.eq_ignore_ascii_case("close") {
                    self.connection_close = true;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    self.keep_alive = true;
                }
            }
        }
        self.headers.push(HeaderLine {
            lower_name: name.to_ascii_lowercase(),
            value: value.to_string(),
        });
        Ok(true)
    }

    /// First value of a header, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.lower_name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Whether the message carries a transfer coding (always treated as chunked).
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn wants_connection_close(&self) -> bool {
        self.connection_close
    }

    pub fn wants_keep_alive(&self) -> bool {
        self.keep_alive
    }
}
