use super::error::{Error, Result};
use encoding_rs::Encoding;

/// Character set used to turn remote output into strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Charset(&'static Encoding);

impl Charset {
    /// Resolve a WHATWG encoding label such as `utf-8` or `latin1`.
    pub fn from_label(label: &str) -> Result<Self> {
        Encoding::for_label(label.trim().as_bytes())
            .map(Charset)
            .ok_or_else(|| Error::Config(format!("unknown charset: {}", label)))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Decode bytes, replacing malformed sequences with U+FFFD.
    pub fn decode(&self, bytes: &[u8]) -> String {
        let (text, _) = self.0.decode_without_bom_handling(bytes);
        text.into_owned()
    }

    /// Encode a string for sending to the remote side.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let (bytes, _, _) = self.0.encode(text);
        bytes.into_owned()
    }
}

impl Default for Charset {
    fn default() -> Self {
        Charset(encoding_rs::UTF_8)
    }
}
