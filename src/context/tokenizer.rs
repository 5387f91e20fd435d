//! Tokenization using tiktoken

use std::sync::Arc;
use tiktoken_rs::{cl100k_base, get_bpe_from_model, CoreBPE};
use tracing::debug;

/// Token id as produced by the tokenizer
pub type TokenId = usize;

/// Longest run of trailing tokens that can belong to a single split UTF-8 character
const MAX_PARTIAL_TOKENS: usize = 4;

/// Tokenizer trait shared by every model collaborator
pub trait Tokenizer: Send + Sync {
    /// Encode text into token ids without adding special tokens
    fn encode(&self, text: &str) -> Vec<TokenId>;

    /// Decode token ids back to text, dropping trailing partial artifacts
    fn decode(&self, ids: &[TokenId]) -> String;

    /// Count the tokens in the given text
    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

/// Tiktoken-based tokenizer
pub struct TiktokenTokenizer {
    bpe: Arc<CoreBPE>,
}

impl TiktokenTokenizer {
    /// Create a tokenizer with the cl100k_base encoding
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bpe = cl100k_base()?;
        Ok(Self { bpe: Arc::new(bpe) })
    }

    /// Pick the encoding for a model name, falling back to cl100k_base
    pub fn for_model(model_name: &str) -> Result<Self, Box<dyn std::error::Error>> {
        match get_bpe_from_model(model_name) {
            Ok(bpe) => Ok(Self { bpe: Arc::new(bpe) }),
            Err(_) => {
                debug!("No dedicated encoding for {}, using cl100k_base", model_name);
                Self::new()
            }
        }
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<TokenId> {
        self.bpe
            .encode_ordinary(text)
            .into_iter()
            .map(|t| t as TokenId)
            .collect()
    }

    fn decode(&self, ids: &[TokenId]) -> String {
        // A cut can land inside a multi-byte character; shed tokens until it decodes.
        let mut end = ids.len();
        let floor = ids.len().saturating_sub(MAX_PARTIAL_TOKENS);
        while end > floor {
            let slice: Vec<_> = ids[..end].iter().map(|&t| t as _).collect();
            if let Ok(text) = self.bpe.decode(slice) {
                return text;
            }
            end -= 1;
        }
        if end == 0 {
            return String::new();
        }
        let slice: Vec<_> = ids[..end].iter().map(|&t| t as _).collect();
        self.bpe.decode(slice).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiktoken_encode_decode() {
        let tokenizer = TiktokenTokenizer::new().unwrap();
        let text = "def handler(request):\n    return eval(request.args['q'])";
        let ids = tokenizer.encode(text);
        assert!(!ids.is_empty());
        assert_eq!(tokenizer.decode(&ids), text);
    }

    #[test]
    fn test_count_matches_encode() {
        let tokenizer = TiktokenTokenizer::new().unwrap();
        let text = "Hello, world! This is a test.";
        assert_eq!(tokenizer.count(text), tokenizer.encode(text).len());
        assert!(tokenizer.count(text) < 20);
    }

    #[test]
    fn test_unknown_model_falls_back() {
        let tokenizer = TiktokenTokenizer::for_model("google/gemma-3-27b-it").unwrap();
        assert!(tokenizer.count("fn main() {}") > 0);
    }

    #[test]
    fn test_decode_empty() {
        let tokenizer = TiktokenTokenizer::new().unwrap();
        assert_eq!(tokenizer.decode(&[]), "");
    }

    #[test]
    fn test_decode_prefix_of_multibyte_text() {
        let tokenizer = TiktokenTokenizer::new().unwrap();
        let ids = tokenizer.encode("检查输入的漏洞");
        let prefix = tokenizer.decode(&ids[..ids.len() / 2]);
        assert!("检查输入的漏洞".starts_with(&prefix));
    }
}
