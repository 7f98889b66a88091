//! Token counting and budget truncation with the `cl100k_base` BPE.

use tiktoken_rs::CoreBPE;

use crate::error::{AdvisorError, Result};

pub struct TokenBudget {
    bpe: CoreBPE,
}

impl TokenBudget {
    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| {
            AdvisorError::Configuration(format!("failed to load cl100k_base tokenizer: {}", e))
        })?;
        Ok(Self { bpe })
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Keep the longest token prefix of `text` that fits in `budget` tokens
    /// and decodes to valid UTF-8.
    ///
    /// Text already within budget is returned unchanged.
    pub fn truncate(&self, text: &str, budget: usize) -> String {
        let tokens = self.bpe.encode_ordinary(text);
        if tokens.len() <= budget {
            return text.to_string();
        }

        let mut end = budget;
        while end > 0 {
            // A cut inside a multi-byte character fails to decode; back off.
            if let Ok(prefix) = self.bpe.decode(tokens[..end].to_vec()) {
                if self.count(&prefix) <= budget {
                    return prefix;
                }
            }
            end -= 1;
        }
        String::new()
    }
}

impl std::fmt::Debug for TokenBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBudget").field("encoding", &"cl100k_base").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        let tb = TokenBudget::cl100k().unwrap();
        assert_eq!(tb.truncate("payment within 30 days", 1500), "payment within 30 days");
    }

    #[test]
    fn truncation_respects_budget_and_keeps_prefix() {
        let tb = TokenBudget::cl100k().unwrap();
        let text = "The supplier shall deliver the goods. ".repeat(400);
        let cut = tb.truncate(&text, 1500);
        assert!(tb.count(&cut) <= 1500);
        assert!(tb.count(&cut) > 1400);
        assert!(text.starts_with(&cut));
    }

    #[test]
    fn multibyte_text_never_yields_partial_characters() {
        let tb = TokenBudget::cl100k().unwrap();
        let text = "Поставщик обязуется поставить товар 📦 в срок. ".repeat(50);
        for budget in [1, 2, 3, 7, 13, 50, 101] {
            let cut = tb.truncate(&text, budget);
            assert!(tb.count(&cut) <= budget, "budget {budget}");
            assert!(text.starts_with(&cut), "budget {budget}");
        }
    }

    #[test]
    fn zero_budget_is_empty() {
        let tb = TokenBudget::cl100k().unwrap();
        assert_eq!(tb.truncate("anything at all", 0), "");
    }
}
