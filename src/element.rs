//! # Register Elements
//!
//! A [`RegisterElement`] is a typed, immutable view over a fixed-width span
//! of 16-bit registers: it knows its address, its semantic type, and its
//! word order, and converts between raw wire bytes and application values.
//!
//! Elements are created when a protocol definition is built and never
//! mutated afterwards. They hold no decode state, so calls need no
//! synchronization.

use serde::{Deserialize, Serialize};

use crate::error::PollResult;
use crate::value::{SemanticValue, ValueType, WordOrder};

/// A contiguous run of registers addressed as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSpan {
    /// Unit-relative offset of the first register.
    pub address: u16,
    /// Width in 16-bit registers.
    pub words: u16,
}

impl RegisterSpan {
    pub fn new(address: u16, words: u16) -> Self {
        Self { address, words }
    }

    /// One past the last register, as u32 to avoid overflow at the top of
    /// the address space.
    pub fn end(&self) -> u32 {
        self.address as u32 + self.words as u32
    }

    /// Check whether two spans share at least one register.
    pub fn overlaps(&self, other: &RegisterSpan) -> bool {
        (self.address as u32) < other.end() && (other.address as u32) < self.end()
    }

    /// Check whether `other` lies entirely within this span.
    pub fn contains(&self, other: &RegisterSpan) -> bool {
        self.address <= other.address && other.end() <= self.end()
    }
}

impl std::fmt::Display for RegisterSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.address, self.words)
    }
}

/// A typed view over one register span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterElement {
    address: u16,
    value_type: ValueType,
    #[serde(default)]
    word_order: WordOrder,
}

impl RegisterElement {
    /// Create an element with the default most-significant-word-first order.
    pub fn new(address: u16, value_type: ValueType) -> Self {
        Self {
            address,
            value_type,
            word_order: WordOrder::MswFirst,
        }
    }

    /// Override the word order. Only meaningful for multi-word types.
    pub fn with_word_order(mut self, order: WordOrder) -> Self {
        self.word_order = order;
        self
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn word_order(&self) -> WordOrder {
        self.word_order
    }

    /// The span this element occupies.
    pub fn span(&self) -> RegisterSpan {
        RegisterSpan::new(self.address, self.value_type.width_words())
    }

    /// Decode wire bytes covering exactly this element's span.
    pub fn decode(&self, bytes: &[u8]) -> PollResult<SemanticValue> {
        self.value_type.decode(bytes, self.word_order)
    }

    /// Encode a value into wire bytes covering exactly this element's span.
    pub fn encode(&self, value: &SemanticValue) -> PollResult<Vec<u8>> {
        self.value_type.encode(value, self.word_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_overlap() {
        let a = RegisterSpan::new(100, 2);
        let b = RegisterSpan::new(101, 2);
        let c = RegisterSpan::new(102, 1);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn test_span_contains() {
        let outer = RegisterSpan::new(100, 4);
        assert!(outer.contains(&RegisterSpan::new(100, 4)));
        assert!(outer.contains(&RegisterSpan::new(102, 2)));
        assert!(!outer.contains(&RegisterSpan::new(103, 2)));
    }

    #[test]
    fn test_span_at_address_space_top() {
        let a = RegisterSpan::new(0xFFFE, 2);
        let b = RegisterSpan::new(0xFFFF, 1);
        assert_eq!(a.end(), 0x10000);
        assert!(a.overlaps(&b));
    }

    #[test]
    fn test_element_span_tracks_type_width() {
        let element = RegisterElement::new(200, ValueType::F64);
        assert_eq!(element.span(), RegisterSpan::new(200, 4));

        let element = RegisterElement::new(10, ValueType::Text { words: 8 });
        assert_eq!(element.span().words, 8);
    }

    #[test]
    fn test_element_codec_uses_word_order() {
        let element =
            RegisterElement::new(0, ValueType::U32).with_word_order(WordOrder::LswFirst);
        let value = element.decode(&[0x00, 0x02, 0x00, 0x01]).unwrap();
        assert_eq!(value, SemanticValue::Unsigned(0x0001_0002));
        assert_eq!(
            element.encode(&value).unwrap(),
            vec![0x00, 0x02, 0x00, 0x01]
        );
    }
}
