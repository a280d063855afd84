use std::collections::HashMap;

use crate::Opaque;

/// Correlation cell for one in-flight message.
///
/// A token is a move-only value: it cannot be cloned, so the only ways it
/// ends are being dropped right after a rejected `produce` (never
/// outstanding) or being moved out of the [`OutstandingSet`] exactly once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub(crate) struct DeliveryToken {
    sequence: u64,
}

impl DeliveryToken {
    // ---

    /// Allocate a token for a freshly issued sequence number.
    pub fn allocate(sequence: u64) -> Self {
        Self { sequence }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Correlation value handed to the transport for this token.
    pub fn opaque(&self) -> Opaque {
        Opaque(self.sequence)
    }

    /// Consume the token, returning its sequence number.
    pub fn retire(self) -> u64 {
        self.sequence
    }
}

/// Tokens accepted by the transport and not yet reported.
///
/// Keyed by sequence number, which is never reused within a producer, so a
/// stale or duplicated report can never match a newer token.
#[derive(Debug, Default)]
pub(crate) struct OutstandingSet {
    tokens: HashMap<u64, DeliveryToken>,
}

impl OutstandingSet {
    // ---

    pub fn new() -> Self {
        Self::default()
    }

    /// Track an accepted token.
    ///
    /// Returns false if a token with the same sequence is already tracked,
    /// in which case the set is unchanged.
    pub fn insert(&mut self, token: DeliveryToken) -> bool {
        // ---
        let sequence = token.sequence();
        if self.tokens.contains_key(&sequence) {
            return false;
        }
        self.tokens.insert(sequence, token);
        true
    }

    /// Move out the token matching `opaque`, if it is still outstanding.
    pub fn take(&mut self, opaque: Opaque) -> Option<DeliveryToken> {
        self.tokens.remove(&opaque.0)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Drop every remaining token, returning how many there were.
    pub fn abandon_all(&mut self) -> usize {
        // ---
        let count = self.tokens.len();
        self.tokens.clear();
        count
    }
}
