//! Per-height payee tallies.

use enode_chain::CoinbaseOutputs;
use enode_messages::PaymentVote;
use enode_types::{Hash256, PayScript, PAYMENT_SIGNATURES_REQUIRED};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One payee and the votes backing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payee {
    script: PayScript,
    vote_hashes: Vec<Hash256>,
}

impl Payee {
    /// First vote for a script.
    pub fn new(script: PayScript, first_vote: Hash256) -> Self {
        Self {
            script,
            vote_hashes: vec![first_vote],
        }
    }

    /// The payee script.
    pub fn script(&self) -> &PayScript {
        &self.script
    }

    /// Record one more vote.
    pub fn add_vote_hash(&mut self, hash: Hash256) {
        self.vote_hashes.push(hash);
    }

    /// Hashes of the backing votes.
    pub fn vote_hashes(&self) -> &[Hash256] {
        &self.vote_hashes
    }

    /// Number of backing votes.
    pub fn vote_count(&self) -> usize {
        self.vote_hashes.len()
    }
}

/// All payees voted for at one height.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockPayees {
    /// The height these votes apply to.
    pub block_height: u32,
    /// Payees in first-vote order.
    pub payees: Vec<Payee>,
}

impl BlockPayees {
    /// Empty tally for a height.
    pub fn new(block_height: u32) -> Self {
        Self {
            block_height,
            payees: Vec::new(),
        }
    }

    /// Count a vote for its payee.
    pub fn add_vote(&mut self, vote: &PaymentVote) {
        for payee in &mut self.payees {
            if payee.script() == &vote.payee {
                payee.add_vote_hash(vote.hash());
                return;
            }
        }
        self.payees.push(Payee::new(vote.payee.clone(), vote.hash()));
    }

    /// The payee with the most votes; insertion order breaks ties.
    pub fn best_payee(&self) -> Option<&Payee> {
        let mut best: Option<&Payee> = None;
        for payee in &self.payees {
            if best.map(|b| payee.vote_count() > b.vote_count()).unwrap_or(true) {
                best = Some(payee);
            }
        }
        best
    }

    /// True if `script` gathered at least `required` votes.
    pub fn has_payee_with_votes(&self, script: &PayScript, required: usize) -> bool {
        self.payees
            .iter()
            .any(|p| p.vote_count() >= required && p.script() == script)
    }

    /// Most votes any payee has here.
    pub fn max_votes(&self) -> usize {
        self.payees.iter().map(Payee::vote_count).max().unwrap_or(0)
    }

    /// Sum of votes across all payees.
    pub fn total_votes(&self) -> usize {
        self.payees.iter().map(Payee::vote_count).sum()
    }

    /// Validate a coinbase against the tally.
    ///
    /// With fewer than the required votes on every payee, any coinbase
    /// passes (longest-chain rule). Otherwise one output must pay a
    /// six-vote payee exactly `enode_payment`.
    pub fn is_transaction_valid(&self, coinbase: &CoinbaseOutputs, enode_payment: u64) -> bool {
        if self.max_votes() < PAYMENT_SIGNATURES_REQUIRED {
            return true;
        }

        let mut possible = Vec::new();
        for payee in &self.payees {
            if payee.vote_count() < PAYMENT_SIGNATURES_REQUIRED {
                continue;
            }
            if coinbase.pays(payee.script(), enode_payment) {
                debug!(height = self.block_height, "found required enode payment");
                return true;
            }
            possible.push(payee.script().to_asm_string());
        }

        if possible.is_empty() {
            return true;
        }
        tracing::warn!(
            height = self.block_height,
            payment = enode_payment,
            possible = possible.join(","),
            "missing required enode payment"
        );
        false
    }

    /// Human-readable payee list for status reporting.
    pub fn required_payments_string(&self) -> String {
        if self.payees.is_empty() {
            return "Unknown".to_string();
        }
        self.payees
            .iter()
            .map(|p| format!("{}:{}", p.script().to_asm_string(), p.vote_count()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enode_chain::TxOut;
    use enode_types::{hash160, sha256d, Outpoint};

    fn script(tag: &[u8]) -> PayScript {
        PayScript::pay_to_key_id(&hash160(tag))
    }

    fn vote(tag: &[u8], voter: u8) -> PaymentVote {
        PaymentVote::new(
            Outpoint::new(sha256d(&[voter]), 0),
            210,
            script(tag),
        )
    }

    #[test]
    fn best_payee_most_votes_first_insertion_ties() {
        let mut payees = BlockPayees::new(210);
        payees.add_vote(&vote(b"p", 1));
        payees.add_vote(&vote(b"q", 2));
        payees.add_vote(&vote(b"q", 3));
        payees.add_vote(&vote(b"p", 4));
        // Tied 2-2; P was inserted first.
        assert_eq!(payees.best_payee().unwrap().script(), &script(b"p"));

        payees.add_vote(&vote(b"q", 5));
        assert_eq!(payees.best_payee().unwrap().script(), &script(b"q"));
    }

    #[test]
    fn coinbase_validation_enforces_six_votes() {
        let mut payees = BlockPayees::new(210);
        for voter in 0..5 {
            payees.add_vote(&vote(b"p", voter));
        }
        let pays_q = CoinbaseOutputs {
            total_value: 100,
            outputs: vec![TxOut {
                value: 30,
                script: script(b"q"),
            }],
        };
        // Below the signature threshold everything passes.
        assert!(payees.is_transaction_valid(&pays_q, 30));

        payees.add_vote(&vote(b"p", 5));
        assert_eq!(payees.max_votes(), 6);
        assert!(!payees.is_transaction_valid(&pays_q, 30));

        let pays_p = CoinbaseOutputs {
            total_value: 100,
            outputs: vec![TxOut {
                value: 30,
                script: script(b"p"),
            }],
        };
        assert!(payees.is_transaction_valid(&pays_p, 30));

        // Right payee, wrong amount.
        assert!(!payees.is_transaction_valid(&pays_p, 31));
    }

    #[test]
    fn required_payments_string_lists_counts() {
        let mut payees = BlockPayees::new(210);
        assert_eq!(payees.required_payments_string(), "Unknown");
        payees.add_vote(&vote(b"p", 1));
        payees.add_vote(&vote(b"p", 2));
        assert!(payees.required_payments_string().ends_with(":2"));
    }
}
