//! Per-network parameters.

use serde::{Deserialize, Serialize};

/// Protocol version this build speaks.
pub const PROTOCOL_VERSION: i32 = 90026;

/// Oldest protocol allowed to vote and win payments.
pub const MIN_PAYMENT_PROTO_V1: i32 = 90023;

/// Protocol required once the pay-updated-nodes spork is active.
pub const MIN_PAYMENT_PROTO_V2: i32 = 90024;

/// Which chain we are on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Production network.
    Mainnet,
    /// Public test network.
    Testnet,
    /// Local regression testing; address checks are relaxed.
    Regtest,
}

/// Consensus-adjacent knobs the subsystem needs from the host chain.
#[derive(Debug, Clone)]
pub struct NetworkParams {
    /// Which chain.
    pub network: Network,
    /// Default P2P port; enforced as the only port on mainnet and
    /// forbidden elsewhere.
    pub mainnet_port: u16,
    /// Confirmations the collateral needs before an announce is valid.
    pub min_collateral_confirmations: u32,
    /// Height at which enode payments (and their enforcement) begin.
    pub payments_start_height: u32,
    /// Numerator of the enode share of the coinbase value, over 100.
    pub payment_percent: u64,
}

impl NetworkParams {
    /// Mainnet defaults.
    pub fn mainnet() -> Self {
        Self {
            network: Network::Mainnet,
            mainnet_port: 8255,
            min_collateral_confirmations: 15,
            payments_start_height: 10_000,
            payment_percent: 30,
        }
    }

    /// Testnet defaults.
    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            min_collateral_confirmations: 15,
            payments_start_height: 1_000,
            ..Self::mainnet()
        }
    }

    /// Regtest defaults: tiny confirmation window, relaxed addresses.
    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            min_collateral_confirmations: 1,
            payments_start_height: 0,
            ..Self::mainnet()
        }
    }

    /// Port rule: the default port on mainnet only.
    pub fn is_valid_port(&self, port: u16) -> bool {
        match self.network {
            Network::Mainnet => port == self.mainnet_port,
            _ => port != self.mainnet_port,
        }
    }

    /// The enode share of a block's coinbase value.
    pub fn enode_payment(&self, _height: u32, coinbase_value: u64) -> u64 {
        coinbase_value * self.payment_percent / 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_rule_flips_off_mainnet() {
        let main = NetworkParams::mainnet();
        assert!(main.is_valid_port(main.mainnet_port));
        assert!(!main.is_valid_port(18_255));

        let test = NetworkParams::testnet();
        assert!(!test.is_valid_port(test.mainnet_port));
        assert!(test.is_valid_port(18_255));
    }

    #[test]
    fn payment_share() {
        let params = NetworkParams::mainnet();
        assert_eq!(params.enode_payment(100, 100_000_000), 30_000_000);
    }
}
