use alloy_primitives::Address;
use serde::Serialize;

/// One sub-threshold holding. Which value fields are present depends on
/// the pricing path that resolved it: on-chain quotes fill `native_value`,
/// the holdings registry and the stablecoin heuristic fill `usd_value`.
#[derive(Debug, Clone, Serialize)]
pub struct DustItem {
    pub symbol: String,
    pub contract: Address,
    pub amount: f64,
    pub decimals: u8,
    pub raw_balance: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usd_value: Option<f64>,
}

/// The document every public operation returns, including failures. Field
/// names are a stable boundary for downstream consumers; `swaps_done` is
/// present only after an orchestrator pass.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub source: String,
    pub wallet: Address,
    pub dust: Vec<DustItem>,
    pub dust_count: usize,
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swaps_done: Option<usize>,
}

impl SweepReport {
    pub fn new(source: &str, wallet: Address) -> Self {
        SweepReport {
            source: source.to_string(),
            wallet,
            dust: Vec::new(),
            dust_count: 0,
            notes: Vec::new(),
            swaps_done: None,
        }
    }

    /// Structured failure response in place of a raised error.
    pub fn error(source: &str, wallet: Address, note: impl Into<String>) -> Self {
        let mut report = Self::new(source, wallet);
        report.notes.push(note.into());
        report
    }

    pub fn push_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn set_dust(&mut self, dust: Vec<DustItem>) {
        self.dust_count = dust.len();
        self.dust = dust;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_report_serializes_stable_field_names() {
        let wallet = Address::from_str("0x0000000000000000000000000000000000000123").unwrap();
        let mut report = SweepReport::new("sweep_engine", wallet);
        report.set_dust(vec![DustItem {
            symbol: "DUST".to_string(),
            contract: Address::from_str("0x00000000000000000000000000000000000000aa").unwrap(),
            amount: 0.000001,
            decimals: 18,
            raw_balance: "1000000".to_string(),
            native_value: Some(0.05),
            usd_value: None,
        }]);
        report.push_note("Candidates=1");
        report.swaps_done = Some(0);

        let value = serde_json::to_value(&report).unwrap();
        for key in ["source", "wallet", "dust", "dust_count", "notes", "swaps_done"] {
            assert!(value.get(key).is_some(), "missing field {key}");
        }
        assert_eq!(value["dust_count"], 1);

        let item = &value["dust"][0];
        assert!(item.get("native_value").is_some());
        assert!(item.get("usd_value").is_none());
    }

    #[test]
    fn test_error_report_has_empty_dust_and_a_note() {
        let wallet = Address::from_str("0x0000000000000000000000000000000000000123").unwrap();
        let report = SweepReport::error("error_rpc_unreachable", wallet, "no endpoint responded");

        assert_eq!(report.dust_count, 0);
        assert!(report.dust.is_empty());
        assert_eq!(report.notes.len(), 1);

        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("swaps_done").is_none());
    }
}
