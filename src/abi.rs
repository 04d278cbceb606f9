/// ABI-side collaborators: testcase generation and normalisation, plus the
/// JSON view of an executed testcase consumed by the reporter.
use serde::{Deserialize, Serialize};

/// Encoder/decoder for testcases, provided by the ABI layer.
pub trait AbiCodec {
    /// A canonical random testcase.
    fn random_testcase(&mut self) -> Vec<u8>;

    /// Normalise sizes and encodings of a raw candidate. Idempotent:
    /// post-processing an already processed testcase is a no-op.
    fn postprocess_testdata(&self, data: &[u8]) -> Vec<u8>;
}

/// Top-level JSON shape of an executed testcase as produced by the executor.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TestcaseView {
    #[serde(default)]
    pub accounts: Vec<AccountView>,
    #[serde(default)]
    pub functions: Vec<FunctionView>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AccountView {
    /// Wei balance as a decimal string.
    #[serde(default)]
    pub balance: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct FunctionView {
    /// Empty for the fallback function.
    #[serde(default)]
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_testcase_view_parses_executor_json() {
        let raw = r#"{
            "accounts": [{"balance": "1000000000000000000"}, {"balance": "0"}],
            "functions": [{"name": "withdraw"}, {"name": ""}]
        }"#;
        let view: TestcaseView = serde_json::from_str(raw).unwrap();
        assert_eq!(view.accounts.len(), 2);
        assert_eq!(view.accounts[0].balance, "1000000000000000000");
        assert_eq!(view.functions[0].name, "withdraw");
        assert_eq!(view.functions[1].name, "");
    }

    #[test]
    fn test_testcase_view_tolerates_missing_fields() {
        let view: TestcaseView = serde_json::from_str("{}").unwrap();
        assert!(view.accounts.is_empty());
        assert!(view.functions.is_empty());
    }

    #[test]
    fn test_postprocess_is_idempotent() {
        let abi = crate::test_utils::PaddingAbi;
        let once = abi.postprocess_testdata(&[1, 2, 3]);
        let twice = abi.postprocess_testdata(&once);
        assert_eq!(once.len() % 32, 0);
        assert_eq!(once, twice);
    }
}
