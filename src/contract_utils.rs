/// Contract metadata and compiled-artifact loading.
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use glob::glob;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One compiled contract handed to the campaign. `contract_name` keeps the
/// solc-style fully qualified form `<path>.sol:<Contract>`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContractInfo {
    pub contract_name: String,
    pub abi_json: String,
    /// Creation bytecode, hex encoded.
    pub bin: String,
    /// Runtime bytecode, hex encoded.
    pub bin_runtime: String,
    pub is_main: bool,
}

impl ContractInfo {
    /// Contract name after the last `:`.
    pub fn short_name(&self) -> &str {
        match self.contract_name.rfind(':') {
            Some(pos) => &self.contract_name[pos + 1..],
            None => &self.contract_name,
        }
    }

    /// Short name with anything but `[A-Za-z0-9_-]` replaced, safe for
    /// file-system use.
    pub fn sanitized_short_name(&self) -> String {
        self.short_name()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Source path before the `:`.
    pub fn path_part(&self) -> &str {
        match self.contract_name.find(':') {
            Some(pos) => &self.contract_name[..pos],
            None => &self.contract_name,
        }
    }

    /// Source file stem (`contracts/Puzzle.sol:Puzzle` -> `Puzzle`), the
    /// key under which records of this contract are persisted.
    pub fn file_stem(&self) -> String {
        let path = self.path_part();
        let base = match path.rfind('/') {
            Some(pos) => &path[pos + 1..],
            None => path,
        };
        base.strip_suffix(".sol").unwrap_or(base).to_string()
    }

    /// Source path with the `.sol` suffix removed, used to derive report
    /// file names.
    pub fn path_sans_sol(&self) -> String {
        let path = self.path_part();
        path.strip_suffix(".sol").unwrap_or(path).to_string()
    }
}

/// Loads `.abi` / `.bin` / `.bin-runtime` triples produced by solc.
#[derive(Clone, Debug, Default)]
pub struct ContractLoader {
    pub contracts: Vec<ContractInfo>,
}

impl ContractLoader {
    fn read_artifact(path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .map(|data| data.trim().to_string())
            .with_context(|| format!("failed to read {}", path.display()))
    }

    /// Load every contract matching `pattern`; `main_name` selects the
    /// contract under test.
    pub fn from_glob(pattern: &str, main_name: &str) -> Result<Self> {
        let mut stems: HashMap<String, ContractInfo> = HashMap::new();
        for entry in glob(pattern).context("invalid artifact glob")? {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!("skipping unreadable artifact: {}", e);
                    continue;
                }
            };
            let path_str = path.display().to_string();
            let (stem, slot) = if let Some(stem) = path_str.strip_suffix(".bin-runtime") {
                (stem.to_string(), 2)
            } else if let Some(stem) = path_str.strip_suffix(".abi") {
                (stem.to_string(), 0)
            } else if let Some(stem) = path_str.strip_suffix(".bin") {
                (stem.to_string(), 1)
            } else {
                continue;
            };

            let info = stems.entry(stem.clone()).or_insert_with(|| {
                let short = match stem.rfind('/') {
                    Some(pos) => &stem[pos + 1..],
                    None => stem.as_str(),
                };
                ContractInfo {
                    contract_name: format!("{}.sol:{}", stem, short),
                    is_main: short == main_name,
                    ..Default::default()
                }
            });
            let data = Self::read_artifact(&path)?;
            match slot {
                0 => info.abi_json = data,
                1 => info.bin = data,
                2 => info.bin_runtime = data,
                _ => unreachable!(),
            }
        }

        let contracts: Vec<ContractInfo> = stems
            .into_values()
            .filter(|info| !info.bin.is_empty())
            .collect();
        if contracts.is_empty() {
            return Err(anyhow!("no contract artifacts under {}", pattern));
        }
        Ok(Self { contracts })
    }
}
