/// This module maintains the human-readable version manifest: one section per
/// contract, each holding a table with one row per network.
use ethers::types::{Address, H256};
use serde_json::Value;

const TITLE: &str = "# Deployments";
const TABLE_HEADER: &str = "| Network | Address | Constructor Args | Salt |";
const TABLE_SEPARATOR: &str = "| --- | --- | --- | --- |";

/// One row of the manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub contract: String,
    pub network: String,
    pub address: Address,
    pub explorer_link: Option<String>,
    pub args: Vec<Value>,
    pub salt: Option<H256>,
}

impl ManifestEntry {
    fn row(&self) -> String {
        let address = match &self.explorer_link {
            Some(link) => format!("[{:#x}]({})", self.address, link),
            None => format!("{:#x}", self.address),
        };
        let args = Value::Array(self.args.clone()).to_string().replace('|', "\\|");
        let salt = self
            .salt
            .map(|salt| format!("`{:#x}`", salt))
            .unwrap_or_else(|| "-".to_string());
        format!("| {} | {} | `{}` | {} |", self.network, address, args, salt)
    }
}

/// Returns the manifest with `entry` applied. An existing row for the same
/// contract and network is replaced in place, a new network gets a new row
/// at the end of the contract's table, and a new contract gets a new section.
pub fn apply(contents: &str, entry: &ManifestEntry) -> String {
    let mut lines = contents.lines().map(str::to_string).collect::<Vec<_>>();
    if lines.is_empty() {
        lines.push(TITLE.to_string());
    }

    let heading = format!("## {}", entry.contract);
    let row = entry.row();
    match lines.iter().position(|line| *line == heading) {
        Some(start) => {
            let end = lines[start + 1..]
                .iter()
                .position(|line| line.starts_with("## "))
                .map(|offset| start + 1 + offset)
                .unwrap_or(lines.len());
            let row_prefix = format!("| {} |", entry.network);
            if let Some(existing) = (start + 1..end).find(|&i| lines[i].starts_with(&row_prefix)) {
                lines[existing] = row;
            } else {
                let last_row = (start + 1..end)
                    .rev()
                    .find(|&i| lines[i].starts_with('|'));
                match last_row {
                    Some(i) => lines.insert(i + 1, row),
                    None => {
                        let table = [
                            String::new(),
                            TABLE_HEADER.to_string(),
                            TABLE_SEPARATOR.to_string(),
                            row,
                        ];
                        lines.splice(start + 1..start + 1, table);
                    }
                }
            }
        }
        None => {
            lines.extend([
                String::new(),
                heading,
                String::new(),
                TABLE_HEADER.to_string(),
                TABLE_SEPARATOR.to_string(),
                row,
            ]);
        }
    }

    let mut updated = lines.join("\n");
    updated.push('\n');
    updated
}
