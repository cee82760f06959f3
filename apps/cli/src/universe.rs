//! Universe CSV loading.
//!
//! Columns: `symbol,name[,exchange]`, with a header row.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, Trim};
use serde::Deserialize;

use amanah_market_data::Entity;

#[derive(Debug, Deserialize)]
struct UniverseRow {
    symbol: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    exchange: Option<String>,
}

pub fn load_universe(path: &Path) -> Result<Vec<Entity>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open universe file {}", path.display()))?;
    parse_universe(file).with_context(|| format!("Invalid universe file {}", path.display()))
}

pub fn parse_universe<R: Read>(input: R) -> Result<Vec<Entity>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(input);

    let mut seen = HashSet::new();
    let mut entities = Vec::new();
    for (index, row) in reader.deserialize::<UniverseRow>().enumerate() {
        // Header is line 1
        let line = index + 2;
        let row = row.with_context(|| format!("line {}", line))?;
        let symbol = row.symbol.to_uppercase();
        if symbol.is_empty() {
            bail!("line {}: empty symbol", line);
        }
        if !seen.insert(symbol.clone()) {
            bail!("line {}: duplicate symbol {}", line, symbol);
        }

        let name = row
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| symbol.clone());
        let mut entity = Entity::new(symbol, name);
        if let Some(exchange) = row.exchange.filter(|e| !e.is_empty()) {
            entity = entity.with_attribute("exchange", exchange);
        }
        entities.push(entity);
    }

    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_with_optional_exchange() {
        let csv = "symbol,name,exchange\naapl, Apple Inc. ,NASDAQ\n2222.SR,Saudi Aramco\n";
        let entities = parse_universe(csv.as_bytes()).unwrap();

        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].id, "AAPL");
        assert_eq!(entities[0].display_name, "Apple Inc.");
        assert_eq!(
            entities[0].static_attributes.get("exchange").map(String::as_str),
            Some("NASDAQ")
        );
        assert_eq!(entities[1].id, "2222.SR");
        assert!(entities[1].static_attributes.is_empty());
    }

    #[test]
    fn missing_name_falls_back_to_symbol() {
        let entities = parse_universe("symbol,name\nMSFT,\n".as_bytes()).unwrap();
        assert_eq!(entities[0].display_name, "MSFT");
    }

    #[test]
    fn rejects_duplicates_and_blank_symbols() {
        let err = parse_universe("symbol,name\nAAPL,Apple\naapl,Apple again\n".as_bytes())
            .unwrap_err();
        assert!(err.to_string().contains("duplicate symbol AAPL"));

        let err = parse_universe("symbol,name\n,Nameless\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("empty symbol"));
    }

    #[test]
    fn load_universe_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("universe.csv");
        std::fs::write(&path, "symbol,name\nAAPL,Apple\n").unwrap();
        assert_eq!(load_universe(&path).unwrap().len(), 1);
        assert!(load_universe(&dir.path().join("missing.csv")).is_err());
    }
}
