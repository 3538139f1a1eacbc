// =============================================================================
// Symbol Catalog — the fixed, ordered list of tracked instruments
// =============================================================================
//
// Built once at start-up from configuration. Declaration order is the
// iteration order of every refresh cycle.
// =============================================================================

use std::collections::HashSet;

use anyhow::Result;

use crate::types::Symbol;

/// Static ordered list of tracked symbols.
#[derive(Debug, Clone)]
pub struct SymbolCatalog {
    symbols: Vec<Symbol>,
}

impl SymbolCatalog {
    /// Build a catalog, rejecting empty or duplicate ids.
    pub fn new(symbols: Vec<Symbol>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(symbols.len());
        for symbol in &symbols {
            if symbol.id.trim().is_empty() {
                anyhow::bail!("catalog entry '{}' has an empty id", symbol.display_name);
            }
            if !seen.insert(symbol.id.as_str()) {
                anyhow::bail!("duplicate symbol id in catalog: {}", symbol.id);
            }
        }
        Ok(Self { symbols })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Symbol> {
        self.symbols.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_declaration_order() {
        let catalog = SymbolCatalog::new(vec![
            Symbol::new("ETHUSDT", "Ethereum", "ETH"),
            Symbol::new("BTCUSDT", "Bitcoin", "BTC"),
        ])
        .unwrap();
        let ids: Vec<&str> = catalog.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["ETHUSDT", "BTCUSDT"]);
        assert_eq!(catalog.get("BTCUSDT").map(|s| s.base_asset.as_str()), Some("BTC"));
        assert!(catalog.get("DOGEUSDT").is_none());
        assert_eq!(catalog.len(), 2);
        assert!(!catalog.is_empty());
    }

    #[test]
    fn rejects_duplicates() {
        let err = SymbolCatalog::new(vec![
            Symbol::new("BTCUSDT", "Bitcoin", "BTC"),
            Symbol::new("BTCUSDT", "Bitcoin again", "BTC"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_blank_ids() {
        assert!(SymbolCatalog::new(vec![Symbol::new(" ", "Blank", "B")]).is_err());
    }
}
