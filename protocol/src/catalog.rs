//! Product catalog.
//!
//! A static list of products loaded from `products.json` at startup. The
//! core only reads it: price at purchase start, grant commands at
//! completion.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder replaced by the buyer's UUID in grant commands.
pub const PLACEHOLDER_PLAYER_UUID: &str = "{PLAYER_UUID}";

/// Placeholder replaced by the buyer's display name in grant commands.
pub const PLACEHOLDER_PLAYER_NAME: &str = "{PLAYER_NAME}";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to access catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate product id {0}")]
    DuplicateId(u32),

    #[error("product {0} must have a price above zero")]
    ZeroPrice(u32),
}

/// A purchasable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Price in ledger units.
    pub price: u64,
    /// Console commands run, in order, when a purchase completes.
    #[serde(default)]
    pub commands: Vec<String>,
}

/// Immutable product lookup, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: BTreeMap<u32, Product>,
}

impl Catalog {
    /// Builds a catalog, rejecting duplicate ids and free products.
    pub fn from_products(products: Vec<Product>) -> Result<Self, CatalogError> {
        let mut map = BTreeMap::new();
        for product in products {
            if product.price == 0 {
                return Err(CatalogError::ZeroPrice(product.id));
            }
            let id = product.id;
            if map.insert(id, product).is_some() {
                return Err(CatalogError::DuplicateId(id));
            }
        }
        Ok(Self { products: map })
    }

    /// Loads `products.json`: a JSON array of products.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let products: Vec<Product> = serde_json::from_str(&raw)?;
        let catalog = Self::from_products(products)?;
        tracing::info!(path = %path.display(), products = catalog.len(), "catalog loaded");
        Ok(catalog)
    }

    /// Writes the starter catalog to `path` and returns it.
    pub fn write_defaults(path: &Path) -> Result<Self, CatalogError> {
        let products = default_products();
        let body = serde_json::to_string_pretty(&products)?;
        fs::write(path, body).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_products(products)
    }

    pub fn get(&self, id: u32) -> Option<&Product> {
        self.products.get(&id)
    }

    /// All products in id order.
    pub fn all(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

/// Starter products written on first setup.
pub fn default_products() -> Vec<Product> {
    vec![
        Product {
            id: 0,
            name: "Test".to_string(),
            description: "This is a test product".to_string(),
            price: 1337,
            commands: vec!["say Hello there".to_string()],
        },
        Product {
            id: 1,
            name: "Test 2".to_string(),
            description: "This is another test product".to_string(),
            price: 10,
            commands: vec![format!("give {} apple 16", PLACEHOLDER_PLAYER_NAME)],
        },
    ]
}
