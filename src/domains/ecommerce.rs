//! Shopping consultant over a product catalog

use super::{format_amount, DomainProfile};
use crate::error::EngineError;
use crate::prompt::Persona;
use crate::tools::{
    ensure_object, optional_limit, optional_number, optional_str, require_str, Tool, ToolContext,
    ToolRegistry,
};
use crate::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

const PERSONA: &str = "Act as a friendly shopping consultant. Recommend products from the catalog only, \
quote prices exactly as the tools return them, and ask about budget or use case when the request is vague.";

const KNOWLEDGE: &str = "Shipping is free on orders over 50. Returns are accepted within 30 days in original packaging.\n\
Catalog categories: audio, computing, home, outdoor.";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Product {
    pub sku: String,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub description: String,
}

impl Product {
    fn new(sku: &str, name: &str, category: &str, price: f64, description: &str) -> Self {
        Self {
            sku: sku.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            price,
            description: description.to_string(),
        }
    }

    fn matches_terms(&self, terms: &[String]) -> bool {
        let haystack = format!("{} {} {}", self.name, self.category, self.description).to_lowercase();
        terms.iter().all(|t| haystack.contains(t.as_str()))
    }
}

#[derive(Debug, Default, Clone)]
pub struct ProductQuery {
    pub terms: Vec<String>,
    pub max_price: Option<f64>,
    pub category: Option<String>,
    pub limit: usize,
}

/// Read-only catalog shared by every owner
pub struct Catalog {
    products: Vec<Product>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }

    pub fn sample() -> Self {
        Self::new(vec![
            Product::new("AUD-100", "Wireless Earbuds", "audio", 59.0, "Bluetooth earbuds with noise cancelling and 24h battery"),
            Product::new("AUD-200", "Studio Headphones", "audio", 149.0, "Over-ear wired headphones for mixing and monitoring"),
            Product::new("AUD-300", "Portable Speaker", "audio", 39.5, "Waterproof bluetooth speaker for travel"),
            Product::new("CMP-100", "Mechanical Keyboard", "computing", 89.0, "Tenkeyless keyboard with hot-swappable switches"),
            Product::new("CMP-200", "USB-C Hub", "computing", 29.99, "7-in-1 hub with HDMI, ethernet and card reader"),
            Product::new("HOM-100", "Smart Lamp", "home", 24.0, "Dimmable colour lamp with app control"),
            Product::new("HOM-200", "Espresso Machine", "home", 219.0, "Pump espresso machine with steam wand"),
            Product::new("OUT-100", "Trail Backpack", "outdoor", 74.0, "28L hiking backpack with rain cover"),
        ])
    }

    pub fn get(&self, sku: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.sku.eq_ignore_ascii_case(sku))
    }

    /// Cheapest first
    pub fn search(&self, query: &ProductQuery) -> Vec<Product> {
        let mut found: Vec<Product> = self
            .products
            .iter()
            .filter(|p| p.matches_terms(&query.terms))
            .filter(|p| query.max_price.map_or(true, |max| p.price <= max))
            .filter(|p| {
                query
                    .category
                    .as_deref()
                    .map_or(true, |c| p.category.eq_ignore_ascii_case(c))
            })
            .cloned()
            .collect();

        found.sort_by(|a, b| a.price.total_cmp(&b.price));
        found.truncate(query.limit);
        found
    }
}

pub fn profile() -> DomainProfile {
    let catalog = Arc::new(Catalog::sample());
    let registry = ToolRegistry::new()
        .with(Arc::new(SearchProductsTool {
            catalog: catalog.clone(),
        }))
        .with(Arc::new(GetProductTool { catalog }));

    DomainProfile {
        kind: "ecommerce".to_string(),
        persona: Persona::new("Max, a shopping consultant", PERSONA),
        domain_knowledge: KNOWLEDGE.to_string(),
        registry,
        collection: Some("product_catalog".to_string()),
    }
}

pub struct SearchProductsTool {
    catalog: Arc<Catalog>,
}

#[async_trait::async_trait]
impl Tool for SearchProductsTool {
    fn name(&self) -> &'static str {
        "searchProducts"
    }

    fn description(&self) -> &'static str {
        "Search the catalog by keywords, category and maximum price"
    }

    fn usage(&self) -> &'static str {
        r#"{"query": "bluetooth", "category": "audio", "maxPrice": 100, "limit": 5}"#
    }

    async fn execute(&self, _ctx: &ToolContext, args: &Value) -> Result<Value> {
        ensure_object(args)?;
        let max_price = optional_number(args, "maxPrice")?;
        if matches!(max_price, Some(p) if !p.is_finite() || p < 0.0) {
            return Err(EngineError::InvalidToolInput(
                "'maxPrice' must be zero or more".to_string(),
            ));
        }

        let query = ProductQuery {
            terms: optional_str(args, "query")
                .map(|q| q.to_lowercase().split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            max_price,
            category: optional_str(args, "category").map(str::to_string),
            limit: optional_limit(args, 5, 20)?,
        };

        let products = self.catalog.search(&query);
        Ok(json!({
            "count": products.len(),
            "products": products,
        }))
    }
}

pub struct GetProductTool {
    catalog: Arc<Catalog>,
}

#[async_trait::async_trait]
impl Tool for GetProductTool {
    fn name(&self) -> &'static str {
        "getProduct"
    }

    fn description(&self) -> &'static str {
        "Fetch one product by SKU"
    }

    fn usage(&self) -> &'static str {
        r#"{"sku": "AUD-100"}"#
    }

    async fn execute(&self, _ctx: &ToolContext, args: &Value) -> Result<Value> {
        let sku = require_str(args, "sku")?;
        let product = self
            .catalog
            .get(sku)
            .ok_or_else(|| EngineError::ToolExecutionError(format!("no product with SKU '{}'", sku)))?;

        Ok(json!(format!(
            "{} ({}): {}. Price: {}",
            product.name,
            product.sku,
            product.description,
            format_amount(product.price)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext {
            owner_id: "shopper".into(),
            session_id: "s1".into(),
        }
    }

    #[test]
    fn test_catalog_search_filters() {
        let catalog = Catalog::sample();
        let found = catalog.search(&ProductQuery {
            terms: vec!["bluetooth".into()],
            max_price: Some(50.0),
            category: None,
            limit: 10,
        });
        let skus: Vec<&str> = found.iter().map(|p| p.sku.as_str()).collect();
        assert_eq!(skus, vec!["AUD-300"]);

        let audio = catalog.search(&ProductQuery {
            category: Some("AUDIO".into()),
            limit: 2,
            ..Default::default()
        });
        assert_eq!(audio.len(), 2);
        assert!(audio[0].price <= audio[1].price);
    }

    #[tokio::test]
    async fn test_search_tool() {
        let tool = SearchProductsTool {
            catalog: Arc::new(Catalog::sample()),
        };
        let out = tool
            .execute(&ctx(), &json!({"query": "Keyboard", "maxPrice": "100"}))
            .await
            .unwrap();
        assert_eq!(out["count"], 1);
        assert_eq!(out["products"][0]["sku"], "CMP-100");

        assert!(tool.execute(&ctx(), &json!({"maxPrice": -1})).await.is_err());
    }

    #[tokio::test]
    async fn test_get_product() {
        let tool = GetProductTool {
            catalog: Arc::new(Catalog::sample()),
        };
        let out = tool.execute(&ctx(), &json!({"sku": "cmp-200"})).await.unwrap();
        assert_eq!(
            out,
            json!("USB-C Hub (CMP-200): 7-in-1 hub with HDMI, ethernet and card reader. Price: 29.99")
        );

        let err = tool.execute(&ctx(), &json!({"sku": "NOPE"})).await.unwrap_err();
        assert!(matches!(err, EngineError::ToolExecutionError(_)));
    }
}
