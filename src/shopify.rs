use crate::config::{PRODUCTS_JSON_URL, PRODUCTS_PER_PAGE};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::{Duration, sleep};
use tracing::info;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// Product record as served by the storefront's `products.json`. The shape
/// is owned by the platform; absent fields fall back to empty values.
#[derive(Debug, Clone, Deserialize)]
pub struct RawProduct {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub body_html: String,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub product_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub variants: Vec<RawVariant>,
    #[serde(default)]
    pub images: Vec<RawImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawVariant {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub option1: Option<String>,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub compare_at_price: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawImage {
    #[serde(default)]
    pub src: String,
}

#[derive(Debug, Deserialize)]
struct ProductsPage {
    #[serde(default)]
    products: Vec<RawProduct>,
}

pub fn page_url(page: usize) -> String {
    format!(
        "{}?limit={}&page={}",
        *PRODUCTS_JSON_URL, PRODUCTS_PER_PAGE, page
    )
}

// Pagination continues only while pages come back full and the collected
// total is still under the limit.
fn keep_paging(total: usize, page_count: usize, limit: Option<usize>) -> bool {
    if let Some(limit) = limit
        && total >= limit
    {
        return false;
    }
    page_count == PRODUCTS_PER_PAGE
}

/// Walks the paginated catalog until an empty page, a final partial page, or
/// `limit` records. Any transport or non-2xx response aborts the run.
pub async fn fetch_all_products(
    client: &Client,
    limit: Option<usize>,
) -> Result<Vec<RawProduct>, CatalogError> {
    let mut all = Vec::new();
    let mut page = 1usize;
    loop {
        let url = page_url(page);
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(CatalogError::Request(format!(
                "HTTP {} for page {page}",
                response.status()
            )));
        }
        let body: ProductsPage = response
            .json()
            .await
            .map_err(|err| CatalogError::Deserialize(err.to_string()))?;
        let count = body.products.len();
        if count == 0 {
            break;
        }
        all.extend(body.products);
        info!(
            target = "importer.catalog",
            page,
            count,
            total = all.len(),
            "fetched catalog page"
        );
        if !keep_paging(all.len(), count, limit) {
            break;
        }
        page += 1;
        // Be polite to the storefront.
        sleep(Duration::from_millis(500)).await;
    }
    if let Some(limit) = limit {
        all.truncate(limit);
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_url_carries_limit_and_page() {
        let url = page_url(3);
        assert!(url.ends_with("/collections/shop-all/products.json?limit=250&page=3"));
    }

    #[test]
    fn paging_stops_once_limit_is_reached() {
        // Five collected with --limit 5 ends the walk even on a full page.
        assert!(!keep_paging(5, PRODUCTS_PER_PAGE, Some(5)));
        assert!(!keep_paging(7, PRODUCTS_PER_PAGE, Some(5)));
        // Under the limit, a full page keeps going.
        assert!(keep_paging(3, PRODUCTS_PER_PAGE, Some(5)));
    }

    #[test]
    fn paging_stops_on_a_final_partial_page() {
        assert!(!keep_paging(300, PRODUCTS_PER_PAGE - 1, None));
        assert!(keep_paging(250, PRODUCTS_PER_PAGE, None));
    }

    #[test]
    fn deserializes_catalog_page() {
        let payload = serde_json::json!({
            "products": [{
                "id": 123,
                "title": "Cloud Hoodie",
                "handle": "cloud-hoodie",
                "body_html": "<p>Soft fleece.</p>",
                "vendor": "DRMERS CLUB",
                "product_type": "Hoodie",
                "tags": ["hoodie", "basics"],
                "variants": [
                    {"title": "S", "option1": "S", "price": "140.00"},
                    {"title": "M", "option1": "M", "price": "140.00",
                     "compare_at_price": "160.00"}
                ],
                "images": [
                    {"src": "https://cdn.example.com/a.jpg"},
                    {"src": "https://cdn.example.com/b.jpg"}
                ]
            }]
        });
        let page: ProductsPage = serde_json::from_value(payload).expect("parse page");
        assert_eq!(page.products.len(), 1);
        let product = &page.products[0];
        assert_eq!(product.id, 123);
        assert_eq!(product.variants.len(), 2);
        assert_eq!(product.variants[1].compare_at_price.as_deref(), Some("160.00"));
        assert_eq!(product.images[0].src, "https://cdn.example.com/a.jpg");
    }

    #[test]
    fn tolerates_missing_fields() {
        let page: ProductsPage =
            serde_json::from_value(serde_json::json!({"products": [{"id": 7}]})).expect("parse");
        let product = &page.products[0];
        assert!(product.title.is_empty());
        assert!(product.variants.is_empty());
        assert!(product.images.is_empty());
    }

    #[test]
    fn tolerates_empty_body() {
        let page: ProductsPage = serde_json::from_value(serde_json::json!({})).expect("parse");
        assert!(page.products.is_empty());
    }
}
