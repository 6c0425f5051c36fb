use once_cell::sync::Lazy;
use std::env;

pub static BASE_URL: Lazy<String> =
    Lazy::new(|| env::var("STORE_BASE_URL").unwrap_or_else(|_| "https://drmersclub.com".to_string()));

pub static COLLECTION_URL: Lazy<String> = Lazy::new(|| format!("{}/collections/shop-all", *BASE_URL));

pub static PRODUCTS_JSON_URL: Lazy<String> =
    Lazy::new(|| format!("{}/products.json", *COLLECTION_URL));

pub const PRODUCTS_PER_PAGE: usize = 250;

// Must be unique per importer to avoid cross-store collisions in the shared table.
pub const SOURCE: &str = "drmersclub";
pub const BRAND: &str = "Drmers Club";

pub const GENDER: &str = "man";
pub const COUNTRY: &str = "CA";
pub const SECOND_HAND: bool = false;
pub const DEFAULT_CURRENCY: &str = "CAD";

// siglip-base outputs 768-dim; must match the Supabase vector column.
pub const EMBEDDING_DIM: usize = 768;

pub static SIGLIP_MODEL_DIR: Lazy<String> = Lazy::new(|| {
    env::var("SIGLIP_MODEL_DIR").unwrap_or_else(|_| "models/siglip-base-patch16-384".to_string())
});
