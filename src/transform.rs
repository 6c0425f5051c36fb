use crate::config::{
    BRAND, COLLECTION_URL, COUNTRY, DEFAULT_CURRENCY, GENDER, SECOND_HAND, SOURCE,
};
use crate::models::ProductRow;
use crate::shopify::{RawProduct, RawVariant};
use chrono::Utc;
use scraper::Html;
use serde_json::{Value, json};

/// Strip tags and decode entities, collapsing runs of whitespace.
pub fn strip_html(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let fragment = Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Category string: product_type joined with all tags, comma-separated,
/// omitting empty entries.
pub fn format_category(product_type: &str, tags: &[String]) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if !product_type.trim().is_empty() {
        parts.push(product_type.trim());
    }
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() {
            parts.push(tag);
        }
    }
    parts.join(", ")
}

/// One `{amount}{currency}` pair per variant, in variant order. A variant
/// with no price at all contributes nothing (missing-field tolerance),
/// rather than an amountless currency code.
pub fn format_price(variants: &[RawVariant]) -> String {
    variants
        .iter()
        .filter(|v| !v.price.trim().is_empty())
        .map(|v| {
            format!(
                "{}{}",
                v.price.trim(),
                v.currency.as_deref().unwrap_or(DEFAULT_CURRENCY)
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Sale marker when any variant's compare_at_price exceeds its price.
pub fn format_sale(variants: &[RawVariant]) -> Option<String> {
    for variant in variants {
        let Ok(price) = variant.price.trim().parse::<f64>() else {
            continue;
        };
        let Some(compare) = variant
            .compare_at_price
            .as_deref()
            .and_then(|c| c.trim().parse::<f64>().ok())
        else {
            continue;
        };
        if compare > price {
            let currency = variant.currency.as_deref().unwrap_or(DEFAULT_CURRENCY);
            return Some(format!(
                "Sale: {price:.2}{currency} (was {compare:.2}{currency})"
            ));
        }
    }
    None
}

/// Distinct size options from variants, in variant order.
pub fn format_sizes(variants: &[RawVariant]) -> String {
    let mut sizes: Vec<String> = Vec::new();
    for variant in variants {
        let Some(option) = variant.option1.as_deref().or(variant.title.as_deref()) else {
            continue;
        };
        let option = option.trim();
        if !option.is_empty() && !sizes.iter().any(|s| s == option) {
            sizes.push(option.to_string());
        }
    }
    sizes.join(", ")
}

fn none_if_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

/// Pure mapping from a raw catalog record to the output row, embeddings
/// left unset.
pub fn build_row(raw: &RawProduct) -> ProductRow {
    let product_url = if raw.handle.is_empty() {
        String::new()
    } else {
        format!("{}/products/{}", *COLLECTION_URL, raw.handle)
    };

    let image_urls: Vec<&str> = raw
        .images
        .iter()
        .map(|img| img.src.as_str())
        .filter(|src| !src.is_empty())
        .collect();
    let image_url = image_urls.first().copied().unwrap_or_default().to_string();
    let additional_images = if image_urls.len() > 1 {
        Some(image_urls[1..].join(" , "))
    } else {
        None
    };

    let metadata = json!({
        "product_id": raw.id.to_string(),
        "handle": raw.handle,
        "vendor": raw.vendor,
        "product_type": raw.product_type,
        "tags": raw.tags,
        "published_at": raw.published_at,
        "created_at": raw.created_at,
        "updated_at": raw.updated_at,
        "variants_count": raw.variants.len(),
    });

    ProductRow {
        id: format!("{SOURCE}_{}", raw.id),
        source: SOURCE,
        brand: BRAND,
        title: raw.title.clone(),
        description: none_if_empty(strip_html(&raw.body_html)),
        product_url,
        affiliate_url: None,
        image_url,
        additional_images,
        category: none_if_empty(format_category(&raw.product_type, &raw.tags)),
        gender: GENDER,
        size: none_if_empty(format_sizes(&raw.variants)),
        price: none_if_empty(format_price(&raw.variants)),
        sale: format_sale(&raw.variants),
        second_hand: SECOND_HAND,
        country: COUNTRY,
        tags: if raw.tags.is_empty() {
            None
        } else {
            Some(raw.tags.clone())
        },
        metadata: Some(metadata.to_string()),
        other: None,
        created_at: Utc::now(),
        image_embedding: None,
        info_embedding: None,
    }
}

/// Concatenated text fed to the text encoder for `info_embedding`.
pub fn build_info_text(row: &ProductRow) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut push = |value: &str| {
        if !value.trim().is_empty() {
            parts.push(value.trim().to_string());
        }
    };
    push(&row.title);
    push(row.brand);
    push(row.description.as_deref().unwrap_or_default());
    push(row.category.as_deref().unwrap_or_default());
    push(row.gender);
    push(row.price.as_deref().unwrap_or_default());
    push(row.size.as_deref().unwrap_or_default());

    if let Some(meta) = row
        .metadata
        .as_deref()
        .and_then(|m| serde_json::from_str::<Value>(m).ok())
    {
        if let Some(product_type) = meta.get("product_type").and_then(Value::as_str) {
            push(product_type);
        }
        if let Some(tags) = meta.get("tags").and_then(Value::as_array) {
            let joined = tags
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" ");
            push(&joined);
        }
    }
    parts.join(" ")
}
