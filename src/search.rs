use async_trait::async_trait;
use regex::Regex;
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::{
    error::StoreError,
    types::{ListingType, PropertyCandidate},
};

/// Free-text listing search. Results come back already ranked, best first.
#[async_trait]
pub trait PropertySearch: Send + Sync {
    async fn search(&self, text: &str, limit: i64) -> Result<Vec<PropertyCandidate>, StoreError>;
}

const PROPERTY_TYPE_KEYWORDS: &[(&str, &str)] = &[
    ("คอนโด", "CONDO"),
    ("condo", "CONDO"),
    ("ทาวน์เฮ้าส์", "TOWNHOUSE"),
    ("ทาวน์โฮม", "TOWNHOUSE"),
    ("townhouse", "TOWNHOUSE"),
    ("townhome", "TOWNHOUSE"),
    ("อาคารพาณิชย์", "COMMERCIAL"),
    ("ตึกแถว", "COMMERCIAL"),
    ("shophouse", "COMMERCIAL"),
    ("บ้าน", "HOUSE"),
    ("house", "HOUSE"),
    ("ที่ดิน", "LAND"),
    ("land", "LAND"),
    ("อพาร์ทเม้นท์", "APARTMENT"),
    ("apartment", "APARTMENT"),
];

const RENT_KEYWORDS: &[&str] = &["เช่า", "rent", "rental"];
const SALE_KEYWORDS: &[&str] = &["ขาย", "ซื้อ", "buy", "sale"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub terms: Vec<String>,
    pub property_types: Vec<String>,
    pub listing: Option<ListingType>,
}

impl SearchQuery {
    pub fn parse(raw: &str) -> Self {
        let text = raw.trim().to_lowercase();
        let terms = Regex::new(r"[^\p{L}\p{M}\p{N}]+")
            .map(|re| {
                re.split(&text)
                    .filter(|term| term.chars().count() >= 2)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        // Longer keywords come first and are blanked out once matched, so
        // "townhouse" is not also read as "house".
        let mut remaining = text.clone();
        let mut property_types = Vec::new();
        for (keyword, property_type) in PROPERTY_TYPE_KEYWORDS {
            if !remaining.contains(keyword) {
                continue;
            }
            remaining = remaining.replace(keyword, " ");
            if !property_types.iter().any(|t| t == property_type) {
                property_types.push(property_type.to_string());
            }
        }

        let wants_rent = RENT_KEYWORDS.iter().any(|k| text.contains(k));
        let wants_sale = SALE_KEYWORDS.iter().any(|k| text.contains(k));
        let listing = match (wants_sale, wants_rent) {
            (true, false) => Some(ListingType::Sale),
            (false, true) => Some(ListingType::Rent),
            _ => None,
        };

        Self {
            text,
            terms,
            property_types,
            listing,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn title_patterns(&self) -> Vec<String> {
        self.terms.iter().map(|term| format!("%{term}%")).collect()
    }
}

/// Ranks active rows of the listings table: a neighborhood named in the text
/// weighs most, then property type, then title words.
#[derive(Clone)]
pub struct PgPropertySearch {
    db: PgPool,
}

impl PgPropertySearch {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn parse_candidate_row(row: PgRow) -> Result<PropertyCandidate, StoreError> {
    let listing_raw: String = row.try_get("listing_type")?;
    let Some(listing_type) = ListingType::parse(&listing_raw) else {
        return Err(StoreError::CorruptRow {
            table: "properties",
            detail: format!("unknown listing_type {listing_raw:?}"),
        });
    };
    Ok(PropertyCandidate {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        cover_image_url: row.try_get("cover_image_url")?,
        price: row.try_get("price")?,
        rental_price: row.try_get("rental_price")?,
        listing_type,
        bedrooms: row.try_get("bedrooms")?,
        bathrooms: row.try_get("bathrooms")?,
        neighborhood: row.try_get("neighborhood")?,
    })
}

#[async_trait]
impl PropertySearch for PgPropertySearch {
    async fn search(&self, text: &str, limit: i64) -> Result<Vec<PropertyCandidate>, StoreError> {
        let query = SearchQuery::parse(text);
        if query.is_empty() {
            return Ok(vec![]);
        }

        let rows = sqlx::query(
            "SELECT id, title, cover_image_url, price, rental_price, listing_type, \
                    bedrooms, bathrooms, neighborhood \
             FROM ( \
               SELECT *, \
                 (CASE WHEN COALESCE(neighborhood, '') <> '' \
                        AND strpos($1, lower(neighborhood)) > 0 THEN 4 ELSE 0 END \
                  + CASE WHEN property_type = ANY($2) THEN 2 ELSE 0 END \
                  + CASE WHEN title ILIKE ANY($3) THEN 1 ELSE 0 END) AS score \
               FROM properties \
               WHERE status = 'ACTIVE' \
                 AND ($4::text IS NULL OR listing_type = $4 OR listing_type = 'SALE_AND_RENT') \
             ) ranked \
             WHERE score > 0 \
             ORDER BY score DESC, updated_at DESC \
             LIMIT $5",
        )
        .bind(&query.text)
        .bind(&query.property_types)
        .bind(query.title_patterns())
        .bind(query.listing.map(ListingType::as_str))
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(parse_candidate_row).collect()
    }
}
