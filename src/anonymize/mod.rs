//! Deterministic anonymization of sensitive columns.
//!
//! This module provides:
//! - Column-name pattern tables mapping to fake-data methods
//! - Security patterns whose columns are nulled instead of faked
//! - A value rewriter whose output depends only on (run seed, method,
//!   raw value), so equal source values stay equal across tables
//!
//! Foreign-key member columns always pass through unchanged; rewriting
//! them would break referential integrity no matter what the tags say.

use crate::db::SqlValue;
use crate::schema::{ColumnId, Schema, SensitivityTag, TableId};
use ahash::{AHashMap, AHashSet};
use fake::faker::address::en::{CityName, StateName, StreetName, ZipCode};
use fake::faker::company::en::CompanyName;
use fake::faker::internet::en::{SafeEmail, Username};
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::faker::phone_number::en::PhoneNumber;
use fake::Fake;
use once_cell::sync::Lazy;
use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Anonymization settings, matching the `anonymize` config section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymizeConfig {
    pub enabled: bool,
    /// Run seed; a fresh random seed is drawn when absent, which breaks
    /// cross-run determinism but keeps within-run equality
    pub seed: Option<String>,
    /// Explicit `table.column -> method` overrides
    pub fields: AHashMap<String, String>,
    /// Extra column-name patterns to NULL out, on top of the defaults
    pub null_fields: Vec<String>,
}

/// Default column-name patterns mapped to fake methods. First match wins;
/// matching is case-insensitive over the bare column name.
static FAKE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    let table: &[(&str, &str)] = &[
        (r"^email$|email_|_email", "email"),
        (r"phone|mobile|fax", "phone_number"),
        (r"^ssn$|social_security|national_id", "ssn"),
        (r"first_name|firstname|given_name", "first_name"),
        (r"last_name|lastname|surname|family_name", "last_name"),
        (r"^name$|full_name|fullname|display_name", "name"),
        (r"user_name|username", "user_name"),
        (r"street|address", "street_address"),
        (r"^city$|_city", "city"),
        (r"zip|postal", "zipcode"),
        (r"company|organization|employer", "company"),
        (r"^url$|website|homepage", "url"),
        (r"^ip$|ip_address", "ipv4"),
        (r"^dob$|birth_?date|date_of_birth", "date_of_birth"),
        (r"credit_card|card_number", "credit_card_number"),
        (r"iban", "iban"),
    ];
    table
        .iter()
        .map(|(pat, method)| {
            (
                Regex::new(&format!("(?i){}", pat)).expect("static pattern"),
                *method,
            )
        })
        .collect()
});

/// Authentication/token/secret column patterns; matched columns emit NULL.
static NULL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"password|passwd|^pwd$",
        r"secret",
        r"token",
        r"api_?key",
        r"private_?key|public_?key|encryption_key",
        r"session_id",
        r"^salt$|_salt",
        r"^hash$|_hash",
        r"^nonce$",
        r"signature",
        r"certificate",
    ]
    .iter()
    .map(|pat| Regex::new(&format!("(?i){}", pat)).expect("static pattern"))
    .collect()
});

/// Fake method for a column name, from the default pattern table.
pub fn default_method_for(column: &str) -> Option<&'static str> {
    FAKE_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(column))
        .map(|(_, method)| *method)
}

fn matches_null_pattern(column: &str, extra: &[Regex]) -> bool {
    NULL_PATTERNS.iter().chain(extra.iter()).any(|re| re.is_match(column))
}

/// Annotate schema columns with sensitivity tags from the default pattern
/// tables combined with user overrides. Explicit `fields` beat defaults;
/// NULL patterns beat both.
pub fn tag_schema(schema: &mut Schema, config: &AnonymizeConfig) {
    let extra_null: Vec<Regex> = config
        .null_fields
        .iter()
        .filter_map(|pat| Regex::new(&format!("(?i){}", pat)).ok())
        .collect();

    let mut tagged = 0usize;
    for table_id in 0..schema.len() as u32 {
        let table_name = schema.table(TableId(table_id)).name.clone();
        let table = schema.table_mut(TableId(table_id));
        for column in &mut table.columns {
            let qualified = format!("{}.{}", table_name, column.name);
            column.sensitivity = if matches_null_pattern(&column.name, &extra_null) {
                SensitivityTag::NullOut
            } else if let Some(method) = config.fields.get(&qualified) {
                SensitivityTag::Fake(method.clone())
            } else if let Some(method) = default_method_for(&column.name) {
                SensitivityTag::Fake(method.to_string())
            } else {
                SensitivityTag::None
            };
            if column.sensitivity != SensitivityTag::None {
                tagged += 1;
            }
        }
    }
    debug!(columns = tagged, "sensitivity tags applied");
}

/// Draw a random run seed when the configuration supplies none.
pub fn random_seed() -> String {
    let mut rng = rand::rng();
    (0..24).map(|_| rng.sample(Alphanumeric) as char).collect()
}

/// Stateless deterministic value rewriter.
pub struct Anonymizer {
    seed: String,
    /// Per table: columns participating in any FK edge (never rewritten)
    fk_columns: AHashMap<TableId, AHashSet<ColumnId>>,
    cache: AHashMap<(String, String), SqlValue>,
}

impl Anonymizer {
    pub fn new(schema: &Schema, seed: String) -> Self {
        let fk_columns = schema
            .tables()
            .map(|t| (t.id, schema.fk_member_columns(t.id)))
            .collect();
        Self {
            seed,
            fk_columns,
            cache: AHashMap::new(),
        }
    }

    /// Rewrite one value according to its column's sensitivity tag.
    pub fn anonymize(
        &mut self,
        schema: &Schema,
        table: TableId,
        column: ColumnId,
        value: &SqlValue,
    ) -> SqlValue {
        // FK members pass through regardless of tags.
        if self
            .fk_columns
            .get(&table)
            .map(|cols| cols.contains(&column))
            .unwrap_or(false)
        {
            return value.clone();
        }

        let tag = schema
            .table(table)
            .column(column)
            .map(|c| c.sensitivity.clone())
            .unwrap_or_default();

        match tag {
            SensitivityTag::None => value.clone(),
            SensitivityTag::NullOut => SqlValue::Null,
            SensitivityTag::Fake(method) => {
                if value.is_null() {
                    return SqlValue::Null;
                }
                let cache_key = (method.clone(), value.repr());
                if let Some(hit) = self.cache.get(&cache_key) {
                    return hit.clone();
                }
                let faked = SqlValue::Text(self.generate(&method, &cache_key.1));
                self.cache.insert(cache_key, faked.clone());
                faked
            }
        }
    }

    /// Keyed-hash RNG seed: output depends only on (run seed, method, raw
    /// value). The column name is deliberately absent so equal values in
    /// columns sharing a method stay equal across tables.
    fn rng_for(&self, method: &str, raw: &str) -> StdRng {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.as_bytes());
        hasher.update(b":");
        hasher.update(method.as_bytes());
        hasher.update(b":");
        hasher.update(raw.as_bytes());
        let digest = hasher.finalize();
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        StdRng::from_seed(seed)
    }

    fn generate(&self, method: &str, raw: &str) -> String {
        let mut rng = self.rng_for(method, raw);

        match method {
            "email" | "safe_email" => SafeEmail().fake_with_rng(&mut rng),
            "name" | "full_name" => Name().fake_with_rng(&mut rng),
            "first_name" => FirstName().fake_with_rng(&mut rng),
            "last_name" => LastName().fake_with_rng(&mut rng),
            "user_name" | "username" => Username().fake_with_rng(&mut rng),
            "phone_number" | "phone" => PhoneNumber().fake_with_rng(&mut rng),
            "street_address" | "address" => {
                let street: String = StreetName().fake_with_rng(&mut rng);
                let city: String = CityName().fake_with_rng(&mut rng);
                let state: String = StateName().fake_with_rng(&mut rng);
                let zip: String = ZipCode().fake_with_rng(&mut rng);
                format!("{} {}, {}, {} {}", rng.random_range(1..9999), street, city, state, zip)
            }
            "city" => CityName().fake_with_rng(&mut rng),
            "zipcode" | "zip" | "postal_code" => ZipCode().fake_with_rng(&mut rng),
            "company" | "company_name" => CompanyName().fake_with_rng(&mut rng),
            "url" => {
                let host: String = (0..8).map(|_| rng.sample(Alphanumeric) as char).collect();
                format!("https://{}.example.com/", host.to_lowercase())
            }
            "ipv4" => format!(
                "{}.{}.{}.{}",
                rng.random_range(1..255),
                rng.random_range(0..255),
                rng.random_range(0..255),
                rng.random_range(1..255)
            ),
            "ssn" => format!(
                "{:03}-{:02}-{:04}",
                rng.random_range(100..900),
                rng.random_range(10..99),
                rng.random_range(1000..9999)
            ),
            "date_of_birth" => format!(
                "{:04}-{:02}-{:02}",
                rng.random_range(1950..2005),
                rng.random_range(1..=12),
                rng.random_range(1..=28)
            ),
            "credit_card_number" => format!(
                "{:04}-{:04}-{:04}-{:04}",
                rng.random_range(1000..9999),
                rng.random_range(1000..9999),
                rng.random_range(1000..9999),
                rng.random_range(1000..9999)
            ),
            "iban" => format!(
                "DE{:02}{:04}{:04}{:04}{:04}{:02}",
                rng.random_range(10..99),
                rng.random_range(1000..9999),
                rng.random_range(1000..9999),
                rng.random_range(1000..9999),
                rng.random_range(1000..9999),
                rng.random_range(10..99)
            ),
            // Unknown method: opaque deterministic token
            _ => {
                let mut bytes = [0u8; 8];
                rng.fill(&mut bytes);
                hex::encode(bytes)
            }
        }
    }
}
