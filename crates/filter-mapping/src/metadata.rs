//! Metadata management for query stage extraction
//!
//! This module provides functionality for:
//! - Representing warehouse tables (fields, semantic types, foreign keys)
//! - Looking up saved cards that other cards are built on
//! - Loading both from a JSON snapshot

use crate::query::{Card, CardId};
use crate::types::SemanticType;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors that can occur during metadata operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetadataError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Card not found: {0}")]
    CardNotFound(CardId),

    #[error("Duplicate field {field} in table {table}")]
    DuplicateField { table: String, field: String },

    #[error("Invalid metadata: {0}")]
    InvalidStructure(String),
}

/// Result type for metadata operations
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Abstract trait for the metadata the extractor reads
pub trait Metadata {
    /// Get a table by name
    fn table(&self, name: &str) -> MetadataResult<&Table>;

    /// Get a saved card by id
    fn card(&self, id: CardId) -> MetadataResult<&Card>;

    /// Check if a table exists
    fn has_table(&self, name: &str) -> bool {
        self.table(name).is_ok()
    }

    /// Check if a card exists
    fn has_card(&self, id: CardId) -> bool {
        self.card(id).is_ok()
    }
}

fn default_visible() -> bool {
    true
}

/// A table field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Display name
    pub name: String,
    pub semantic_type: SemanticType,
    /// Table this field references, for foreign keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fk_target: Option<String>,
    /// Hidden fields are not exposed to queries
    #[serde(default = "default_visible")]
    pub visible: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            fk_target: None,
            visible: true,
        }
    }

    /// A foreign key field pointing at `table`
    pub fn foreign_key(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            semantic_type: SemanticType::Identifier,
            fk_target: Some(table.into()),
            visible: true,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// A warehouse table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub display_name: String,
    pub fields: Vec<Field>,
}

impl Table {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Fields exposed to queries, in table order
    pub fn visible_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.visible)
    }
}

/// Serialized form of a [`MappingMetadata`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub cards: Vec<Card>,
}

/// A mapping-based metadata implementation
#[derive(Debug, Clone, Default)]
pub struct MappingMetadata {
    tables: HashMap<String, Table>,
    cards: HashMap<CardId, Card>,
}

impl MappingMetadata {
    /// Create new empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Table names are looked up case-insensitively
    fn normalize_name(name: &str) -> String {
        name.trim().to_lowercase()
    }

    /// Add or replace a table
    pub fn add_table(&mut self, table: Table) -> MetadataResult<()> {
        if table.name.trim().is_empty() {
            return Err(MetadataError::InvalidStructure(
                "table name must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for field in &table.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(MetadataError::DuplicateField {
                    table: table.name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        self.tables.insert(Self::normalize_name(&table.name), table);
        Ok(())
    }

    /// Add or replace a saved card
    pub fn add_card(&mut self, card: Card) {
        self.cards.insert(card.id, card);
    }

    /// Builder-style [`Self::add_table`]
    pub fn with_table(mut self, table: Table) -> MetadataResult<Self> {
        self.add_table(table)?;
        Ok(self)
    }

    /// Builder-style [`Self::add_card`]
    pub fn with_card(mut self, card: Card) -> Self {
        self.add_card(card);
        self
    }

    /// Load tables and cards from a JSON snapshot
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let snapshot: MetadataSnapshot = serde_json::from_str(json)?;
        Self::from_snapshot(snapshot).map_err(Into::into)
    }

    pub fn from_snapshot(snapshot: MetadataSnapshot) -> MetadataResult<Self> {
        let mut metadata = Self::new();
        for table in snapshot.tables {
            metadata.add_table(table)?;
        }
        for card in snapshot.cards {
            metadata.add_card(card);
        }
        Ok(metadata)
    }

    pub fn to_snapshot(&self) -> MetadataSnapshot {
        let mut tables: Vec<Table> = self.tables.values().cloned().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        let mut cards: Vec<Card> = self.cards.values().cloned().collect();
        cards.sort_by_key(|c| c.id);
        MetadataSnapshot { tables, cards }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.cards.is_empty()
    }
}

impl Metadata for MappingMetadata {
    fn table(&self, name: &str) -> MetadataResult<&Table> {
        self.tables
            .get(&Self::normalize_name(name))
            .ok_or_else(|| MetadataError::TableNotFound(name.to_string()))
    }

    fn card(&self, id: CardId) -> MetadataResult<&Card> {
        self.cards.get(&id).ok_or(MetadataError::CardNotFound(id))
    }
}
