#![allow(dead_code)]
//! The sample database and the saved cards built on it

use filter_mapping::expressions::Expression;
use filter_mapping::{
    Aggregation, Card, CardId, FieldRef, Field, Join, MappingMetadata, Query, SemanticType, Source,
    StageDefinition, Table, TemporalUnit,
};
use once_cell::sync::Lazy;

pub const BASE_ORDERS_QUESTION: CardId = 1;
pub const BASE_ORDERS_MODEL: CardId = 2;
/// The same two-stage query on top of each base card, saved as a question and as a model
pub const Q8_QUESTION_BASED_QUESTION: CardId = 3;
pub const Q8_QUESTION_BASED_MODEL: CardId = 4;
pub const Q8_MODEL_BASED_QUESTION: CardId = 5;
pub const Q8_MODEL_BASED_MODEL: CardId = 6;
/// Explicit join in the first stage, quarterly count in the second
pub const ORDERS_BY_QUARTER: CardId = 7;
/// `Net` custom column in the first stage, monthly count in the second
pub const NET_ORDERS: CardId = 8;

pub static SAMPLE_METADATA: Lazy<MappingMetadata> = Lazy::new(sample_metadata);

pub fn sample_tables() -> Vec<Table> {
    vec![
        Table::new("orders", "Orders")
            .field(Field::new("ID", SemanticType::Identifier))
            .field(Field::foreign_key("User ID", "people"))
            .field(Field::foreign_key("Product ID", "products"))
            .field(Field::new("Subtotal", SemanticType::Number))
            .field(Field::new("Tax", SemanticType::Number))
            .field(Field::new("Total", SemanticType::Number))
            .field(Field::new("Discount", SemanticType::Number))
            .field(Field::new("Created At", SemanticType::Date))
            .field(Field::new("Quantity", SemanticType::Number)),
        Table::new("products", "Products")
            .field(Field::new("ID", SemanticType::Identifier))
            .field(Field::new("Ean", SemanticType::Text))
            .field(Field::new("Title", SemanticType::Text))
            .field(Field::new("Category", SemanticType::Category))
            .field(Field::new("Vendor", SemanticType::Text))
            .field(Field::new("Price", SemanticType::Number))
            .field(Field::new("Rating", SemanticType::Number))
            .field(Field::new("Created At", SemanticType::Date)),
        Table::new("people", "People")
            .field(Field::new("ID", SemanticType::Identifier))
            .field(Field::new("Address", SemanticType::Location))
            .field(Field::new("Email", SemanticType::Text))
            .field(Field::new("Password", SemanticType::Text).hidden())
            .field(Field::new("Name", SemanticType::Text))
            .field(Field::new("City", SemanticType::Location))
            .field(Field::new("State", SemanticType::Location))
            .field(Field::new("Source", SemanticType::Category))
            .field(Field::new("Birth Date", SemanticType::Date))
            .field(Field::new("Zip", SemanticType::Location))
            .field(Field::new("Created At", SemanticType::Date)),
        Table::new("reviews", "Reviews")
            .field(Field::new("ID", SemanticType::Identifier))
            .field(Field::foreign_key("Product ID", "products"))
            .field(Field::new("Reviewer", SemanticType::Text))
            .field(Field::new("Rating", SemanticType::Number))
            .field(Field::new("Body", SemanticType::Text))
            .field(Field::new("Created At", SemanticType::Date)),
    ]
}

fn net() -> Expression {
    Expression::field(FieldRef::stage("Total")).sub(Expression::field(FieldRef::stage("Tax")))
}

fn base_orders_query() -> Query {
    Query::new(Source::table("orders")).stage(StageDefinition::new().expression("Net", net()))
}

/// Two stages on top of a base card: reviews and products joined and
/// summarized, then summarized again by category
pub fn q8_query(base: CardId) -> Query {
    Query::new(Source::card(base))
        .stage(
            StageDefinition::new()
                .join(
                    Join::new("Reviews", Source::table("reviews"))
                        .on(FieldRef::stage("Product ID"), FieldRef::stage("Product ID")),
                )
                .join(
                    Join::new("Product", Source::table("products"))
                        .on(FieldRef::stage("Product ID"), FieldRef::stage("ID")),
                )
                .aggregate(Aggregation::Count)
                .aggregate(Aggregation::Sum {
                    field: FieldRef::stage("Total"),
                })
                .aggregate(Aggregation::Named {
                    name: "5 * Count".to_string(),
                    expression: Expression::number(5.0).mul(Expression::aggregate(Aggregation::Count)),
                })
                .breakout(FieldRef::stage("Created At").with_unit(TemporalUnit::Quarter))
                .breakout(FieldRef::joined("Product", "Category")),
        )
        .stage(
            StageDefinition::new()
                .aggregate(Aggregation::Sum {
                    field: FieldRef::stage("Count"),
                })
                .breakout(FieldRef::stage("Product → Category")),
        )
}

pub fn orders_by_quarter_query() -> Query {
    Query::new(Source::table("orders"))
        .stage(
            StageDefinition::new().join(
                Join::new("Product", Source::table("products"))
                    .on(FieldRef::stage("Product ID"), FieldRef::stage("ID")),
            ),
        )
        .stage(
            StageDefinition::new()
                .aggregate(Aggregation::Count)
                .breakout(FieldRef::stage("Created At").with_unit(TemporalUnit::Quarter)),
        )
}

pub fn net_orders_query() -> Query {
    Query::new(Source::table("orders"))
        .stage(StageDefinition::new().expression("Net", net()))
        .stage(
            StageDefinition::new()
                .aggregate(Aggregation::Count)
                .breakout(FieldRef::stage("Created At").with_unit(TemporalUnit::Month)),
        )
}

pub fn sample_cards() -> Vec<Card> {
    vec![
        Card::question(BASE_ORDERS_QUESTION, "Base Orders Question", base_orders_query()),
        Card::model(BASE_ORDERS_MODEL, "Base Orders Model", base_orders_query()),
        Card::question(Q8_QUESTION_BASED_QUESTION, "Q8 - question-based question", q8_query(BASE_ORDERS_QUESTION)),
        Card::model(Q8_QUESTION_BASED_MODEL, "Q8 - question-based model", q8_query(BASE_ORDERS_QUESTION)),
        Card::question(Q8_MODEL_BASED_QUESTION, "Q8 - model-based question", q8_query(BASE_ORDERS_MODEL)),
        Card::model(Q8_MODEL_BASED_MODEL, "Q8 - model-based model", q8_query(BASE_ORDERS_MODEL)),
        Card::question(ORDERS_BY_QUARTER, "Orders by quarter", orders_by_quarter_query()),
        Card::question(NET_ORDERS, "Net orders", net_orders_query()),
    ]
}

pub fn sample_metadata() -> MappingMetadata {
    let mut metadata = MappingMetadata::new();
    for table in sample_tables() {
        metadata.add_table(table).expect("sample tables are valid");
    }
    for card in sample_cards() {
        metadata.add_card(card);
    }
    metadata
}
