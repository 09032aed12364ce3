//! Validator behaviour against a small shop schema

use lens_ir::{
    EntityType, FieldSpec, FilterOperator, JoinKind, Literal, OrderTarget, RelationSpec, ScalarKind,
    SchemaGraph, SortDirection,
};
use lens_registry::Registry;
use lens_validate::{LimitPolicy, Validator, ValidatorOptions, Violation};
use serde_json::json;

fn shop_schema(order_date: ScalarKind) -> SchemaGraph {
    SchemaGraph::new(vec![
        EntityType::new("Order")
            .in_namespace("shop")
            .with_table("orders")
            .field(FieldSpec::new("id", ScalarKind::Integer))
            .field(FieldSpec::new("orderDate", order_date))
            .field(FieldSpec::new("status", ScalarKind::Choice).with_choices(["open", "paid", "cancelled"]))
            .field(FieldSpec::new("total", ScalarKind::Decimal))
            .relation(RelationSpec::one("customer", "Customer", "customer_id", "id"))
            .relation(RelationSpec::many("items", "OrderItem", "id", "order_id")),
        EntityType::new("Customer")
            .in_namespace("shop")
            .with_table("customers")
            .field(FieldSpec::new("id", ScalarKind::Integer))
            .field(FieldSpec::new("name", ScalarKind::Text))
            .field(FieldSpec::new("country", ScalarKind::Text))
            .relation(RelationSpec::many("orders", "Order", "id", "customer_id")),
        EntityType::new("OrderItem")
            .in_namespace("shop")
            .with_table("order_items")
            .field(FieldSpec::new("id", ScalarKind::Integer))
            .field(FieldSpec::new("quantity", ScalarKind::Integer))
            .field(FieldSpec::new("unit_price", ScalarKind::Decimal))
            .relation(RelationSpec::one("product", "Product", "product_id", "id")),
        EntityType::new("Product")
            .in_namespace("catalog")
            .with_table("products")
            .field(FieldSpec::new("id", ScalarKind::Integer))
            .field(FieldSpec::new("name", ScalarKind::Text))
            .field(FieldSpec::new("category", ScalarKind::Text)),
    ])
    .unwrap()
}

fn options() -> ValidatorOptions {
    ValidatorOptions::default()
}

#[test]
fn test_revenue_by_country() {
    let schema = shop_schema(ScalarKind::Date);
    let registry = Registry::default();
    let validator = Validator::new(&schema, &registry, options());

    let spec = validator
        .validate(&json!({
            "rootEntity": "Order",
            "fields": [{"path": "customer.country", "alias": "country"}],
            "filters": [{"path": "status", "operator": "equals", "value": "paid"}],
            "aggregations": [{"function": "sum", "path": "total", "alias": "revenue"}],
            "groupBy": ["customer__country"],
            "orderBy": [{"key": "revenue", "direction": "desc"}],
            "limit": 10,
            "chartType": "bar",
            "labelField": "country"
        }))
        .unwrap();

    assert_eq!(spec.root_entity, "Order");
    assert_eq!(spec.root_table, "orders");
    assert_eq!(spec.schema_version, schema.fingerprint());
    assert_eq!(spec.output_names(), vec!["country", "revenue"]);
    assert_eq!(spec.group_by[0].path.to_string(), "customer.country");
    assert_eq!(spec.filters[0].value, Literal::Text("paid".into()));
    assert_eq!(spec.order_by[0].target, OrderTarget::Alias("revenue".into()));
    assert_eq!(spec.order_by[0].direction, SortDirection::Desc);
    assert_eq!(spec.limit, Some(10));
    assert_eq!(spec.chart.unwrap().label_field.as_deref(), Some("country"));
}

#[test]
fn test_unresolved_paths() {
    let schema = shop_schema(ScalarKind::Date);
    let registry = Registry::default();
    let validator = Validator::new(&schema, &registry, options());

    let cases = [
        json!({"rootEntity": "Invoice", "fields": ["id"]}),
        json!({"rootEntity": "Order", "fields": ["customer.email"]}),
        json!({"rootEntity": "Order", "fields": ["customer"]}),
        json!({"rootEntity": "Order", "fields": ["total.amount"]}),
        json!({"rootEntity": "Order", "fields": ["id"], "filters": [{"path": "shipping.city", "operator": "equals", "value": "Oslo"}]}),
        json!({"rootEntity": "Order", "aggregations": [{"function": "count", "path": "refunds.id", "alias": "n"}]}),
        json!({"rootEntity": "Order", "fields": ["id"], "groupBy": ["region"]}),
        json!({"rootEntity": "Order", "fields": ["id"], "orderBy": ["priority"]}),
    ];
    for case in cases {
        let err = validator.validate(&case).unwrap_err();
        assert_eq!(err.violation, Violation::UnresolvedPath, "{}: {}", case, err);
    }
}

#[test]
fn test_validation_is_idempotent() {
    let schema = shop_schema(ScalarKind::Date);
    let registry = Registry::default();
    let validator = Validator::new(&schema, &registry, options());

    let good = json!({
        "rootEntity": "Order",
        "aggregations": [{"function": "count", "path": "id", "alias": "orders"}],
        "filters": [{"path": "orderDate", "operator": "range", "value": ["2024-01-01", "2024-03-31"]}]
    });
    assert_eq!(validator.validate(&good), validator.validate(&good));

    let bad = json!({"rootEntity": "Order", "fields": ["nope"]});
    assert_eq!(validator.validate(&bad), validator.validate(&bad));
}

#[test]
fn test_literal_coercion_by_field_kind() {
    let registry = Registry::default();
    let filter = |value: &str| {
        json!({
            "rootEntity": "Order",
            "fields": ["id"],
            "filters": [{"path": "orderDate", "operator": "greater-than", "value": value}]
        })
    };

    let date_schema = shop_schema(ScalarKind::Date);
    let spec = Validator::new(&date_schema, &registry, options())
        .validate(&filter("2024-01-01"))
        .unwrap();
    assert_eq!(spec.filters[0].operator, FilterOperator::GreaterThan);
    assert_eq!(spec.filters[0].value.to_string(), "2024-01-01");

    let text_schema = shop_schema(ScalarKind::Text);
    let err = Validator::new(&text_schema, &registry, options())
        .validate(&filter("last quarter"))
        .unwrap_err();
    assert_eq!(err.violation, Violation::InvalidLiteral);
    assert_eq!(err.location, "filters[0].value");
}

#[test]
fn test_limit_clamped_or_rejected() {
    let schema = shop_schema(ScalarKind::Date);
    let registry = Registry::default();
    let candidate = json!({"rootEntity": "Order", "fields": ["id"], "limit": 100000});

    let spec = Validator::new(&schema, &registry, options())
        .validate(&candidate)
        .unwrap();
    assert_eq!(spec.limit, Some(1000));

    let zero = json!({"rootEntity": "Order", "fields": ["id"], "limit": 0});
    let spec = Validator::new(&schema, &registry, options()).validate(&zero).unwrap();
    assert_eq!(spec.limit, Some(1));

    let strict = ValidatorOptions {
        max_limit: 1000,
        limit_policy: LimitPolicy::Reject,
    };
    let err = Validator::new(&schema, &registry, strict)
        .validate(&candidate)
        .unwrap_err();
    assert_eq!(err.violation, Violation::LimitExceeded);
}

#[test]
fn test_operator_and_function_allowlist() {
    let schema = shop_schema(ScalarKind::Date);
    let registry = Registry::default();
    let validator = Validator::new(&schema, &registry, options());

    let err = validator
        .validate(&json!({"rootEntity": "Order", "fields": ["id"],
            "filters": [{"path": "status", "operator": "regex", "value": ".*"}]}))
        .unwrap_err();
    assert_eq!(err.violation, Violation::DisallowedOperator);

    let err = validator
        .validate(&json!({"rootEntity": "Order", "fields": ["id"],
            "filters": [{"path": "total", "operator": "contains", "value": "1"}]}))
        .unwrap_err();
    assert_eq!(err.violation, Violation::DisallowedOperator);

    let err = validator
        .validate(&json!({"rootEntity": "Order",
            "aggregations": [{"function": "median", "path": "total", "alias": "m"}]}))
        .unwrap_err();
    assert_eq!(err.violation, Violation::DisallowedFunction);

    let err = validator
        .validate(&json!({"rootEntity": "Order",
            "aggregations": [{"function": "sum", "path": "status", "alias": "s"}]}))
        .unwrap_err();
    assert_eq!(err.violation, Violation::DisallowedFunction);
}

#[test]
fn test_fanout_needs_aggregate_or_join() {
    let schema = shop_schema(ScalarKind::Date);
    let registry = Registry::default();
    let validator = Validator::new(&schema, &registry, options());

    let err = validator
        .validate(&json!({"rootEntity": "Order", "fields": ["id", "items.quantity"]}))
        .unwrap_err();
    assert_eq!(err.violation, Violation::AmbiguousFanout);
    assert_eq!(err.path.as_deref(), Some("items.quantity"));

    let spec = validator
        .validate(&json!({"rootEntity": "Order",
            "joins": [{"path": "items", "kind": "left"}],
            "fields": ["id", "items.quantity"]}))
        .unwrap();
    assert_eq!(spec.joins[0].kind, JoinKind::Left);

    let spec = validator
        .validate(&json!({"rootEntity": "Customer",
            "fields": ["country"],
            "groupBy": ["country"],
            "aggregations": [{"function": "sum", "path": "orders.items.quantity", "alias": "units"}]}))
        .unwrap();
    assert_eq!(spec.aggregations[0].path.hops.len(), 2);
}

#[test]
fn test_alias_collision_and_malformed() {
    let schema = shop_schema(ScalarKind::Date);
    let registry = Registry::default();
    let validator = Validator::new(&schema, &registry, options());

    let err = validator
        .validate(&json!({"rootEntity": "Order",
            "fields": [{"path": "customer.country", "alias": "total"}],
            "groupBy": ["customer.country"],
            "aggregations": [{"function": "sum", "path": "total", "alias": "total"}]}))
        .unwrap_err();
    assert_eq!(err.violation, Violation::AliasCollision);

    for bad in [
        json!(["not", "an", "object"]),
        json!({"fields": ["id"]}),
        json!({"rootEntity": "Order", "fields": "id"}),
        json!({"rootEntity": "Order", "fields": ["id"], "having": []}),
        json!({"rootEntity": "Order", "fields": ["id; drop table orders"]}),
        json!({"rootEntity": "Order", "fields": ["id"], "chartType": "sankey"}),
    ] {
        let err = validator.validate(&bad).unwrap_err();
        assert_eq!(err.violation, Violation::MalformedSpecification, "{}", bad);
    }
}

#[test]
fn test_empty_fields_select_root_scalars() {
    let schema = shop_schema(ScalarKind::Date);
    let registry = Registry::default();
    let validator = Validator::new(&schema, &registry, options());

    let spec = validator
        .validate_str(r#"{"model": "Customer", "select_fields": [], "order_by": ["-name"]}"#)
        .unwrap();
    assert_eq!(spec.output_names(), vec!["id", "name", "country"]);
    assert_eq!(spec.order_by[0].direction, SortDirection::Desc);
    assert!(spec.chart.is_none());
}

#[test]
fn test_first_violation_in_section_order() {
    let schema = shop_schema(ScalarKind::Date);
    let registry = Registry::default();
    let validator = Validator::new(&schema, &registry, options());

    // Both the filter and the aggregation are wrong; filters are scanned first
    let err = validator
        .validate(&json!({"rootEntity": "Order", "fields": ["id"],
            "filters": [{"path": "total", "operator": "greater-than", "value": "lots"}],
            "aggregations": [{"function": "median", "path": "total", "alias": "m"}]}))
        .unwrap_err();
    assert_eq!(err.violation, Violation::InvalidLiteral);
}
