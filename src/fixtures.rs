//! Shared schema used by unit tests across modules

use crate::core::schema::{AccessFlags, EntityType, FieldType, SchemaRegistry};

/// users -> orders -> items -> product -> category, plus a composite-key
/// entity and one that is not browsable
pub fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new()
        .with_entity(EntityType::new("User")
            .with_field("id", FieldType::Int64)
            .with_field("name", FieldType::String)
            .with_field("email", FieldType::String)
            .with_field("age", FieldType::Int32)
            .with_nullable_field("secret", FieldType::String)
            .with_field("active", FieldType::Boolean)
            .with_nullable_field("nickname", FieldType::String)
            .with_key(["id"])
            .with_unique("email")
            .with_unique("nickname")
            .with_lookup("email")
            .with_hidden(["secret"])
            .with_searchable(["name"])
            .with_access(AccessFlags { browsable: true, expandable: true, modifiable: true }))
        .unwrap()
        .with_entity(EntityType::new("Order")
            .with_field("id", FieldType::Int64)
            .with_field("user_id", FieldType::Int64)
            .with_field("total", FieldType::Float)
            .with_field("status", FieldType::String)
            .with_nullable_field("placed", FieldType::Date)
            .with_key(["id"])
            .with_access(AccessFlags { browsable: true, expandable: true, modifiable: true }))
        .unwrap()
        .with_entity(EntityType::new("Item")
            .with_field("id", FieldType::Int64)
            .with_field("order_id", FieldType::Int64)
            .with_field("product_id", FieldType::Int64)
            .with_field("quantity", FieldType::Int32)
            .with_key(["id"]))
        .unwrap()
        .with_entity(EntityType::new("Product")
            .with_field("id", FieldType::Int64)
            .with_field("sku", FieldType::String)
            .with_field("price", FieldType::Float)
            .with_field("category_id", FieldType::Int64)
            .with_key(["id"])
            .with_access(AccessFlags { browsable: false, expandable: true, modifiable: false }))
        .unwrap()
        .with_entity(EntityType::new("Category")
            .with_set("categories")
            .with_field("id", FieldType::Int64)
            .with_field("label", FieldType::String)
            .with_key(["id"]))
        .unwrap()
        .with_entity(EntityType::new("Membership")
            .with_field("user_id", FieldType::Int64)
            .with_field("group_code", FieldType::String)
            .with_field("role", FieldType::String)
            .with_key(["user_id", "group_code"]))
        .unwrap()
        .with_entity(EntityType::new("AuditLog")
            .with_set("audit_logs")
            .with_field("id", FieldType::Int64)
            .with_field("message", FieldType::String)
            .with_key(["id"])
            .with_access(AccessFlags { browsable: false, expandable: false, modifiable: false }))
        .unwrap();

    registry.foreign_key("Order", "user", "user_id", "User", Some("orders")).unwrap();
    registry.foreign_key("Item", "order", "order_id", "Order", Some("items")).unwrap();
    registry.foreign_key("Item", "product", "product_id", "Product", None).unwrap();
    registry.foreign_key("Product", "category", "category_id", "Category", Some("products")).unwrap();
    registry.foreign_key("Membership", "user", "user_id", "User", Some("memberships")).unwrap();
    registry.validate().unwrap();
    registry
}
