use serde_json::Map;
use serde_json::Value;

use crate::domain::resource::errors::ResourceError;

/// Capability declaration of one resource kind.
///
/// The generic service and handlers are written once against this trait;
/// each kind states its names, ownership and body rules.
pub trait ResourceKind: Send + Sync + 'static {
    /// Plural name: route segment, table name and list payload key
    const COLLECTION: &'static str;

    /// Singular name: single-record payload key and error wording
    const SINGULAR: &'static str;

    /// Records belong to a user
    const OWNED: bool;

    /// Records carry a unique slug derived from their title
    const SLUGGED: bool = false;

    /// Sort applied to listings that request none
    const DEFAULT_SORT: Option<&'static str> = Some("-createdAt");

    /// Fill defaults into a body before validation.
    fn prepare(_fields: &mut Map<String, Value>) {}

    /// Check a complete body.
    ///
    /// # Errors
    /// * `Validation` - A required field is missing or has the wrong type
    fn validate(fields: &Map<String, Value>) -> Result<(), ResourceError>;
}

/// Catalog product.
pub struct Product;

impl ResourceKind for Product {
    const COLLECTION: &'static str = "products";
    const SINGULAR: &'static str = "product";
    const OWNED: bool = false;
    const SLUGGED: bool = true;

    fn validate(fields: &Map<String, Value>) -> Result<(), ResourceError> {
        let title = required_str::<Self>(fields, "title")?;
        if title.trim().is_empty() {
            return Err(ResourceError::validation(
                Self::SINGULAR,
                "A product must have a title",
            ));
        }
        non_negative_number::<Self>(fields, "price", true)?;
        optional_string_array::<Self>(fields, "categories")?;
        Ok(())
    }
}

/// Shopping cart: a user's pending line items.
pub struct Cart;

impl ResourceKind for Cart {
    const COLLECTION: &'static str = "carts";
    const SINGULAR: &'static str = "cart";
    const OWNED: bool = true;

    fn prepare(fields: &mut Map<String, Value>) {
        default_line_items(fields);
    }

    fn validate(fields: &Map<String, Value>) -> Result<(), ResourceError> {
        line_items::<Self>(fields)
    }
}

/// Placed order.
pub struct Order;

impl ResourceKind for Order {
    const COLLECTION: &'static str = "orders";
    const SINGULAR: &'static str = "order";
    const OWNED: bool = true;

    fn prepare(fields: &mut Map<String, Value>) {
        default_line_items(fields);
        fields
            .entry("status")
            .or_insert_with(|| Value::String("pending".to_string()));
    }

    fn validate(fields: &Map<String, Value>) -> Result<(), ResourceError> {
        line_items::<Self>(fields)?;
        non_negative_number::<Self>(fields, "amount", true)?;
        match fields.get("status") {
            Some(Value::String(status)) if !status.is_empty() => Ok(()),
            _ => Err(ResourceError::validation(
                Self::SINGULAR,
                "status must be a non-empty string",
            )),
        }
    }
}

/// Lowercase, hyphen-separated form of a title.
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn required_str<'a, K: ResourceKind>(
    fields: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a str, ResourceError> {
    fields.get(name).and_then(Value::as_str).ok_or_else(|| {
        ResourceError::validation(K::SINGULAR, format!("{} must be a string", name))
    })
}

fn non_negative_number<K: ResourceKind>(
    fields: &Map<String, Value>,
    name: &str,
    required: bool,
) -> Result<(), ResourceError> {
    match fields.get(name) {
        None if !required => Ok(()),
        Some(value) if value.as_f64().is_some_and(|n| n >= 0.0) => Ok(()),
        _ => Err(ResourceError::validation(
            K::SINGULAR,
            format!("{} must be a non-negative number", name),
        )),
    }
}

fn optional_string_array<K: ResourceKind>(
    fields: &Map<String, Value>,
    name: &str,
) -> Result<(), ResourceError> {
    match fields.get(name) {
        None => Ok(()),
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => Ok(()),
        Some(_) => Err(ResourceError::validation(
            K::SINGULAR,
            format!("{} must be a list of strings", name),
        )),
    }
}

fn default_line_items(fields: &mut Map<String, Value>) {
    let items = fields
        .entry("products")
        .or_insert_with(|| Value::Array(Vec::new()));

    if let Value::Array(items) = items {
        for item in items.iter_mut() {
            if let Value::Object(line) = item {
                line.entry("quantity").or_insert_with(|| Value::from(1));
            }
        }
    }
}

fn line_items<K: ResourceKind>(fields: &Map<String, Value>) -> Result<(), ResourceError> {
    let Some(Value::Array(items)) = fields.get("products") else {
        return Err(ResourceError::validation(
            K::SINGULAR,
            "products must be a list",
        ));
    };

    for item in items {
        let valid = item.get("productId").is_some_and(Value::is_string)
            && item
                .get("quantity")
                .and_then(Value::as_u64)
                .is_some_and(|quantity| quantity >= 1);
        if !valid {
            return Err(ResourceError::validation(
                K::SINGULAR,
                "each product needs a productId and a quantity of at least 1",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(fields) => fields,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Trail Runner 2000"), "trail-runner-2000");
        assert_eq!(slugify("  Hello, World!  "), "hello-world");
    }

    #[test]
    fn test_product_validation() {
        assert!(Product::validate(&body(json!({"title": "Boot", "price": 10}))).is_ok());
        assert!(Product::validate(&body(json!({"title": "Boot"}))).is_err());
        assert!(Product::validate(&body(json!({"title": "", "price": 1}))).is_err());
        assert!(Product::validate(&body(json!({"title": "Boot", "price": -1}))).is_err());
        assert!(Product::validate(
            &body(json!({"title": "Boot", "price": 1, "categories": [1]}))
        )
        .is_err());
    }

    #[test]
    fn test_cart_defaults_quantity() {
        let mut fields = body(json!({"products": [{"productId": "p1"}]}));
        Cart::prepare(&mut fields);

        assert_eq!(fields["products"][0]["quantity"], 1);
        assert!(Cart::validate(&fields).is_ok());
    }

    #[test]
    fn test_order_defaults_and_validation() {
        let mut fields = body(json!({"amount": 25.5}));
        Order::prepare(&mut fields);

        assert_eq!(fields["status"], "pending");
        assert_eq!(fields["products"], json!([]));
        assert!(Order::validate(&fields).is_ok());

        let mut fields = body(json!({"products": [{"productId": "p1", "quantity": 0}], "amount": 1}));
        Order::prepare(&mut fields);
        assert!(Order::validate(&fields).is_err());
    }
}
