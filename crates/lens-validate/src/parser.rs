//! Pest-based parser for field paths and output aliases

use lens_ir::FieldPath;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "path.pest"]
pub struct PathParser;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Pest error: {0}")]
    Pest(#[from] pest::error::Error<Rule>),
}

/// Parse `a.b.c` or `a__b__c` into a `FieldPath`
pub fn parse_path(source: &str) -> Result<FieldPath, ParseError> {
    let mut pairs = PathParser::parse(Rule::path, source.trim())?;
    let path_pair = pairs
        .next()
        .ok_or_else(|| ParseError::Syntax("Empty path".to_string()))?;

    let segments = path_pair
        .into_inner()
        .filter(|pair| pair.as_rule() == Rule::segment)
        .map(|pair| pair.as_str().to_string())
        .collect();

    Ok(FieldPath::new(segments))
}

/// Check that an alias is a plain identifier (letters, digits, underscores)
pub fn check_alias(source: &str) -> Result<(), ParseError> {
    PathParser::parse(Rule::alias, source)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_and_django_separators() {
        let dotted = parse_path("items.product.category").unwrap();
        let django = parse_path("items__product__category").unwrap();
        assert_eq!(dotted, django);
        assert_eq!(dotted.segments(), &["items", "product", "category"]);
    }

    #[test]
    fn test_underscores_inside_segments() {
        let path = parse_path("orderitem_set__unit_price").unwrap();
        assert_eq!(path.segments(), &["orderitem_set", "unit_price"]);
    }

    #[test]
    fn test_rejects_bad_paths() {
        for bad in ["", "customer.", ".country", "_private", "a___b", "a.b c", "a;drop", "1abc"] {
            assert!(parse_path(bad).is_err(), "expected '{}' to be rejected", bad);
        }
    }

    #[test]
    fn test_alias_syntax() {
        assert!(check_alias("total_revenue").is_ok());
        assert!(check_alias("_x1").is_ok());
        assert!(check_alias("total revenue").is_err());
        assert!(check_alias("a\"b").is_err());
        assert!(check_alias("").is_err());
    }
}
