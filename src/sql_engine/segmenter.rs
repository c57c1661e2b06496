//! CTE segmentation without a full SQL grammar.
//!
//! A query is split into the outer query (the text after the WITH clause)
//! and one `CteDefinition` per `name AS (` boundary found in the WITH
//! clause. The scan is positional: `AS (` inside string literals or
//! comments is taken as a boundary too.

use regex::Regex;
use sqlparser::dialect::{dialect_from_str, Dialect, DuckDbDialect};
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use std::sync::LazyLock;

use super::extractors::DEFAULT_DIALECT;
use super::tables::CteDefinition;

static CTE_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bAS\b\s*\(").unwrap());

/// Result of splitting a query around its WITH clause
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segments {
    pub outer_query: String,
    pub ctes: Vec<CteDefinition>,
}

impl Segments {
    /// The whole query is the outer query and nothing was segmented
    pub fn unsegmented(query: &str) -> Self {
        Self {
            outer_query: query.to_string(),
            ctes: Vec::new(),
        }
    }

    pub fn has_ctes(&self) -> bool {
        !self.ctes.is_empty()
    }
}

pub trait Segmenter: Send + Sync {
    fn segment(&self, query: &str) -> Segments;
}

/// Keyword/position based segmenter
#[derive(Debug, Clone)]
pub struct CteSegmenter {
    dialect_name: String,
}

impl CteSegmenter {
    pub fn new(dialect_name: &str) -> Self {
        Self {
            dialect_name: dialect_name.to_string(),
        }
    }

    fn dialect(&self) -> Box<dyn Dialect> {
        dialect_from_str(&self.dialect_name).unwrap_or_else(|| Box::new(DuckDbDialect {}))
    }

    /// Split `query` into `(outer_query, with_region)`.
    ///
    /// A `WITH` or `SELECT` keyword at parenthesis depth 0 toggles whether
    /// tokens belong to the CTE definitions. The region ends at the first
    /// toggle back out.
    pub fn split_outer_query(&self, query: &str) -> (String, String) {
        let dialect = self.dialect();
        // keep literals as written so `'O''BRIEN'` survives the round trip
        let mut tokenizer = Tokenizer::new(dialect.as_ref(), query).with_unescape(false);
        let tokens = match tokenizer.tokenize() {
            Ok(tokens) => tokens,
            Err(err) => {
                log::debug!("Could not tokenize query, leaving it unsegmented: {}", err);
                return (query.to_string(), String::new());
            }
        };

        let mut outer = String::new();
        let mut region = String::new();
        let mut inside_ctes = false;
        let mut region_closed = false;
        let mut saw_with = false;
        let mut depth = 0usize;

        for token in &tokens {
            match token {
                Token::LParen => depth += 1,
                Token::RParen => depth = depth.saturating_sub(1),
                Token::Word(word) if depth == 0 => match word.keyword {
                    Keyword::WITH | Keyword::SELECT => {
                        if word.keyword == Keyword::WITH {
                            saw_with = true;
                        }
                        if inside_ctes {
                            region_closed = true;
                        }
                        inside_ctes = !inside_ctes;
                    }
                    _ => {}
                },
                _ => {}
            }

            if !inside_ctes {
                outer.push_str(&token_text(token));
            } else if !region_closed {
                region.push_str(&token_text(token));
            }
        }

        let outer = outer.trim();
        if outer.is_empty() || !saw_with {
            return (query.to_string(), String::new());
        }

        (outer.to_string(), region.trim_start().to_string())
    }

    /// Extract `(name, body)` pairs from a WITH region
    pub fn split_ctes(&self, region: &str) -> Vec<CteDefinition> {
        let boundaries: Vec<(usize, usize)> = CTE_BOUNDARY
            .find_iter(region)
            .map(|m| (m.start(), m.end()))
            .collect();

        let mut ctes = Vec::with_capacity(boundaries.len());

        for (i, &(start, body_start)) in boundaries.iter().enumerate() {
            let (_, name) = split_last_token(&region[..start]);

            let body = match boundaries.get(i + 1) {
                Some(&(next_start, _)) => {
                    // the next CTE's name sits between this body and its boundary
                    let (body, _) = split_last_token(&region[body_start..next_start]);
                    body
                }
                None => &region[body_start..],
            };

            if name.is_empty() {
                log::debug!("Skipping CTE boundary at offset {} with no name", start);
                continue;
            }

            ctes.push(CteDefinition::new(name, strip_body(body)));
        }

        ctes
    }
}

impl Default for CteSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_DIALECT)
    }
}

impl Segmenter for CteSegmenter {
    fn segment(&self, query: &str) -> Segments {
        let (outer_query, region) = self.split_outer_query(query);
        if region.is_empty() {
            return Segments::unsegmented(&outer_query);
        }

        Segments {
            outer_query,
            ctes: self.split_ctes(&region),
        }
    }
}

/// Token text with comments collapsed to a single space
fn token_text(token: &Token) -> String {
    match token {
        Token::Whitespace(Whitespace::SingleLineComment { .. })
        | Token::Whitespace(Whitespace::MultiLineComment(_)) => " ".to_string(),
        other => other.to_string(),
    }
}

/// Split off the last whitespace/comma delimited token: `"WITH A"` -> `("WITH ", "A")`
fn split_last_token(text: &str) -> (&str, &str) {
    let text = text.trim_end();
    match text.rfind(|c: char| c.is_whitespace() || c == ',') {
        Some(idx) => {
            let sep_len = text[idx..].chars().next().map_or(1, char::len_utf8);
            (&text[..idx + sep_len], &text[idx + sep_len..])
        }
        None => ("", text),
    }
}

/// Drop the separator comma and exactly one closing parenthesis
fn strip_body(body: &str) -> String {
    let body = body.trim_end();
    let body = body.strip_suffix(',').unwrap_or(body).trim_end();
    let body = body.strip_suffix(')').unwrap_or(body);
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn segment(query: &str) -> Segments {
        CteSegmenter::default().segment(query)
    }

    #[test]
    fn test_no_cte_keeps_whole_query() {
        let query = "SELECT * FROM ORDERS O JOIN CUSTOMERS C ON O.CUSTOMER_ID = C.ID";
        let segments = segment(query);
        assert_eq!(segments.outer_query, query);
        assert!(!segments.has_ctes());
    }

    #[test]
    fn test_single_cte() {
        let segments =
            segment("WITH RECENT AS (SELECT * FROM ORDERS WHERE STATUS = 'OPEN') SELECT * FROM RECENT");
        assert_eq!(segments.outer_query, "SELECT * FROM RECENT");
        assert_eq!(
            segments.ctes,
            vec![CteDefinition::new(
                "RECENT",
                "SELECT * FROM ORDERS WHERE STATUS = 'OPEN'"
            )]
        );
    }

    #[test]
    fn test_chained_ctes() {
        let segments =
            segment("WITH A AS (SELECT * FROM T1), B AS (SELECT * FROM A) SELECT * FROM B");
        assert_eq!(segments.outer_query, "SELECT * FROM B");
        assert_eq!(
            segments.ctes,
            vec![
                CteDefinition::new("A", "SELECT * FROM T1"),
                CteDefinition::new("B", "SELECT * FROM A"),
            ]
        );
    }

    #[test]
    fn test_multiline_with_commas_in_bodies() {
        let query = "WITH\n  TOTALS AS (\n    SELECT CUSTOMER_ID, SUM(AMOUNT) AS TOTAL\n    FROM SALES.ORDERS\n    GROUP BY CUSTOMER_ID\n  ),\n  TOP_CUSTOMERS AS (\n    SELECT C.ID, C.NAME\n    FROM CUSTOMERS C JOIN TOTALS T ON C.ID = T.CUSTOMER_ID\n  )\nSELECT * FROM TOP_CUSTOMERS";
        let segments = segment(query);
        assert_eq!(segments.outer_query, "SELECT * FROM TOP_CUSTOMERS");
        assert_eq!(segments.ctes.len(), 2);
        assert_eq!(segments.ctes[0].name, "TOTALS");
        assert_eq!(
            segments.ctes[0].body,
            "SELECT CUSTOMER_ID, SUM(AMOUNT) AS TOTAL\n    FROM SALES.ORDERS\n    GROUP BY CUSTOMER_ID"
        );
        assert_eq!(segments.ctes[1].name, "TOP_CUSTOMERS");
        assert_eq!(
            segments.ctes[1].body,
            "SELECT C.ID, C.NAME\n    FROM CUSTOMERS C JOIN TOTALS T ON C.ID = T.CUSTOMER_ID"
        );
    }

    #[test]
    fn test_nested_select_does_not_flip_toggle() {
        let segments = segment(
            "WITH A AS (SELECT * FROM (SELECT * FROM T1) X) SELECT * FROM A",
        );
        assert_eq!(segments.outer_query, "SELECT * FROM A");
        assert_eq!(
            segments.ctes,
            vec![CteDefinition::new("A", "SELECT * FROM (SELECT * FROM T1) X")]
        );
    }

    #[test_case("WITH A AS (SELECT 1) SELECT * FROM A", "A" ; "single space")]
    #[test_case("WITH A AS(SELECT 1) SELECT * FROM A", "A" ; "no space before paren")]
    #[test_case("with a as (select 1) select * from a", "a" ; "lowercase keywords")]
    #[test_case("WITH RECURSIVE A AS (SELECT 1) SELECT * FROM A", "A" ; "recursive")]
    #[test_case("WITH\nA\nAS\n(SELECT 1) SELECT * FROM A", "A" ; "newlines around name")]
    fn test_cte_name_detection(query: &str, expected: &str) {
        let segments = segment(query);
        assert_eq!(segments.ctes.len(), 1);
        assert_eq!(segments.ctes[0].name, expected);
    }

    #[test]
    fn test_unbalanced_parentheses_fall_back_to_whole_query() {
        let query = "WITH A AS (SELECT * FROM T1 SELECT * FROM A";
        let segments = segment(query);
        assert_eq!(segments.outer_query, query);
        assert!(segments.ctes.is_empty());
    }

    #[test]
    fn test_untokenizable_query_is_unsegmented() {
        let query = "WITH A AS (SELECT 'unterminated) SELECT * FROM A";
        let segments = segment(query);
        assert_eq!(segments.outer_query, query);
        assert!(segments.ctes.is_empty());
    }

    #[test]
    fn test_doubled_quotes_are_kept_verbatim() {
        let segments = segment(
            "WITH A AS (SELECT * FROM T1 WHERE NAME = 'O''BRIEN') SELECT * FROM A WHERE X = 'IT''S'",
        );
        assert_eq!(segments.outer_query, "SELECT * FROM A WHERE X = 'IT''S'");
        assert_eq!(
            segments.ctes,
            vec![CteDefinition::new(
                "A",
                "SELECT * FROM T1 WHERE NAME = 'O''BRIEN'"
            )]
        );
    }

    #[test]
    fn test_comments_between_ctes_are_dropped() {
        let segments = segment(
            "WITH A AS (SELECT * FROM T1), /* second */ B AS (SELECT * FROM A) -- tail\nSELECT * FROM B",
        );
        assert_eq!(segments.outer_query, "SELECT * FROM B");
        assert_eq!(
            segments.ctes,
            vec![
                CteDefinition::new("A", "SELECT * FROM T1"),
                CteDefinition::new("B", "SELECT * FROM A"),
            ]
        );
    }

    #[test]
    fn test_trailing_comment_before_outer_select() {
        let segments = segment("WITH A AS (SELECT * FROM T1) -- note\nSELECT * FROM A");
        assert_eq!(segments.outer_query, "SELECT * FROM A");
        assert_eq!(segments.ctes, vec![CteDefinition::new("A", "SELECT * FROM T1")]);
    }

    // A second top-level SELECT toggles back into the CTE region, so the
    // outer query is cut right before it.
    #[test]
    fn test_top_level_union_truncates_outer_query() {
        let segments =
            segment("WITH A AS (SELECT * FROM T1) SELECT * FROM A UNION SELECT * FROM T2");
        assert_eq!(segments.outer_query, "SELECT * FROM A UNION");
        assert_eq!(
            segments.ctes,
            vec![CteDefinition::new("A", "SELECT * FROM T1")]
        );
    }

    // Column aliases written as `AS (` inside a body are taken as boundaries.
    #[test]
    fn test_as_paren_inside_body_is_a_boundary() {
        let segments =
            segment("WITH A AS (SELECT X AS (Y) FROM T1) SELECT * FROM A");
        assert_eq!(segments.outer_query, "SELECT * FROM A");
        assert_eq!(
            segments.ctes,
            vec![
                CteDefinition::new("A", "SELECT"),
                CteDefinition::new("X", "Y) FROM T1"),
            ]
        );
    }

    #[test]
    fn test_repeated_names_are_kept_in_order() {
        let segments =
            segment("WITH A AS (SELECT * FROM T1), A AS (SELECT * FROM T2) SELECT * FROM A");
        let names: Vec<&str> = segments.ctes.iter().map(|cte| cte.name.as_str()).collect();
        assert_eq!(names, vec!["A", "A"]);
        assert_eq!(segments.ctes[1].body, "SELECT * FROM T2");
    }

    #[test_case("WITH A", ("WITH ", "A") ; "space")]
    #[test_case("), B  ", ("), ", "B") ; "trailing whitespace")]
    #[test_case("X,Y", ("X,", "Y") ; "comma")]
    #[test_case("ALONE", ("", "ALONE") ; "single token")]
    fn test_split_last_token(text: &str, expected: (&str, &str)) {
        assert_eq!(split_last_token(text), expected);
    }

    #[test]
    fn test_strip_body_removes_one_paren() {
        assert_eq!(strip_body("SELECT MAX(X) FROM T)), "), "SELECT MAX(X) FROM T)");
        assert_eq!(strip_body("SELECT 1"), "SELECT 1");
    }
}
